//! Mutation operators
//!
//! Each operator looks at one node of the original tree and either declines
//! or returns a [`Replacement`] for it. Operators hold no state, never see
//! each other's output, and are tried in catalog order.

use std::fmt;

use crate::syntax::{
    BinaryOp, ExprKind, Literal, NodeId, NodeKind, Operator, Replacement, StmtKind, SyntaxTree,
    UnaryOp,
};

/// Broad kind of fault an operator introduces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Arithmetic,
    Boundary,
    Negation,
    Logical,
    Literal,
    ControlFlow,
    Removal,
    Return,
}

impl Category {
    /// Categories that would change a declaration's contract when applied
    /// inside a signature (array lengths, const generic arguments, ...)
    pub fn is_contract_sensitive(self) -> bool {
        matches!(
            self,
            Self::Arithmetic | Self::Boundary | Self::Negation | Self::Logical | Self::Literal
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The node an operator is asked about
#[derive(Debug, Clone, Copy)]
pub struct MutationSite<'a> {
    pub tree: &'a SyntaxTree,
    pub node: NodeId,
}

impl MutationSite<'_> {
    fn kind(&self) -> &NodeKind {
        self.tree.kind(self.node)
    }

    /// The operator leaf directly under this node, if any
    fn operator(&self) -> Option<(NodeId, Operator)> {
        self.tree
            .children(self.node)
            .iter()
            .find_map(|&child| match self.tree.kind(child) {
                NodeKind::Operator(op) => Some((child, *op)),
                _ => None,
            })
    }

    /// First child that is not an operator leaf
    fn operand(&self) -> Option<NodeId> {
        self.tree
            .children(self.node)
            .iter()
            .copied()
            .find(|&child| !matches!(self.tree.kind(child), NodeKind::Operator(_)))
    }
}

pub trait Mutator: Send + Sync {
    /// Unique, stable identifier used in config and reports
    fn id(&self) -> &'static str;

    fn category(&self) -> Category;

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement>;
}

/// Every operator, in the order they are applied
pub fn catalog() -> Vec<Box<dyn Mutator>> {
    vec![
        Box::new(BinarySwap {
            id: "ArithmeticOperator",
            category: Category::Arithmetic,
            swap: arithmetic,
        }),
        Box::new(BinarySwap {
            id: "AssignmentOperator",
            category: Category::Arithmetic,
            swap: assignment,
        }),
        Box::new(BinarySwap {
            id: "BitwiseOperator",
            category: Category::Arithmetic,
            swap: bitwise,
        }),
        Box::new(BinarySwap {
            id: "ConditionalBoundary",
            category: Category::Boundary,
            swap: boundary,
        }),
        Box::new(BinarySwap {
            id: "ConditionalNegation",
            category: Category::Negation,
            swap: negation,
        }),
        Box::new(BinarySwap {
            id: "LogicalOperator",
            category: Category::Logical,
            swap: logical,
        }),
        Box::new(UnaryRemoval {
            id: "LogicalNot",
            category: Category::Logical,
            op: UnaryOp::Not,
        }),
        Box::new(UnaryRemoval {
            id: "UnaryMinus",
            category: Category::Arithmetic,
            op: UnaryOp::Neg,
        }),
        Box::new(IfNegation),
        Box::new(BooleanLiteral),
        Box::new(IntegerShift {
            id: "IncrementInteger",
            delta: 1,
        }),
        Box::new(IntegerShift {
            id: "DecrementInteger",
            delta: -1,
        }),
        Box::new(StringLiteral),
        Box::new(RangeLimits),
        Box::new(BreakContinue),
        Box::new(CallStatementRemoval),
        Box::new(UnitFunctionBody),
        Box::new(DefaultReturn),
    ]
}

pub fn catalog_ids() -> Vec<&'static str> {
    catalog().iter().map(|m| m.id()).collect()
}

/// Replaces the operator token of a binary expression
struct BinarySwap {
    id: &'static str,
    category: Category,
    swap: fn(BinaryOp) -> Option<BinaryOp>,
}

impl Mutator for BinarySwap {
    fn id(&self) -> &'static str {
        self.id
    }

    fn category(&self) -> Category {
        self.category
    }

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
        if !matches!(site.kind(), NodeKind::Expr(ExprKind::Binary(_))) {
            return None;
        }
        let (op_node, Operator::Binary(op)) = site.operator()? else {
            return None;
        };
        let replacement = (self.swap)(op)?;
        let swapped = (op_node, replacement.symbol().to_string());
        if replacement.precedence() == op.precedence() {
            return Some(Replacement::Children(vec![swapped]));
        }
        regroup(site, swapped, replacement.precedence(), op.precedence())
    }
}

/// Render a swap to an operator of different precedence so that the
/// spliced text keeps the original grouping: operands that the new operator
/// would pull apart are parenthesized, and so is the whole expression when
/// the new operator binds looser than the old one.
fn regroup(
    site: &MutationSite<'_>,
    swapped: (NodeId, String),
    new: u8,
    old: u8,
) -> Option<Replacement> {
    let children = site.tree.children(site.node);
    let operator_at = children.iter().position(|&c| c == swapped.0)?;
    let mut subs = vec![swapped];
    for (index, &child) in children.iter().enumerate() {
        let NodeKind::Expr(ExprKind::Binary(child_op)) = site.tree.kind(child) else {
            continue;
        };
        // Left operands may share the level of a left-associative operator
        let needs_parens = if index < operator_at {
            child_op.precedence() < new
        } else {
            child_op.precedence() <= new
        };
        if needs_parens {
            subs.push((child, format!("({})", site.tree.text(child))));
        }
    }
    let rendered = site
        .tree
        .render_patched(site.node, &Replacement::Children(subs))?;
    Some(Replacement::Node(if new < old {
        format!("({rendered})")
    } else {
        rendered
    }))
}

fn arithmetic(op: BinaryOp) -> Option<BinaryOp> {
    use BinaryOp::*;
    Some(match op {
        Add => Sub,
        Sub => Add,
        Mul => Div,
        Div => Mul,
        Rem => Mul,
        _ => return None,
    })
}

fn assignment(op: BinaryOp) -> Option<BinaryOp> {
    use BinaryOp::*;
    Some(match op {
        AddAssign => SubAssign,
        SubAssign => AddAssign,
        MulAssign => DivAssign,
        DivAssign => MulAssign,
        _ => return None,
    })
}

fn bitwise(op: BinaryOp) -> Option<BinaryOp> {
    use BinaryOp::*;
    Some(match op {
        BitAnd => BitOr,
        BitOr => BitAnd,
        BitXor => BitAnd,
        Shl => Shr,
        Shr => Shl,
        _ => return None,
    })
}

fn boundary(op: BinaryOp) -> Option<BinaryOp> {
    use BinaryOp::*;
    Some(match op {
        Lt => Le,
        Le => Lt,
        Gt => Ge,
        Ge => Gt,
        _ => return None,
    })
}

fn negation(op: BinaryOp) -> Option<BinaryOp> {
    use BinaryOp::*;
    Some(match op {
        Eq => Ne,
        Ne => Eq,
        Lt => Ge,
        Ge => Lt,
        Gt => Le,
        Le => Gt,
        _ => return None,
    })
}

fn logical(op: BinaryOp) -> Option<BinaryOp> {
    match op {
        BinaryOp::And => Some(BinaryOp::Or),
        BinaryOp::Or => Some(BinaryOp::And),
        _ => None,
    }
}

/// Drops a prefix operator, keeping its operand
struct UnaryRemoval {
    id: &'static str,
    category: Category,
    op: UnaryOp,
}

impl Mutator for UnaryRemoval {
    fn id(&self) -> &'static str {
        self.id
    }

    fn category(&self) -> Category {
        self.category
    }

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
        match site.kind() {
            NodeKind::Expr(ExprKind::Unary(op)) if *op == self.op => {
                let operand = site.operand()?;
                Some(Replacement::Node(site.tree.text(operand).to_string()))
            }
            _ => None,
        }
    }
}

struct IfNegation;

impl Mutator for IfNegation {
    fn id(&self) -> &'static str {
        "IfNegation"
    }

    fn category(&self) -> Category {
        Category::Logical
    }

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
        if !matches!(site.kind(), NodeKind::Expr(ExprKind::If)) {
            return None;
        }
        let condition = *site.tree.children(site.node).first()?;
        // `if let` conditions cannot be negated
        if matches!(site.tree.kind(condition), NodeKind::Expr(ExprKind::Let)) {
            return None;
        }
        let negated = format!("!({})", site.tree.text(condition));
        Some(Replacement::Children(vec![(condition, negated)]))
    }
}

struct BooleanLiteral;

impl Mutator for BooleanLiteral {
    fn id(&self) -> &'static str {
        "BooleanLiteral"
    }

    fn category(&self) -> Category {
        Category::Literal
    }

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
        match site.kind() {
            NodeKind::Expr(ExprKind::Lit(Literal::Bool(value))) => {
                Some(Replacement::Node((!value).to_string()))
            }
            _ => None,
        }
    }
}

/// Moves an integer literal up or down by one, keeping its type suffix
struct IntegerShift {
    id: &'static str,
    delta: i8,
}

impl Mutator for IntegerShift {
    fn id(&self) -> &'static str {
        self.id
    }

    fn category(&self) -> Category {
        Category::Literal
    }

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
        let NodeKind::Expr(ExprKind::Lit(Literal::Int {
            value: Some(value),
            suffix,
        })) = site.kind()
        else {
            return None;
        };
        let shifted = if self.delta > 0 {
            value.checked_add(1)?
        } else {
            value.checked_sub(1)?
        };
        Some(Replacement::Node(format!("{shifted}{suffix}")))
    }
}

struct StringLiteral;

impl Mutator for StringLiteral {
    fn id(&self) -> &'static str {
        "StringLiteral"
    }

    fn category(&self) -> Category {
        Category::Literal
    }

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
        match site.kind() {
            NodeKind::Expr(ExprKind::Lit(Literal::Str { empty: false })) => {
                Some(Replacement::Node("\"\"".to_string()))
            }
            _ => None,
        }
    }
}

struct RangeLimits;

impl Mutator for RangeLimits {
    fn id(&self) -> &'static str {
        "RangeLimits"
    }

    fn category(&self) -> Category {
        Category::Boundary
    }

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
        if !matches!(site.kind(), NodeKind::Expr(ExprKind::Range { .. })) {
            return None;
        }
        let (op_node, Operator::Range { closed }) = site.operator()? else {
            return None;
        };
        // `a..=` is not valid without an upper bound
        if site.tree.children(site.node).last() == Some(&op_node) {
            return None;
        }
        let limits = if closed { ".." } else { "..=" };
        Some(Replacement::Children(vec![(op_node, limits.to_string())]))
    }
}

struct BreakContinue;

impl Mutator for BreakContinue {
    fn id(&self) -> &'static str {
        "BreakContinue"
    }

    fn category(&self) -> Category {
        Category::ControlFlow
    }

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
        let text = match site.kind() {
            NodeKind::Expr(ExprKind::Break {
                labeled: false,
                has_value: false,
            }) => "continue",
            NodeKind::Expr(ExprKind::Continue { labeled: false }) => "break",
            _ => return None,
        };
        Some(Replacement::Node(text.to_string()))
    }
}

/// Deletes `f(..);` and `x.m(..);` statements
struct CallStatementRemoval;

impl Mutator for CallStatementRemoval {
    fn id(&self) -> &'static str {
        "CallStatementRemoval"
    }

    fn category(&self) -> Category {
        Category::Removal
    }

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
        if !matches!(site.kind(), NodeKind::Stmt(StmtKind::Expr { semi: true })) {
            return None;
        }
        let expr = *site.tree.children(site.node).first()?;
        match site.tree.kind(expr) {
            NodeKind::Expr(ExprKind::Call | ExprKind::MethodCall) => {
                Some(Replacement::Node(String::new()))
            }
            _ => None,
        }
    }
}

/// Return type of the named function whose body is `site`, if it is one.
/// `Some(None)` means the function returns `()`.
fn function_body_return(site: &MutationSite<'_>) -> Option<Option<String>> {
    if !matches!(site.kind(), NodeKind::Block) {
        return None;
    }
    let function = site.tree.parent(site.node)?;
    match site.tree.kind(function) {
        NodeKind::Function { name: Some(_), .. } => {}
        _ => return None,
    }
    let ret = site
        .tree
        .children(function)
        .iter()
        .find_map(|&child| match site.tree.kind(child) {
            NodeKind::ReturnType { ty } => Some(ty.replace(' ', "")),
            _ => None,
        });
    Some(ret.filter(|ty| ty != "()"))
}

fn is_empty_body(text: &str) -> bool {
    text.trim_start_matches('{')
        .trim_end_matches('}')
        .trim()
        .is_empty()
}

struct UnitFunctionBody;

impl Mutator for UnitFunctionBody {
    fn id(&self) -> &'static str {
        "UnitFunctionBody"
    }

    fn category(&self) -> Category {
        Category::Return
    }

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
        match function_body_return(site)? {
            None if !is_empty_body(site.tree.text(site.node)) => {
                Some(Replacement::Node("{}".to_string()))
            }
            _ => None,
        }
    }
}

/// Std types whose `Default` value is a meaningful wrong answer
const DEFAULT_TYPES: &[&str] = &[
    "bool", "char", "u8", "u16", "u32", "u64", "u128", "usize", "i8", "i16", "i32", "i64",
    "i128", "isize", "f32", "f64", "String", "Vec", "Option", "HashMap", "HashSet", "BTreeMap",
    "BTreeSet", "VecDeque",
];

const DEFAULT_BODY: &str = "{ Default::default() }";

struct DefaultReturn;

impl Mutator for DefaultReturn {
    fn id(&self) -> &'static str {
        "DefaultReturn"
    }

    fn category(&self) -> Category {
        Category::Return
    }

    fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
        let ty = function_body_return(site)??;
        let head = ty.split('<').next().unwrap_or_default();
        let head = head.rsplit("::").next().unwrap_or(head);
        if !DEFAULT_TYPES.contains(&head) || site.tree.text(site.node) == DEFAULT_BODY {
            return None;
        }
        Some(Replacement::Node(DEFAULT_BODY.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::link_parents;
    use pretty_assertions::assert_eq;

    /// Every rendering `mutator` produces over `source`, in source order
    fn mutations(id: &str, source: &str) -> Vec<(String, String)> {
        let mut tree = SyntaxTree::parse("test.rs", source).unwrap();
        link_parents(&mut tree);
        let mutators = catalog();
        let mutator = mutators.iter().find(|m| m.id() == id).unwrap();
        tree.preorder()
            .into_iter()
            .filter_map(|node| {
                let replacement = mutator.mutate(&MutationSite { tree: &tree, node })?;
                let rendered = tree.render_patched(node, &replacement)?;
                Some((tree.text(node).to_string(), rendered))
            })
            .collect()
    }

    fn pair(a: &str, b: &str) -> (String, String) {
        (a.to_string(), b.to_string())
    }

    #[test]
    fn test_catalog_ids_are_unique_and_ordered() {
        let ids = catalog_ids();
        assert_eq!(ids.len(), 18);
        assert_eq!(ids[0], "ArithmeticOperator");
        assert_eq!(ids[17], "DefaultReturn");
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn test_contract_sensitive_categories() {
        let sensitive: Vec<_> = catalog()
            .iter()
            .filter(|m| m.category().is_contract_sensitive())
            .map(|m| m.id())
            .collect();
        assert!(sensitive.contains(&"IncrementInteger"));
        assert!(!sensitive.contains(&"UnitFunctionBody"));
        assert!(!sensitive.contains(&"BreakContinue"));
        assert!(!sensitive.contains(&"CallStatementRemoval"));
    }

    #[test]
    fn test_arithmetic_operator() {
        let found = mutations("ArithmeticOperator", "fn f(a: u8) -> u8 { a + 1 * 2 % 3 }");
        assert_eq!(
            found,
            vec![
                pair("a + 1 * 2 % 3", "a - 1 * 2 % 3"),
                pair("1 * 2 % 3", "1 * 2 * 3"),
                pair("1 * 2", "1 / 2"),
            ]
        );
    }

    #[test]
    fn test_assignment_and_bitwise() {
        assert_eq!(
            mutations("AssignmentOperator", "fn f(mut a: u8) { a += 1; a |= 2; }"),
            vec![pair("a += 1", "a -= 1")]
        );
        assert_eq!(
            mutations("BitwiseOperator", "fn f(a: u8) -> u8 { (a ^ 1) << 2 }"),
            vec![pair("(a ^ 1) << 2", "(a ^ 1) >> 2"), pair("a ^ 1", "a & 1")]
        );
    }

    #[test]
    fn test_boundary_and_negation() {
        let source = "fn f(a: u8) -> bool { a < 3 && a != 0 }";
        assert_eq!(
            mutations("ConditionalBoundary", source),
            vec![pair("a < 3", "a <= 3")]
        );
        assert_eq!(
            mutations("ConditionalNegation", source),
            vec![pair("a < 3", "a >= 3"), pair("a != 0", "a == 0")]
        );
        assert_eq!(
            mutations("LogicalOperator", source),
            vec![pair("a < 3 && a != 0", "(a < 3 || a != 0)")]
        );
    }

    #[test]
    fn test_swaps_keep_original_grouping() {
        let source = "fn f(a: u8, b: u8, c: u8) -> u8 { a & b ^ c }";
        let found = mutations("BitwiseOperator", source);
        assert_eq!(
            found,
            vec![pair("a & b ^ c", "a & b & c"), pair("a & b", "(a | b)")]
        );

        // Spliced back into the file, `^` must still be the outermost operator
        let (original, mutated) = &found[1];
        let spliced = source.replacen(original.as_str(), mutated, 1);
        let file = syn::parse_file(&spliced).unwrap();
        let syn::Item::Fn(function) = &file.items[0] else {
            panic!("expected a function");
        };
        let Some(syn::Stmt::Expr(syn::Expr::Binary(top), None)) = function.block.stmts.last() else {
            panic!("expected a binary tail expression");
        };
        assert!(matches!(top.op, syn::BinOp::BitXor(_)));

        assert_eq!(
            mutations("BitwiseOperator", "fn f(a: u8, b: u8, c: u8) -> u8 { a ^ b | c }")[0],
            pair("a ^ b | c", "(a ^ b) & c")
        );
        assert_eq!(
            mutations("LogicalOperator", "fn f(a: bool, b: bool, c: bool) -> bool { a && b && c }"),
            vec![
                pair("a && b && c", "(a && b || c)"),
                pair("a && b", "(a || b)"),
            ]
        );
    }

    #[test]
    fn test_unary_removal() {
        assert_eq!(
            mutations("LogicalNot", "fn f(a: bool) -> bool { !a }"),
            vec![pair("!a", "a")]
        );
        assert_eq!(
            mutations("UnaryMinus", "fn f(a: i8) -> i8 { -a }"),
            vec![pair("-a", "a")]
        );
        assert!(mutations("UnaryMinus", "fn f(a: &u8) -> u8 { *a }").is_empty());
    }

    #[test]
    fn test_if_negation_skips_if_let() {
        let source = "fn f(a: Option<u8>) { if let Some(x) = a { } if a.is_none() { } }";
        assert_eq!(
            mutations("IfNegation", source),
            vec![pair("if a.is_none() { }", "if !(a.is_none()) { }")]
        );
    }

    #[test]
    fn test_literals() {
        let source = "fn f() { let t = true; let n = 0u8; let s = \"x\"; let e = \"\"; }";
        assert_eq!(
            mutations("BooleanLiteral", source),
            vec![pair("true", "false")]
        );
        assert_eq!(
            mutations("IncrementInteger", source),
            vec![pair("0u8", "1u8")]
        );
        assert!(mutations("DecrementInteger", source).is_empty());
        assert_eq!(
            mutations("StringLiteral", source),
            vec![pair("\"x\"", "\"\"")]
        );
    }

    #[test]
    fn test_range_limits_need_an_end() {
        let source = "fn f(v: &[u8]) { for _ in 0..3 {} let _ = &v[1..]; for _ in 0..=2 {} }";
        assert_eq!(
            mutations("RangeLimits", source),
            vec![pair("0..3", "0..=3"), pair("0..=2", "0..2")]
        );
    }

    #[test]
    fn test_break_continue() {
        let source = "fn f() { 'a: loop { break; continue; break 'a; } }";
        assert_eq!(
            mutations("BreakContinue", source),
            vec![pair("break", "continue"), pair("continue", "break")]
        );
    }

    #[test]
    fn test_call_statement_removal() {
        let source = "fn f(v: &mut Vec<u8>) { v.push(1); g(); let x = h(); }";
        assert_eq!(
            mutations("CallStatementRemoval", source),
            vec![pair("v.push(1);", ""), pair("g();", "")]
        );
    }

    #[test]
    fn test_function_bodies() {
        let source = r#"
fn log(v: &mut Vec<u8>) { v.clear(); }
fn empty() {}
fn count() -> usize { 3 }
fn name() -> std::string::String { "x".into() }
fn custom() -> Widget { Widget }
"#;
        assert_eq!(
            mutations("UnitFunctionBody", source),
            vec![pair("{ v.clear(); }", "{}")]
        );
        let defaults: Vec<_> = mutations("DefaultReturn", source)
            .into_iter()
            .map(|(_, after)| after)
            .collect();
        assert_eq!(defaults, vec![DEFAULT_BODY, DEFAULT_BODY]);
    }
}
