//! Syntax tree construction
//!
//! Parses Rust source with `syn` and lowers the AST into a flat arena of typed
//! nodes. Every node records its byte span in the original text, so untouched
//! regions render back to exactly the bytes they were parsed from and a
//! mutated file differs from the original only inside the mutated span.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use proc_macro2::LineColumn;
use quote::ToTokens;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};

use crate::error::{MutationError, Result};

/// Index of a node inside its tree's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Source position of a node: byte offsets plus 1-indexed lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Free,
    Method,
    TraitMethod,
    Closure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Struct,
    Enum,
    Union,
    Trait,
}

/// One name brought into scope by a `use` item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseEntry {
    pub alias: String,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    BitXor,
    BitAnd,
    BitOr,
    Shl,
    Shr,
    Eq,
    Lt,
    Le,
    Ne,
    Ge,
    Gt,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    RemAssign,
    BitXorAssign,
    BitAndAssign,
    BitOrAssign,
    ShlAssign,
    ShrAssign,
}

impl BinaryOp {
    fn from_syn(op: &syn::BinOp) -> Option<Self> {
        use syn::BinOp as B;
        Some(match op {
            B::Add(_) => Self::Add,
            B::Sub(_) => Self::Sub,
            B::Mul(_) => Self::Mul,
            B::Div(_) => Self::Div,
            B::Rem(_) => Self::Rem,
            B::And(_) => Self::And,
            B::Or(_) => Self::Or,
            B::BitXor(_) => Self::BitXor,
            B::BitAnd(_) => Self::BitAnd,
            B::BitOr(_) => Self::BitOr,
            B::Shl(_) => Self::Shl,
            B::Shr(_) => Self::Shr,
            B::Eq(_) => Self::Eq,
            B::Lt(_) => Self::Lt,
            B::Le(_) => Self::Le,
            B::Ne(_) => Self::Ne,
            B::Ge(_) => Self::Ge,
            B::Gt(_) => Self::Gt,
            B::AddAssign(_) => Self::AddAssign,
            B::SubAssign(_) => Self::SubAssign,
            B::MulAssign(_) => Self::MulAssign,
            B::DivAssign(_) => Self::DivAssign,
            B::RemAssign(_) => Self::RemAssign,
            B::BitXorAssign(_) => Self::BitXorAssign,
            B::BitAndAssign(_) => Self::BitAndAssign,
            B::BitOrAssign(_) => Self::BitOrAssign,
            B::ShlAssign(_) => Self::ShlAssign,
            B::ShrAssign(_) => Self::ShrAssign,
            _ => return None,
        })
    }

    /// Binding strength; higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            Self::Mul | Self::Div | Self::Rem => 10,
            Self::Add | Self::Sub => 9,
            Self::Shl | Self::Shr => 8,
            Self::BitAnd => 7,
            Self::BitXor => 6,
            Self::BitOr => 5,
            Self::Eq | Self::Lt | Self::Le | Self::Ne | Self::Ge | Self::Gt => 4,
            Self::And => 3,
            Self::Or => 2,
            Self::AddAssign
            | Self::SubAssign
            | Self::MulAssign
            | Self::DivAssign
            | Self::RemAssign
            | Self::BitXorAssign
            | Self::BitAndAssign
            | Self::BitOrAssign
            | Self::ShlAssign
            | Self::ShrAssign => 1,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::And => "&&",
            Self::Or => "||",
            Self::BitXor => "^",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Eq => "==",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Gt => ">",
            Self::AddAssign => "+=",
            Self::SubAssign => "-=",
            Self::MulAssign => "*=",
            Self::DivAssign => "/=",
            Self::RemAssign => "%=",
            Self::BitXorAssign => "^=",
            Self::BitAndAssign => "&=",
            Self::BitOrAssign => "|=",
            Self::ShlAssign => "<<=",
            Self::ShrAssign => ">>=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Deref,
    Not,
    Neg,
}

impl UnaryOp {
    fn from_syn(op: &syn::UnOp) -> Option<Self> {
        match op {
            syn::UnOp::Deref(_) => Some(Self::Deref),
            syn::UnOp::Not(_) => Some(Self::Not),
            syn::UnOp::Neg(_) => Some(Self::Neg),
            _ => None,
        }
    }
}

/// Operator tokens, kept as leaves so mutators can swap just the symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Binary(BinaryOp),
    Unary(UnaryOp),
    Range { closed: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Bool(bool),
    Int {
        value: Option<u128>,
        suffix: String,
    },
    Float,
    Str {
        empty: bool,
    },
    Char,
    Other,
}

impl Literal {
    fn from_syn(lit: &syn::Lit) -> Self {
        match lit {
            syn::Lit::Bool(b) => Self::Bool(b.value),
            syn::Lit::Int(i) => Self::Int {
                value: i.base10_parse::<u128>().ok(),
                suffix: i.suffix().to_string(),
            },
            syn::Lit::Float(_) => Self::Float,
            syn::Lit::Str(s) => Self::Str {
                empty: s.value().is_empty(),
            },
            syn::Lit::Char(_) => Self::Char,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Binary(BinaryOp),
    Unary(UnaryOp),
    Lit(Literal),
    Call,
    MethodCall,
    Path,
    If,
    Let,
    Return,
    Break { labeled: bool, has_value: bool },
    Continue { labeled: bool },
    Range { closed: bool },
    Paren,
    Block,
    Macro,
    Other,
}

impl ExprKind {
    fn classify(expr: &syn::Expr) -> Self {
        use syn::Expr as E;
        match expr {
            E::Binary(b) => BinaryOp::from_syn(&b.op).map_or(Self::Other, Self::Binary),
            E::Unary(u) => UnaryOp::from_syn(&u.op).map_or(Self::Other, Self::Unary),
            E::Lit(l) => Self::Lit(Literal::from_syn(&l.lit)),
            E::Call(_) => Self::Call,
            E::MethodCall(_) => Self::MethodCall,
            E::Path(_) => Self::Path,
            E::If(_) => Self::If,
            E::Let(_) => Self::Let,
            E::Return(_) => Self::Return,
            E::Break(b) => Self::Break {
                labeled: b.label.is_some(),
                has_value: b.expr.is_some(),
            },
            E::Continue(c) => Self::Continue {
                labeled: c.label.is_some(),
            },
            E::Range(r) => Self::Range {
                closed: matches!(r.limits, syn::RangeLimits::Closed(_)),
            },
            E::Paren(_) => Self::Paren,
            E::Block(_) => Self::Block,
            E::Macro(_) => Self::Macro,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtKind {
    Local,
    Item,
    Expr { semi: bool },
    Macro,
}

/// Closed set of node shapes the catalog and annotator dispatch on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Module {
        name: String,
        test_only: bool,
    },
    Use {
        entries: Vec<UseEntry>,
    },
    Function {
        name: Option<String>,
        kind: FunctionKind,
        test_only: bool,
    },
    Impl {
        self_ty: Vec<String>,
        trait_path: Option<Vec<String>>,
        test_only: bool,
    },
    TypeDecl {
        name: String,
        kind: TypeKind,
        derives: Vec<Vec<String>>,
        supertraits: Vec<Vec<String>>,
    },
    ConstItem {
        name: String,
        is_static: bool,
    },
    Field {
        name: Option<String>,
    },
    ParamList,
    Param,
    ReturnType {
        ty: String,
    },
    TypeClause,
    GenericParams,
    /// Default value of a const generic parameter
    GenericDefault,
    WhereClause,
    TypePath {
        segments: Vec<String>,
    },
    Block,
    Stmt(StmtKind),
    Expr(ExprKind),
    Operator(Operator),
}

impl NodeKind {
    /// Nodes that make up a declaration's contract rather than its body
    pub fn is_signature_clause(&self) -> bool {
        matches!(
            self,
            Self::ParamList
                | Self::ReturnType { .. }
                | Self::TypeClause
                | Self::GenericParams
                | Self::WhereClause
        )
    }
}

#[derive(Debug, Clone)]
pub struct SyntaxNode {
    pub kind: NodeKind,
    pub span: Span,
    pub children: Vec<NodeId>,
}

/// Substitutions applied while rendering a subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    /// Replace the whole matched node
    Node(String),
    /// Replace the listed descendants, keep every other byte
    Children(Vec<(NodeId, String)>),
}

/// Arena-backed syntax tree for a single source file
#[derive(Debug)]
pub struct SyntaxTree {
    path: PathBuf,
    source: String,
    nodes: Vec<SyntaxNode>,
    parents: Vec<Option<NodeId>>,
    linked: bool,
}

impl SyntaxTree {
    /// Parse `source` into a tree. The path is only used for error reporting.
    pub fn parse(path: impl Into<PathBuf>, source: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let source = source.into();
        let offset = content_offset(&source);
        let content = &source[offset..];

        let file = syn::parse_file(content).map_err(|e| {
            let start = e.span().start();
            MutationError::Parse {
                file: path.clone(),
                line: start.line,
                column: start.column + 1,
                message: e.to_string(),
            }
        })?;

        let mut builder = Builder {
            content,
            offset,
            lines: LineIndex::new(content),
            nodes: Vec::new(),
            stack: Vec::new(),
        };
        let root_span = Span {
            start: 0,
            end: source.len(),
            start_line: 1,
            end_line: source.lines().count().max(1),
        };
        builder.open(NodeKind::File, root_span);
        builder.visit_file(&file);
        builder.close();

        let mut nodes = builder.nodes;
        normalize_children(&mut nodes);
        let parents = vec![None; nodes.len()];

        Ok(Self {
            path,
            source,
            nodes,
            parents,
            linked: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.node(id).span
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Parent of a node; `None` for the root or before parent links are set
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents[id.index()]
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Record parent links. Only the first call has any effect.
    pub(crate) fn set_parents(&mut self, parents: Vec<Option<NodeId>>) {
        if self.linked {
            return;
        }
        self.parents = parents;
        self.linked = true;
    }

    /// All reachable nodes, depth-first in source order
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }

    /// Original text of a node
    pub fn text(&self, id: NodeId) -> &str {
        let span = self.span(id);
        &self.source[span.start..span.end]
    }

    /// Re-render a node from its children and the gap text between them
    pub fn render(&self, id: NodeId) -> String {
        let mut out = String::with_capacity(self.span(id).end - self.span(id).start);
        self.render_into(id, &HashMap::new(), &mut out);
        out
    }

    /// Render `id` with a replacement applied.
    ///
    /// Returns `None` when a substitution targets a node outside the subtree.
    pub fn render_patched(&self, id: NodeId, replacement: &Replacement) -> Option<String> {
        match replacement {
            Replacement::Node(text) => Some(text.clone()),
            Replacement::Children(subs) => {
                let within = |target: NodeId| {
                    target == id || self.ancestors(target).any(|a| a == id)
                };
                if !self.linked || !subs.iter().all(|(target, _)| within(*target)) {
                    return None;
                }
                let subs: HashMap<NodeId, &str> =
                    subs.iter().map(|(n, t)| (*n, t.as_str())).collect();
                let mut out = String::new();
                self.render_into(id, &subs, &mut out);
                Some(out)
            }
        }
    }

    fn render_into(&self, id: NodeId, subs: &HashMap<NodeId, &str>, out: &mut String) {
        if let Some(text) = subs.get(&id) {
            out.push_str(text);
            return;
        }
        let node = self.node(id);
        let mut cursor = node.span.start;
        for &child in &node.children {
            let span = self.span(child);
            out.push_str(&self.source[cursor..span.start]);
            self.render_into(child, subs, out);
            cursor = span.end;
        }
        out.push_str(&self.source[cursor..node.span.end]);
    }
}

/// Length of the BOM and shebang prefix that `syn::parse_file` would skip
fn content_offset(source: &str) -> usize {
    let mut offset = 0;
    if source.starts_with('\u{feff}') {
        offset = '\u{feff}'.len_utf8();
    }
    let rest = &source[offset..];
    if rest.starts_with("#!") && !rest[2..].trim_start().starts_with('[') {
        offset += rest.find('\n').unwrap_or(rest.len());
    }
    offset
}

/// Sort children by position and drop any that escape their parent's span
fn normalize_children(nodes: &mut [SyntaxNode]) {
    let spans: Vec<Span> = nodes.iter().map(|n| n.span).collect();
    for node in nodes.iter_mut() {
        node.children
            .sort_by_key(|c| (spans[c.index()].start, spans[c.index()].end));
        let mut cursor = node.span.start;
        let parent_end = node.span.end;
        node.children.retain(|c| {
            let span = spans[c.index()];
            let fits = span.start >= cursor && span.end <= parent_end;
            if fits {
                cursor = span.end;
            }
            fits
        });
    }
}

/// Maps proc-macro2 line/column positions to byte offsets
#[derive(Debug)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            line_starts,
            len: text.len(),
        }
    }

    /// Byte offset of a 1-indexed line and 0-indexed character column
    pub fn offset(&self, text: &str, pos: LineColumn) -> usize {
        let Some(&line_start) = self.line_starts.get(pos.line.saturating_sub(1)) else {
            return self.len;
        };
        text[line_start..]
            .char_indices()
            .nth(pos.column)
            .map_or(self.len, |(i, _)| line_start + i)
    }
}

struct Builder<'a> {
    content: &'a str,
    offset: usize,
    lines: LineIndex,
    nodes: Vec<SyntaxNode>,
    stack: Vec<NodeId>,
}

impl Builder<'_> {
    fn span_of(&self, span: proc_macro2::Span) -> Span {
        let start = span.start();
        let end = span.end();
        Span {
            start: self.offset + self.lines.offset(self.content, start),
            end: self.offset + self.lines.offset(self.content, end),
            start_line: start.line,
            end_line: end.line,
        }
    }

    fn open(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(SyntaxNode {
            kind,
            span,
            children: Vec::new(),
        });
        if let Some(&parent) = self.stack.last() {
            self.nodes[parent.index()].children.push(id);
        }
        self.stack.push(id);
        id
    }

    fn close(&mut self) {
        self.stack.pop();
    }

    fn within(&mut self, kind: NodeKind, span: proc_macro2::Span, f: impl FnOnce(&mut Self)) {
        let span = self.span_of(span);
        self.open(kind, span);
        f(self);
        self.close();
    }

    fn function<'ast>(
        &mut self,
        attrs: &[syn::Attribute],
        sig: &'ast syn::Signature,
        kind: FunctionKind,
        span: proc_macro2::Span,
        body: Option<&'ast syn::Block>,
    ) {
        let node = NodeKind::Function {
            name: Some(sig.ident.to_string()),
            kind,
            test_only: is_test_only(attrs),
        };
        self.within(node, span, |b| {
            b.visit_signature(sig);
            if let Some(block) = body {
                b.visit_block(block);
            }
        });
    }

    fn const_item(
        &mut self,
        name: &syn::Ident,
        is_static: bool,
        ty: &syn::Type,
        expr: Option<&syn::Expr>,
        span: proc_macro2::Span,
    ) {
        let node = NodeKind::ConstItem {
            name: name.to_string(),
            is_static,
        };
        self.within(node, span, |b| {
            b.within(NodeKind::TypeClause, ty.span(), |b| b.visit_type(ty));
            if let Some(expr) = expr {
                b.visit_expr(expr);
            }
        });
    }

    fn type_decl(
        &mut self,
        name: &syn::Ident,
        kind: TypeKind,
        attrs: &[syn::Attribute],
        supertraits: Vec<Vec<String>>,
        span: proc_macro2::Span,
        f: impl FnOnce(&mut Self),
    ) {
        let node = NodeKind::TypeDecl {
            name: name.to_string(),
            kind,
            derives: derives(attrs),
            supertraits,
        };
        self.within(node, span, f);
    }
}

impl<'ast> Visit<'ast> for Builder<'_> {
    // Attribute values (including doc comments) are never mutation targets.
    fn visit_attribute(&mut self, _attr: &'ast syn::Attribute) {}

    fn visit_item_mod(&mut self, item: &'ast syn::ItemMod) {
        let node = NodeKind::Module {
            name: item.ident.to_string(),
            test_only: is_test_only(&item.attrs),
        };
        self.within(node, item.span(), |b| visit::visit_item_mod(b, item));
    }

    fn visit_item_use(&mut self, item: &'ast syn::ItemUse) {
        let mut entries = Vec::new();
        flatten_use(&item.tree, &mut Vec::new(), &mut entries);
        let span = self.span_of(item.span());
        self.open(NodeKind::Use { entries }, span);
        self.close();
    }

    fn visit_item_fn(&mut self, item: &'ast syn::ItemFn) {
        self.function(
            &item.attrs,
            &item.sig,
            FunctionKind::Free,
            item.span(),
            Some(&item.block),
        );
    }

    fn visit_impl_item_fn(&mut self, item: &'ast syn::ImplItemFn) {
        self.function(
            &item.attrs,
            &item.sig,
            FunctionKind::Method,
            item.span(),
            Some(&item.block),
        );
    }

    fn visit_trait_item_fn(&mut self, item: &'ast syn::TraitItemFn) {
        self.function(
            &item.attrs,
            &item.sig,
            FunctionKind::TraitMethod,
            item.span(),
            item.default.as_ref(),
        );
    }

    fn visit_signature(&mut self, sig: &'ast syn::Signature) {
        self.visit_generics(&sig.generics);
        self.within(NodeKind::ParamList, sig.paren_token.span.join(), |b| {
            for arg in &sig.inputs {
                b.within(NodeKind::Param, arg.span(), |b| b.visit_fn_arg(arg));
            }
        });
        if let syn::ReturnType::Type(_, ty) = &sig.output {
            let node = NodeKind::ReturnType {
                ty: ty.to_token_stream().to_string(),
            };
            self.within(node, sig.output.span(), |b| b.visit_type(ty));
        }
    }

    fn visit_receiver(&mut self, receiver: &'ast syn::Receiver) {
        // `&self` carries a synthesized type; only explicit `self: T` is real source.
        if receiver.colon_token.is_some() {
            self.visit_type(&receiver.ty);
        }
    }

    fn visit_expr_closure(&mut self, closure: &'ast syn::ExprClosure) {
        let node = NodeKind::Function {
            name: None,
            kind: FunctionKind::Closure,
            test_only: false,
        };
        self.within(node, closure.span(), |b| {
            let params = closure.or1_token.span.join(closure.or2_token.span);
            b.within(NodeKind::ParamList, params.unwrap_or(closure.or1_token.span), |b| {
                for input in &closure.inputs {
                    b.within(NodeKind::Param, input.span(), |b| b.visit_pat(input));
                }
            });
            if let syn::ReturnType::Type(_, ty) = &closure.output {
                let node = NodeKind::ReturnType {
                    ty: ty.to_token_stream().to_string(),
                };
                b.within(node, closure.output.span(), |b| b.visit_type(ty));
            }
            b.visit_expr(&closure.body);
        });
    }

    fn visit_generics(&mut self, generics: &'ast syn::Generics) {
        if let (Some(lt), Some(gt)) = (&generics.lt_token, &generics.gt_token) {
            let span = lt.span.join(gt.span).unwrap_or(lt.span);
            self.within(NodeKind::GenericParams, span, |b| {
                for param in &generics.params {
                    b.visit_generic_param(param);
                }
            });
        }
        if let Some(where_clause) = &generics.where_clause {
            self.within(NodeKind::WhereClause, where_clause.span(), |b| {
                visit::visit_where_clause(b, where_clause)
            });
        }
    }

    fn visit_const_param(&mut self, param: &'ast syn::ConstParam) {
        self.visit_type(&param.ty);
        if let Some(default) = &param.default {
            self.within(NodeKind::GenericDefault, default.span(), |b| b.visit_expr(default));
        }
    }

    fn visit_item_impl(&mut self, item: &'ast syn::ItemImpl) {
        let self_ty = match &*item.self_ty {
            syn::Type::Path(p) => path_segments(&p.path),
            other => vec![other.to_token_stream().to_string()],
        };
        let node = NodeKind::Impl {
            self_ty,
            trait_path: item.trait_.as_ref().map(|(_, path, _)| path_segments(path)),
            test_only: is_test_only(&item.attrs),
        };
        self.within(node, item.span(), |b| visit::visit_item_impl(b, item));
    }

    fn visit_item_struct(&mut self, item: &'ast syn::ItemStruct) {
        self.type_decl(&item.ident, TypeKind::Struct, &item.attrs, Vec::new(), item.span(), |b| {
            visit::visit_item_struct(b, item)
        });
    }

    fn visit_item_enum(&mut self, item: &'ast syn::ItemEnum) {
        self.type_decl(&item.ident, TypeKind::Enum, &item.attrs, Vec::new(), item.span(), |b| {
            visit::visit_item_enum(b, item)
        });
    }

    fn visit_item_union(&mut self, item: &'ast syn::ItemUnion) {
        self.type_decl(&item.ident, TypeKind::Union, &item.attrs, Vec::new(), item.span(), |b| {
            visit::visit_item_union(b, item)
        });
    }

    fn visit_item_trait(&mut self, item: &'ast syn::ItemTrait) {
        let supertraits = item
            .supertraits
            .iter()
            .filter_map(|bound| match bound {
                syn::TypeParamBound::Trait(t) => Some(path_segments(&t.path)),
                _ => None,
            })
            .collect();
        self.type_decl(&item.ident, TypeKind::Trait, &item.attrs, supertraits, item.span(), |b| {
            visit::visit_item_trait(b, item)
        });
    }

    fn visit_field(&mut self, field: &'ast syn::Field) {
        let node = NodeKind::Field {
            name: field.ident.as_ref().map(ToString::to_string),
        };
        self.within(node, field.span(), |b| {
            b.within(NodeKind::TypeClause, field.ty.span(), |b| b.visit_type(&field.ty));
        });
    }

    fn visit_item_const(&mut self, item: &'ast syn::ItemConst) {
        self.const_item(&item.ident, false, &item.ty, Some(&item.expr), item.span());
    }

    fn visit_item_static(&mut self, item: &'ast syn::ItemStatic) {
        self.const_item(&item.ident, true, &item.ty, Some(&item.expr), item.span());
    }

    fn visit_impl_item_const(&mut self, item: &'ast syn::ImplItemConst) {
        self.const_item(&item.ident, false, &item.ty, Some(&item.expr), item.span());
    }

    fn visit_trait_item_const(&mut self, item: &'ast syn::TraitItemConst) {
        let default = item.default.as_ref().map(|(_, expr)| expr);
        self.const_item(&item.ident, false, &item.ty, default, item.span());
    }

    fn visit_type_path(&mut self, ty: &'ast syn::TypePath) {
        let node = NodeKind::TypePath {
            segments: path_segments(&ty.path),
        };
        self.within(node, ty.span(), |b| visit::visit_type_path(b, ty));
    }

    fn visit_pat(&mut self, pat: &'ast syn::Pat) {
        // Patterns are not mutated; only the types they ascribe are lowered.
        if let syn::Pat::Type(typed) = pat {
            self.visit_type(&typed.ty);
        }
    }

    fn visit_block(&mut self, block: &'ast syn::Block) {
        self.within(NodeKind::Block, block.span(), |b| visit::visit_block(b, block));
    }

    fn visit_stmt(&mut self, stmt: &'ast syn::Stmt) {
        let kind = match stmt {
            syn::Stmt::Local(_) => StmtKind::Local,
            syn::Stmt::Item(_) => StmtKind::Item,
            syn::Stmt::Expr(_, semi) => StmtKind::Expr {
                semi: semi.is_some(),
            },
            syn::Stmt::Macro(_) => StmtKind::Macro,
        };
        self.within(NodeKind::Stmt(kind), stmt.span(), |b| visit::visit_stmt(b, stmt));
    }

    fn visit_expr(&mut self, expr: &'ast syn::Expr) {
        if let syn::Expr::Closure(closure) = expr {
            return self.visit_expr_closure(closure);
        }
        let kind = NodeKind::Expr(ExprKind::classify(expr));
        self.within(kind, expr.span(), |b| visit::visit_expr(b, expr));
    }

    fn visit_bin_op(&mut self, op: &'ast syn::BinOp) {
        if let Some(op_kind) = BinaryOp::from_syn(op) {
            self.within(NodeKind::Operator(Operator::Binary(op_kind)), op.span(), |_| {});
        }
    }

    fn visit_un_op(&mut self, op: &'ast syn::UnOp) {
        if let Some(op_kind) = UnaryOp::from_syn(op) {
            self.within(NodeKind::Operator(Operator::Unary(op_kind)), op.span(), |_| {});
        }
    }

    fn visit_range_limits(&mut self, limits: &'ast syn::RangeLimits) {
        let closed = matches!(limits, syn::RangeLimits::Closed(_));
        self.within(NodeKind::Operator(Operator::Range { closed }), limits.span(), |_| {});
    }
}

fn path_segments(path: &syn::Path) -> Vec<String> {
    path.segments.iter().map(|s| s.ident.to_string()).collect()
}

/// `#[test]`, `#[tokio::test]` and `#[cfg(test)]` mark code that is never mutated
fn is_test_only(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| {
        let path = attr.path();
        if path.segments.last().is_some_and(|s| s.ident == "test") {
            return true;
        }
        path.is_ident("cfg") && attr.parse_args::<syn::Ident>().is_ok_and(|arg| arg == "test")
    })
}

fn derives(attrs: &[syn::Attribute]) -> Vec<Vec<String>> {
    attrs
        .iter()
        .filter(|attr| attr.path().is_ident("derive"))
        .filter_map(|attr| {
            attr.parse_args_with(Punctuated::<syn::Path, syn::Token![,]>::parse_terminated)
                .ok()
        })
        .flat_map(|paths| paths.into_iter().map(|p| path_segments(&p)).collect::<Vec<_>>())
        .collect()
}

fn flatten_use(tree: &syn::UseTree, prefix: &mut Vec<String>, out: &mut Vec<UseEntry>) {
    match tree {
        syn::UseTree::Path(p) => {
            prefix.push(p.ident.to_string());
            flatten_use(&p.tree, prefix, out);
            prefix.pop();
        }
        syn::UseTree::Name(n) => push_use(prefix, &n.ident, None, out),
        syn::UseTree::Rename(r) => push_use(prefix, &r.ident, Some(&r.rename), out),
        syn::UseTree::Group(g) => {
            for item in &g.items {
                flatten_use(item, prefix, out);
            }
        }
        syn::UseTree::Glob(_) => {}
    }
}

fn push_use(
    prefix: &[String],
    ident: &syn::Ident,
    rename: Option<&syn::Ident>,
    out: &mut Vec<UseEntry>,
) {
    let mut path = prefix.to_vec();
    if ident != "self" {
        path.push(ident.to_string());
    }
    let alias = match (rename, path.last()) {
        (Some(rename), _) => rename.to_string(),
        (None, Some(last)) => last.clone(),
        (None, None) => return,
    };
    if alias != "_" {
        out.push(UseEntry { alias, path });
    }
}
