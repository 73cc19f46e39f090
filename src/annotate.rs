//! Semantic annotation
//!
//! Three passes over a parsed tree, in order:
//!
//! 1. [`link_parents`] records each node's parent.
//! 2. [`QualifiedNames::resolve`] resolves type, impl and function names
//!    against the module path, `use` aliases, local declarations and the std
//!    prelude, and registers declarations in the run's [`SymbolTable`].
//! 3. [`annotate`] computes the per-node flags the generator filters on.
//!
//! Pass 2 must run over every file of a run before pass 3 runs on any of
//! them, so that `impl Trait for Type` blocks in other files show up in a
//! type's capabilities.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Component, Path};
use std::sync::Arc;


use crate::context::RunContext;
use crate::syntax::{FunctionKind, NodeId, NodeKind, SyntaxTree, TypeKind};

/// Fill in parent links from the children lists. Later calls are no-ops.
pub fn link_parents(tree: &mut SyntaxTree) {
    if tree.is_linked() {
        return;
    }
    let mut parents = vec![None; tree.len()];
    for id in tree.preorder() {
        for &child in tree.children(id) {
            parents[child.index()] = Some(id);
        }
    }
    tree.set_parents(parents);
}

/// Module path of a source file relative to the project root.
///
/// `src/lib.rs` and `src/main.rs` are the crate root, `src/a/mod.rs` and
/// `src/a.rs` are both `crate::a`.
pub fn module_path(relative: &Path) -> Vec<String> {
    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.first().is_some_and(|p| p == "src") {
        parts.remove(0);
    }
    if let Some(last) = parts.pop() {
        let stem = last.strip_suffix(".rs").unwrap_or(&last).to_string();
        let is_root = parts.is_empty() && (stem == "lib" || stem == "main");
        if stem != "mod" && !is_root {
            parts.push(stem);
        }
    }
    let mut path = vec!["crate".to_string()];
    path.extend(parts);
    path
}

/// Std items in scope without an import, by the name they are written as
fn prelude(name: &str) -> Option<&'static str> {
    Some(match name {
        "Clone" => "std::clone::Clone",
        "Copy" => "std::marker::Copy",
        "Send" => "std::marker::Send",
        "Sync" => "std::marker::Sync",
        "Sized" => "std::marker::Sized",
        "Debug" => "std::fmt::Debug",
        "Default" => "std::default::Default",
        "PartialEq" => "std::cmp::PartialEq",
        "Eq" => "std::cmp::Eq",
        "PartialOrd" => "std::cmp::PartialOrd",
        "Ord" => "std::cmp::Ord",
        "Hash" => "std::hash::Hash",
        "Drop" => "std::ops::Drop",
        "Fn" => "std::ops::Fn",
        "FnMut" => "std::ops::FnMut",
        "FnOnce" => "std::ops::FnOnce",
        "From" => "std::convert::From",
        "Into" => "std::convert::Into",
        "AsRef" => "std::convert::AsRef",
        "AsMut" => "std::convert::AsMut",
        "TryFrom" => "std::convert::TryFrom",
        "TryInto" => "std::convert::TryInto",
        "Iterator" => "std::iter::Iterator",
        "IntoIterator" => "std::iter::IntoIterator",
        "Extend" => "std::iter::Extend",
        "ToString" => "std::string::ToString",
        "ToOwned" => "std::borrow::ToOwned",
        "String" => "std::string::String",
        "Vec" => "std::vec::Vec",
        "Box" => "std::boxed::Box",
        "Option" => "std::option::Option",
        "Result" => "std::result::Result",
        _ => return None,
    })
}

/// A type declared somewhere in the run
#[derive(Debug, Clone)]
struct DeclaredType {
    kind: TypeKind,
    derives: Vec<String>,
    supertraits: Vec<String>,
}

/// Declarations and trait impls collected across every file of a run
#[derive(Debug, Default)]
pub struct SymbolTable {
    types: HashMap<String, DeclaredType>,
    impls: HashMap<String, BTreeSet<String>>,
}

impl SymbolTable {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.impls.is_empty()
    }

    fn declare(&mut self, name: String, decl: DeclaredType) {
        self.types.insert(name, decl);
    }

    fn implement(&mut self, ty: String, trait_name: String) {
        self.impls.entry(ty).or_default().insert(trait_name);
    }
}

/// Reflection data for a declared type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub qualified_name: String,
    pub kind: TypeKind,
    /// First supertrait, for traits
    pub parent: Option<String>,
    /// Derived and implemented traits, by qualified name
    pub capabilities: BTreeSet<String>,
    pub is_abstract: bool,
    pub is_final: bool,
}

impl TypeDescriptor {
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }
}

/// Descriptors built on first lookup, one per qualified name
#[derive(Debug, Default)]
pub struct TypeCache {
    entries: HashMap<String, Arc<TypeDescriptor>>,
}

impl TypeCache {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `name`, building its descriptor from `symbols` on first use.
    /// Returns `None` for types not declared anywhere in the run.
    pub fn resolve(&mut self, name: &str, symbols: &SymbolTable) -> Option<Arc<TypeDescriptor>> {
        if let Some(found) = self.entries.get(name) {
            return Some(Arc::clone(found));
        }
        let decl = symbols.types.get(name)?;
        let mut capabilities: BTreeSet<String> = decl.derives.iter().cloned().collect();
        if let Some(impls) = symbols.impls.get(name) {
            capabilities.extend(impls.iter().cloned());
        }
        let is_trait = decl.kind == TypeKind::Trait;
        let descriptor = Arc::new(TypeDescriptor {
            qualified_name: name.to_string(),
            kind: decl.kind,
            parent: if is_trait {
                decl.supertraits.first().cloned()
            } else {
                None
            },
            capabilities,
            is_abstract: is_trait,
            is_final: !is_trait,
        });
        self.entries
            .insert(name.to_string(), Arc::clone(&descriptor));
        Some(descriptor)
    }
}

#[derive(Debug, Default)]
struct Scope {
    path: Vec<String>,
    aliases: HashMap<String, Vec<String>>,
    locals: HashSet<String>,
}

/// Qualified names of `TypeDecl`, `Impl`, `Function` and `TypePath` nodes
#[derive(Debug, Default)]
pub struct QualifiedNames {
    names: HashMap<NodeId, String>,
}

impl QualifiedNames {
    pub fn get(&self, id: NodeId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Resolve names in `tree` and register its declarations with `ctx`
    pub fn resolve(tree: &SyntaxTree, module_path: &[String], ctx: &mut RunContext) -> Self {
        let order = tree.preorder();
        let mut scopes: HashMap<NodeId, Scope> = HashMap::new();

        // Scopes first, so items can refer to declarations further down the file.
        for &id in &order {
            match tree.kind(id) {
                NodeKind::File => {
                    let scope = Scope {
                        path: module_path.to_vec(),
                        ..Scope::default()
                    };
                    scopes.insert(id, scope);
                }
                NodeKind::Module { name, .. } => {
                    let mut path = scopes
                        .get(&module_of(tree, id))
                        .map(|s| s.path.clone())
                        .unwrap_or_default();
                    path.push(name.clone());
                    scopes.insert(
                        id,
                        Scope {
                            path,
                            ..Scope::default()
                        },
                    );
                }
                _ => {}
            }
        }
        for &id in &order {
            let Some(scope) = scopes.get_mut(&module_of(tree, id)) else {
                continue;
            };
            match tree.kind(id) {
                NodeKind::Use { entries } => {
                    for entry in entries {
                        scope.aliases.insert(entry.alias.clone(), entry.path.clone());
                    }
                }
                NodeKind::Module { name, .. }
                | NodeKind::TypeDecl { name, .. }
                | NodeKind::ConstItem { name, .. } => {
                    scope.locals.insert(name.clone());
                }
                NodeKind::Function {
                    name: Some(name),
                    kind: FunctionKind::Free,
                    ..
                } => {
                    scope.locals.insert(name.clone());
                }
                _ => {}
            }
        }

        let mut names = HashMap::new();
        for &id in &order {
            let Some(scope) = scopes.get(&module_of(tree, id)) else {
                continue;
            };
            match tree.kind(id) {
                NodeKind::TypeDecl {
                    name,
                    kind,
                    derives,
                    supertraits,
                } => {
                    let qualified = join(&scope.path, name);
                    let resolve_all = |paths: &[Vec<String>]| -> Vec<String> {
                        paths.iter().map(|p| resolve(p, scope, None)).collect()
                    };
                    ctx.symbols.declare(
                        qualified.clone(),
                        DeclaredType {
                            kind: *kind,
                            derives: resolve_all(derives),
                            supertraits: resolve_all(supertraits),
                        },
                    );
                    names.insert(id, qualified);
                }
                NodeKind::Impl {
                    self_ty, trait_path, ..
                } => {
                    let qualified = resolve(self_ty, scope, None);
                    if let Some(trait_path) = trait_path {
                        let trait_name = resolve(trait_path, scope, None);
                        ctx.symbols.implement(qualified.clone(), trait_name);
                    }
                    names.insert(id, qualified);
                }
                NodeKind::Function {
                    name: Some(name), ..
                } => {
                    let owner = owner_of(tree, id).and_then(|o| names.get(&o).cloned());
                    let qualified = match owner {
                        Some(owner) => format!("{owner}::{name}"),
                        None => join(&scope.path, name),
                    };
                    names.insert(id, qualified);
                }
                NodeKind::TypePath { segments } => {
                    let self_ty = owner_of(tree, id).and_then(|o| names.get(&o).cloned());
                    names.insert(id, resolve(segments, scope, self_ty.as_deref()));
                }
                _ => {}
            }
        }

        Self { names }
    }
}

/// Nearest enclosing `File` or `Module` node, excluding `id` itself
fn module_of(tree: &SyntaxTree, id: NodeId) -> NodeId {
    tree.ancestors(id)
        .find(|&a| matches!(tree.kind(a), NodeKind::File | NodeKind::Module { .. }))
        .unwrap_or_else(|| tree.root())
}

/// Nearest enclosing `impl` or trait, stopping at module boundaries
fn owner_of(tree: &SyntaxTree, id: NodeId) -> Option<NodeId> {
    tree.ancestors(id)
        .take_while(|&a| !matches!(tree.kind(a), NodeKind::Module { .. } | NodeKind::File))
        .find(|&a| {
            matches!(
                tree.kind(a),
                NodeKind::Impl { .. }
                    | NodeKind::TypeDecl {
                        kind: TypeKind::Trait,
                        ..
                    }
            )
        })
}

fn join(path: &[String], name: &str) -> String {
    let mut out = path.join("::");
    out.push_str("::");
    out.push_str(name);
    out
}

/// Resolve a written path to its qualified form; unknown paths stay as written
fn resolve(segments: &[String], scope: &Scope, self_ty: Option<&str>) -> String {
    let Some((head, rest)) = segments.split_first() else {
        return String::new();
    };
    let mut base: Vec<String> = match head.as_str() {
        "crate" => vec![head.clone()],
        "self" | "super" => {
            let mut path = scope.path.clone();
            let mut rest = segments;
            while let Some((seg, tail)) = rest.split_first() {
                match seg.as_str() {
                    "self" => {}
                    "super" => {
                        path.pop();
                    }
                    _ => break,
                }
                rest = tail;
            }
            path.extend(rest.iter().cloned());
            return path.join("::");
        }
        "Self" => match self_ty {
            Some(ty) => vec![ty.to_string()],
            None => vec![head.clone()],
        },
        _ => {
            if let Some(target) = scope.aliases.get(head) {
                vec![resolve_use(target, scope)]
            } else if scope.locals.contains(head) {
                vec![join(&scope.path, head)]
            } else if let Some(std_path) = prelude(head).filter(|_| rest.is_empty()) {
                vec![std_path.to_string()]
            } else {
                vec![head.clone()]
            }
        }
    };
    base.extend(rest.iter().cloned());
    base.join("::")
}

/// `use` paths are relative to the crate root, the current module or an
/// external crate
fn resolve_use(target: &[String], scope: &Scope) -> String {
    match target.first().map(String::as_str) {
        Some("crate" | "self" | "super") => resolve(target, scope, None),
        Some(head) if scope.locals.contains(head) => {
            let mut path = scope.path.clone();
            path.extend(target.iter().cloned());
            path.join("::")
        }
        _ => target.join("::"),
    }
}

/// Facts about one node that mutators and the generator filter on
#[derive(Debug, Clone, Default)]
pub struct NodeAnnotation {
    pub inside_function: bool,
    pub part_of_signature: bool,
    /// Test-only code, never mutated
    pub excluded: bool,
    pub enclosing_type: Option<Arc<TypeDescriptor>>,
    pub qualified_name: Option<String>,
    /// Qualified name of the innermost named function around the node
    pub function: Option<String>,
}

/// Read-only annotations for every node of one tree
#[derive(Debug)]
pub struct Annotations {
    nodes: Vec<NodeAnnotation>,
}

impl Annotations {
    pub fn get(&self, id: NodeId) -> &NodeAnnotation {
        &self.nodes[id.index()]
    }
}

/// Compute annotations in one pre-order pass.
///
/// `tree` must have parent links; `names` comes from the same tree.
pub fn annotate(tree: &SyntaxTree, names: &QualifiedNames, ctx: &mut RunContext) -> Annotations {
    let mut nodes = vec![NodeAnnotation::default(); tree.len()];

    for id in tree.preorder() {
        let kind = tree.kind(id);
        let mut current = match tree.parent(id) {
            Some(parent) => {
                let inherited = &nodes[parent.index()];
                let parent_kind = tree.kind(parent);
                NodeAnnotation {
                    inside_function: inherited.inside_function
                        || (matches!(parent_kind, NodeKind::Function { .. })
                            && !kind.is_signature_clause()),
                    part_of_signature: inherited.part_of_signature,
                    excluded: inherited.excluded,
                    enclosing_type: inherited.enclosing_type.clone(),
                    qualified_name: None,
                    function: inherited.function.clone(),
                }
            }
            None => NodeAnnotation::default(),
        };

        if kind.is_signature_clause() {
            current.part_of_signature = true;
        }
        if matches!(kind, NodeKind::GenericDefault) {
            current.part_of_signature = false;
        }
        match kind {
            NodeKind::Module { test_only, .. }
            | NodeKind::Function { test_only, .. }
            | NodeKind::Impl { test_only, .. } => {
                current.excluded |= *test_only;
            }
            _ => {}
        }

        current.qualified_name = names.get(id).map(str::to_string);
        match kind {
            NodeKind::Impl { .. } | NodeKind::TypeDecl { .. } => {
                current.enclosing_type = current
                    .qualified_name
                    .as_deref()
                    .and_then(|name| ctx.types.resolve(name, &ctx.symbols));
            }
            NodeKind::Function { name: Some(_), .. } => {
                current.function = current.qualified_name.clone();
            }
            _ => {}
        }

        nodes[id.index()] = current;
    }

    Annotations { nodes }
}
