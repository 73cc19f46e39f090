//! Mutant generation
//!
//! Walks an annotated tree depth-first in source order and asks every enabled
//! operator about every eligible node. Each replacement is rendered,
//! re-parsed as the node's syntactic class, and emitted as a [`Mutant`].

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, warn};

use crate::annotate::{Annotations, NodeAnnotation, TypeDescriptor};
use crate::config::Config;
use crate::error::MutationError;
use crate::mutator::{MutationSite, Mutator};
use crate::syntax::{NodeKind, SyntaxTree};

/// One generated fault. Self-contained: it does not borrow the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mutant {
    pub id: usize,
    pub mutator_id: String,
    pub source_file: PathBuf,
    pub span_start: usize,
    pub span_end: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub original_text: String,
    pub mutated_text: String,
    pub function: Option<String>,
    pub enclosing_type: Option<String>,
}

impl Mutant {
    pub fn location(&self) -> String {
        format!("{}:{}", self.source_file.display(), self.start_line)
    }
}

/// Which operators run, and which types are off limits
#[derive(Debug, Clone, Default)]
pub struct MutatorFilter {
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
    pub excluded_types: Vec<String>,
}

impl MutatorFilter {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.mutators.enabled.clone(),
            disabled: config.mutators.disabled.clone(),
            excluded_types: config.exclude.types.clone(),
        }
    }

    pub fn allows(&self, mutator_id: &str) -> bool {
        (self.enabled.is_empty() || self.enabled.iter().any(|id| id == mutator_id))
            && !self.disabled.iter().any(|id| id == mutator_id)
    }

    /// A type is excluded by its own name or by any trait it derives or implements
    pub fn excludes(&self, ty: &TypeDescriptor) -> bool {
        self.excluded_types
            .iter()
            .any(|name| *name == ty.qualified_name || ty.has_capability(name))
    }
}

#[derive(Debug, Default)]
pub struct GeneratedMutants {
    pub mutants: Vec<Mutant>,
    /// Replacements that did not re-parse; already logged
    pub conflicts: Vec<MutationError>,
}

/// Assigns ids sequentially across every file it is given
pub struct Generator<'a> {
    catalog: &'a [Box<dyn Mutator>],
    filter: &'a MutatorFilter,
    next_id: usize,
}

impl<'a> Generator<'a> {
    pub fn new(catalog: &'a [Box<dyn Mutator>], filter: &'a MutatorFilter) -> Self {
        Self {
            catalog,
            filter,
            next_id: 0,
        }
    }

    pub fn generate(&mut self, tree: &SyntaxTree, annotations: &Annotations) -> GeneratedMutants {
        let mut out = GeneratedMutants::default();
        let active: Vec<&dyn Mutator> = self
            .catalog
            .iter()
            .map(|m| m.as_ref())
            .filter(|m| self.filter.allows(m.id()))
            .collect();

        for node in tree.preorder() {
            let annotation = annotations.get(node);
            if !self.node_eligible(annotation) {
                continue;
            }
            let site = MutationSite { tree, node };

            for mutator in &active {
                if annotation.part_of_signature && mutator.category().is_contract_sensitive() {
                    continue;
                }
                let Some(replacement) = mutator.mutate(&site) else {
                    continue;
                };
                let span = tree.span(node);
                let conflict = |reason: String| MutationError::MutationConflict {
                    mutator: mutator.id().to_string(),
                    file: tree.path().to_path_buf(),
                    line: span.start_line,
                    reason,
                };

                let mutated = tree
                    .render_patched(node, &replacement)
                    .ok_or_else(|| conflict("replacement targets a node outside the match".into()))
                    .and_then(|text| reparse(tree.kind(node), &text).map(|_| text).map_err(conflict));
                let mutated_text = match mutated {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("{err}");
                        out.conflicts.push(err);
                        continue;
                    }
                };

                let mutant = Mutant {
                    id: self.next_id,
                    mutator_id: mutator.id().to_string(),
                    source_file: tree.path().to_path_buf(),
                    span_start: span.start,
                    span_end: span.end,
                    start_line: span.start_line,
                    end_line: span.end_line,
                    original_text: tree.text(node).to_string(),
                    mutated_text,
                    function: annotation.function.clone(),
                    enclosing_type: annotation
                        .enclosing_type
                        .as_ref()
                        .map(|t| t.qualified_name.clone()),
                };
                debug!(
                    id = mutant.id,
                    mutator = %mutant.mutator_id,
                    location = %mutant.location(),
                    "generated mutant"
                );
                self.next_id += 1;
                out.mutants.push(mutant);
            }
        }

        out
    }

    fn node_eligible(&self, annotation: &NodeAnnotation) -> bool {
        annotation.inside_function
            && !annotation.excluded
            && !annotation
                .enclosing_type
                .as_deref()
                .is_some_and(|ty| self.filter.excludes(ty))
    }
}

/// Generate mutants for a single tree, numbering from zero
pub fn generate(
    tree: &SyntaxTree,
    annotations: &Annotations,
    catalog: &[Box<dyn Mutator>],
    filter: &MutatorFilter,
) -> GeneratedMutants {
    Generator::new(catalog, filter).generate(tree, annotations)
}

/// Check that a mutated fragment still parses as what it replaced
fn reparse(kind: &NodeKind, text: &str) -> Result<(), String> {
    let parsed = match kind {
        NodeKind::Expr(_) => syn::parse_str::<syn::Expr>(text).map(drop),
        NodeKind::Block => syn::parse_str::<syn::Block>(text).map(drop),
        // A removed statement renders as nothing, so check it in a block
        NodeKind::Stmt(_) => syn::parse_str::<syn::Block>(&format!("{{{text}}}")).map(drop),
        _ => Ok(()),
    };
    parsed.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{annotate, link_parents, module_path, QualifiedNames};
    use crate::context::RunContext;
    use crate::mutator::{catalog, Category};
    use crate::syntax::Replacement;
    use std::path::Path;

    fn run(source: &str, filter: &MutatorFilter) -> GeneratedMutants {
        run_with(source, filter, &catalog())
    }

    fn run_with(
        source: &str,
        filter: &MutatorFilter,
        mutators: &[Box<dyn Mutator>],
    ) -> GeneratedMutants {
        let mut ctx = RunContext::new();
        let mut tree = SyntaxTree::parse("src/lib.rs", source).unwrap();
        link_parents(&mut tree);
        let names = QualifiedNames::resolve(&tree, &module_path(Path::new("src/lib.rs")), &mut ctx);
        let annotations = annotate(&tree, &names, &mut ctx);
        generate(&tree, &annotations, mutators, filter)
    }

    const SOURCE: &str = r#"
pub fn clamp(value: i32, limit: [u8; 4]) -> i32 {
    if value > 10 {
        return 10;
    }
    value + limit.len() as i32
}

#[cfg(test)]
mod tests {
    #[test]
    fn t() { assert!(1 + 1 == 2); }
}
"#;

    #[test]
    fn test_generation_is_idempotent() {
        let filter = MutatorFilter::default();
        let first = run(SOURCE, &filter);
        let second = run(SOURCE, &filter);
        assert!(!first.mutants.is_empty());
        assert_eq!(first.mutants, second.mutants);
        let ids: Vec<_> = first.mutants.iter().map(|m| m.id).collect();
        assert_eq!(ids, (0..first.mutants.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_signature_literals_are_not_mutated() {
        let result = run(SOURCE, &MutatorFilter::default());
        assert!(result
            .mutants
            .iter()
            .all(|m| m.original_text != "4"));
        let increments: Vec<_> = result
            .mutants
            .iter()
            .filter(|m| m.mutator_id == "IncrementInteger")
            .map(|m| m.mutated_text.as_str())
            .collect();
        assert_eq!(increments, vec!["11", "11"]);
    }

    #[test]
    fn test_mutants_carry_source_positions() {
        let result = run(SOURCE, &MutatorFilter::default());
        let boundary = result
            .mutants
            .iter()
            .find(|m| m.mutator_id == "ConditionalBoundary")
            .unwrap();
        assert_eq!(boundary.original_text, "value > 10");
        assert_eq!(boundary.mutated_text, "value >= 10");
        assert_eq!(boundary.start_line, 3);
        assert_eq!(&SOURCE[boundary.span_start..boundary.span_end], "value > 10");
        assert_eq!(boundary.function.as_deref(), Some("crate::clamp"));
    }

    #[test]
    fn test_filter_enabled_and_disabled() {
        let only_literals = MutatorFilter {
            enabled: vec!["IncrementInteger".into(), "DecrementInteger".into()],
            disabled: vec!["DecrementInteger".into()],
            ..MutatorFilter::default()
        };
        let result = run(SOURCE, &only_literals);
        assert!(result
            .mutants
            .iter()
            .all(|m| m.mutator_id == "IncrementInteger"));
    }

    #[test]
    fn test_excluded_types_are_skipped() {
        let source = r#"
#[derive(Debug)]
struct Generated;
impl Generated { fn f(&self) -> u8 { 1 } }
struct Kept;
impl Kept { fn f(&self) -> u8 { 2 } }
"#;
        let by_name = MutatorFilter {
            excluded_types: vec!["crate::Generated".into()],
            ..MutatorFilter::default()
        };
        let result = run(source, &by_name);
        assert!(result.mutants.iter().all(|m| m.enclosing_type.as_deref() == Some("crate::Kept")));

        let by_capability = MutatorFilter {
            excluded_types: vec!["std::fmt::Debug".into()],
            ..MutatorFilter::default()
        };
        let result = run(source, &by_capability);
        assert!(!result.mutants.is_empty());
        assert!(result.mutants.iter().all(|m| m.original_text != "1"));
    }

    struct Garbage;

    impl Mutator for Garbage {
        fn id(&self) -> &'static str {
            "Garbage"
        }

        fn category(&self) -> Category {
            Category::Removal
        }

        fn mutate(&self, site: &MutationSite<'_>) -> Option<Replacement> {
            match site.tree.kind(site.node) {
                NodeKind::Expr(crate::syntax::ExprKind::Path) => {
                    Some(Replacement::Node("(((".to_string()))
                }
                _ => None,
            }
        }
    }

    #[test]
    fn test_unparsable_mutants_are_dropped() {
        let mutators: Vec<Box<dyn Mutator>> = vec![Box::new(Garbage)];
        let result = run_with("fn f(a: u8) -> u8 { a }", &MutatorFilter::default(), &mutators);
        assert!(result.mutants.is_empty());
        assert_eq!(result.conflicts.len(), 1);
        assert!(matches!(
            result.conflicts[0],
            MutationError::MutationConflict { line: 1, .. }
        ));
    }
}
