//! Mutant materialization
//!
//! Turns a [`Mutant`] back into a full source file by splicing its rendered
//! text over the original bytes, and stages the result next to the target so
//! it can be renamed into place atomically.

use std::io::Write;
use std::path::Path;

use similar::{ChangeTag, TextDiff};
use tempfile::NamedTempFile;

use crate::error::{MutationError, Result};
use crate::generator::Mutant;

/// Full text of the mutated file.
///
/// Everything outside the mutant's span is copied from `original` untouched.
pub fn splice(original: &str, mutant: &Mutant) -> Result<String> {
    let in_bounds = mutant.span_start <= mutant.span_end
        && mutant.span_end <= original.len()
        && original.is_char_boundary(mutant.span_start)
        && original.is_char_boundary(mutant.span_end);
    if !in_bounds || original[mutant.span_start..mutant.span_end] != mutant.original_text {
        return Err(MutationError::MutationConflict {
            mutator: mutant.mutator_id.clone(),
            file: mutant.source_file.clone(),
            line: mutant.start_line,
            reason: "source changed since the mutant was generated".to_string(),
        });
    }

    let mut out = String::with_capacity(original.len() + mutant.mutated_text.len());
    out.push_str(&original[..mutant.span_start]);
    out.push_str(&mutant.mutated_text);
    out.push_str(&original[mutant.span_end..]);
    Ok(out)
}

/// Write `contents` to a temp file in the same directory as `target`, so a
/// later rename stays on one filesystem
pub fn stage(target: &Path, contents: &str) -> Result<NamedTempFile> {
    let write_error = |e: std::io::Error| MutationError::WriteError {
        file: target.to_path_buf(),
        error: e.to_string(),
    };
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::Builder::new()
        .prefix(".mutation-score-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_error)?;
    // tempfile creates 0600; the rename must not change the target's mode
    if let Ok(meta) = std::fs::metadata(target) {
        staged
            .as_file()
            .set_permissions(meta.permissions())
            .map_err(write_error)?;
    }
    staged.write_all(contents.as_bytes()).map_err(write_error)?;
    staged.as_file().sync_all().map_err(write_error)?;
    Ok(staged)
}

/// Unified-style line diff between two versions of a file
pub fn diff(original: &str, mutated: &str) -> String {
    let mut out = String::new();
    for change in TextDiff::from_lines(original, mutated).iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "- ",
            ChangeTag::Insert => "+ ",
            ChangeTag::Equal => continue,
        };
        out.push_str(sign);
        out.push_str(change.value().trim_end_matches(['\r', '\n']));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn mutant(original: &str, start: usize, replacement: &str) -> Mutant {
        Mutant {
            id: 3,
            mutator_id: "ArithmeticOperator".to_string(),
            source_file: PathBuf::from("src/lib.rs"),
            span_start: start,
            span_end: start + original.len(),
            start_line: 2,
            end_line: 2,
            original_text: original.to_string(),
            mutated_text: replacement.to_string(),
            function: Some("crate::add".to_string()),
            enclosing_type: None,
        }
    }

    const SOURCE: &str = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";

    #[test]
    fn test_splice_changes_only_the_span() {
        let start = SOURCE.find("a + b").unwrap();
        let spliced = splice(SOURCE, &mutant("a + b", start, "a - b")).unwrap();
        assert_eq!(spliced, "fn add(a: i32, b: i32) -> i32 {\n    a - b\n}\n");
    }

    #[test]
    fn test_splice_detects_stale_source() {
        let start = SOURCE.find("a + b").unwrap();
        let edited = SOURCE.replace("a + b", "b + a");
        assert!(matches!(
            splice(&edited, &mutant("a + b", start, "a - b")),
            Err(MutationError::MutationConflict { .. })
        ));
        assert!(splice("fn", &mutant("a + b", start, "a - b")).is_err());
    }

    #[test]
    fn test_stage_writes_sibling_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("lib.rs");
        std::fs::write(&target, SOURCE).unwrap();

        let staged = stage(&target, "fn main() {}\n").unwrap();
        assert_eq!(staged.path().parent(), Some(dir.path()));
        assert_eq!(std::fs::read_to_string(staged.path()).unwrap(), "fn main() {}\n");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), SOURCE);
    }

    #[test]
    fn test_diff_shows_changed_lines() {
        let mutated = SOURCE.replace("a + b", "a - b");
        assert_eq!(diff(SOURCE, &mutated), "-     a + b\n+     a - b\n");
        assert_eq!(diff(SOURCE, SOURCE), "");
    }
}
