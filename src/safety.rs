//! Crash-recovery backups
//!
//! Before a mutated file replaces an original, the original is copied to a
//! hidden sibling `.NAME.mutation-score.bak`. The backup is removed once the
//! original is back. A backup found at startup means a previous run died
//! mid-swap, and the original is restored from it.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{MutationError, Result};

pub const BACKUP_SUFFIX: &str = ".mutation-score.bak";

pub fn backup_path(source_file: &Path) -> PathBuf {
    let mut backup = source_file.to_path_buf();
    let name = format!(
        ".{}{}",
        source_file.file_name().unwrap_or_default().to_string_lossy(),
        BACKUP_SUFFIX
    );
    backup.set_file_name(name);
    backup
}

/// Original file a backup belongs to
fn original_path(backup_file: &Path) -> Option<PathBuf> {
    let name = backup_file.file_name()?.to_str()?;
    let original = name.strip_prefix('.')?.strip_suffix(BACKUP_SUFFIX)?;
    Some(backup_file.with_file_name(original))
}

pub fn write_backup(source_file: &Path, original: &str) -> Result<PathBuf> {
    let backup = backup_path(source_file);
    std::fs::write(&backup, original).map_err(|e| MutationError::WriteError {
        file: backup.clone(),
        error: e.to_string(),
    })?;
    Ok(backup)
}

/// Check if a backup file exists from a previous interrupted run
pub fn check_interrupted_run(source_file: &Path) -> Option<PathBuf> {
    let bak = backup_path(source_file);
    bak.exists().then_some(bak)
}

pub fn restore_from_backup(source_file: &Path, backup_file: &Path) -> Result<()> {
    let restore_error = |e: std::io::Error| MutationError::RestorationFailure {
        file: source_file.to_path_buf(),
        error: e.to_string(),
    };
    std::fs::copy(backup_file, source_file).map_err(restore_error)?;
    std::fs::remove_file(backup_file).map_err(restore_error)?;
    Ok(())
}

/// Restore every file under `root` left mutated by an interrupted run.
/// Returns the restored paths.
pub fn recover(root: &Path) -> Result<Vec<PathBuf>> {
    let mut restored = Vec::new();
    let backups = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !crate::sandbox::should_skip(&e.file_name().to_string_lossy())
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_backup(e.path()));

    for entry in backups {
        let Some(original) = original_path(entry.path()) else {
            continue;
        };
        warn!(
            file = %original.display(),
            "restoring file left mutated by an interrupted run"
        );
        restore_from_backup(&original, entry.path())?;
        restored.push(original);
    }
    Ok(restored)
}

fn is_backup(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(BACKUP_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_backup_path_is_hidden_sibling() {
        let backup = backup_path(Path::new("src/net/tcp.rs"));
        assert_eq!(backup, PathBuf::from("src/net/.tcp.rs.mutation-score.bak"));
        assert_eq!(original_path(&backup), Some(PathBuf::from("src/net/tcp.rs")));
    }

    #[test]
    fn test_interrupted_run_is_detected_and_restored() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("lib.rs");
        fs::write(&file, "fn f() -> u8 { 2 }").unwrap();
        assert!(check_interrupted_run(&file).is_none());

        write_backup(&file, "fn f() -> u8 { 1 }").unwrap();
        let backup = check_interrupted_run(&file).unwrap();
        restore_from_backup(&file, &backup).unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "fn f() -> u8 { 1 }");
        assert!(!backup.exists());
    }

    #[test]
    fn test_recover_walks_the_tree() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("src").join("net");
        fs::create_dir_all(&nested).unwrap();
        let a = dir.path().join("src").join("lib.rs");
        let b = nested.join("tcp.rs");
        fs::write(&a, "mutated a").unwrap();
        fs::write(&b, "mutated b").unwrap();
        write_backup(&a, "original a").unwrap();
        write_backup(&b, "original b").unwrap();
        fs::create_dir_all(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target").join("x.rs"), "untouched").unwrap();

        let mut restored = recover(dir.path()).unwrap();
        restored.sort();
        assert_eq!(restored, vec![a.clone(), b.clone()]);
        assert_eq!(fs::read_to_string(&a).unwrap(), "original a");
        assert_eq!(fs::read_to_string(&b).unwrap(), "original b");
        assert!(recover(dir.path()).unwrap().is_empty());
    }
}
