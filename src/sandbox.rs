//! Per-worker project copies
//!
//! In sandbox isolation every worker slot gets its own filtered copy of the
//! project, so concurrent mutants in different files of one crate never
//! build against each other's changes.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use tracing::debug;

use crate::error::{MutationError, Result};
use crate::safety::BACKUP_SUFFIX;

const SKIP_NAMES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "target",
    "node_modules",
    ".idea",
    ".vscode",
];

pub fn should_skip(name: &str) -> bool {
    SKIP_NAMES.contains(&name) || name.ends_with(BACKUP_SUFFIX)
}

fn copy_dir_filtered(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if should_skip(&name.to_string_lossy()) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let ft = entry.file_type()?;
        if ft.is_dir() {
            copy_dir_filtered(&src_path, &dst_path)?;
        } else if ft.is_file() {
            fs::copy(&src_path, &dst_path)?;
        }
        // Symlinks and special files are left out
    }
    Ok(())
}

/// A private copy of the project, deleted on drop
#[derive(Debug)]
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    /// Copy `project_root` into a fresh temp directory
    pub fn create(project_root: &Path, slot: usize) -> Result<Self> {
        let sandbox_error = |e: std::io::Error| MutationError::Sandbox {
            error: format!(
                "failed to copy '{}' for worker {slot}: {e}",
                project_root.display()
            ),
        };
        let dir = tempfile::Builder::new()
            .prefix(&format!("mutation-score-{slot}-"))
            .tempdir()
            .map_err(sandbox_error)?;
        copy_dir_filtered(project_root, dir.path()).map_err(sandbox_error)?;
        debug!(slot, path = %dir.path().display(), "created sandbox");
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_skips_build_output_and_vcs() {
        let src_dir = TempDir::new().unwrap();
        let src = src_dir.path();
        fs::create_dir_all(src.join("src").join("net")).unwrap();
        fs::write(src.join("Cargo.toml"), "[package]").unwrap();
        fs::write(src.join("src").join("net").join("tcp.rs"), "fn f() {}").unwrap();
        fs::write(src.join("src").join(".lib.rs.mutation-score.bak"), "old").unwrap();
        for skipped in [".git", "target"] {
            fs::create_dir(src.join(skipped)).unwrap();
            fs::write(src.join(skipped).join("file"), "data").unwrap();
        }

        let sandbox = Sandbox::create(src, 0).unwrap();
        assert_eq!(
            fs::read_to_string(sandbox.root().join("src/net/tcp.rs")).unwrap(),
            "fn f() {}"
        );
        assert!(sandbox.root().join("Cargo.toml").exists());
        assert!(!sandbox.root().join(".git").exists());
        assert!(!sandbox.root().join("target").exists());
        assert!(!sandbox.root().join("src/.lib.rs.mutation-score.bak").exists());
    }

    #[test]
    fn test_sandbox_is_removed_on_drop() {
        let src_dir = TempDir::new().unwrap();
        fs::write(src_dir.path().join("a.rs"), "").unwrap();
        let sandbox = Sandbox::create(src_dir.path(), 1).unwrap();
        let root = sandbox.root().to_path_buf();
        assert!(root.exists());
        drop(sandbox);
        assert!(!root.exists());
    }

    #[test]
    fn test_should_skip() {
        assert!(should_skip(".git"));
        assert!(should_skip("target"));
        assert!(should_skip(".main.rs.mutation-score.bak"));
        assert!(!should_skip("src"));
        assert!(!should_skip("Cargo.toml"));
    }
}
