//! Per-file locking and atomic file swaps

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tokio::sync::OwnedMutexGuard;
use tracing::{error, warn};

use crate::codegen;
use crate::error::{MutationError, Result};
use crate::safety;

const RESTORE_ATTEMPTS: u32 = 3;
const RESTORE_BACKOFF: Duration = Duration::from_millis(50);

/// One holder's tenure on a file lock
#[derive(Debug, Clone)]
pub struct LockWindow {
    pub path: PathBuf,
    pub mutant_id: usize,
    pub acquired: Instant,
    pub released: Instant,
}

/// One async mutex per canonical path
#[derive(Debug, Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    trace: Option<Mutex<Vec<LockWindow>>>,
}

impl FileLocks {
    /// Locks that also record every acquire/release window
    pub fn with_trace() -> Self {
        Self {
            locks: Mutex::default(),
            trace: Some(Mutex::default()),
        }
    }

    pub async fn acquire(self: &Arc<Self>, path: &Path, mutant_id: usize) -> FileLease {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(path.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        FileLease {
            _guard: guard,
            locks: Arc::clone(self),
            path,
            mutant_id,
            acquired: Instant::now(),
        }
    }

    /// Recorded windows, empty unless built with [`FileLocks::with_trace`]
    pub fn trace(&self) -> Vec<LockWindow> {
        self.trace
            .as_ref()
            .map(|t| t.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default()
    }
}

/// Held while a mutant owns a file; released on drop
#[derive(Debug)]
pub struct FileLease {
    _guard: OwnedMutexGuard<()>,
    locks: Arc<FileLocks>,
    path: PathBuf,
    mutant_id: usize,
    acquired: Instant,
}

impl Drop for FileLease {
    fn drop(&mut self) {
        // Runs before `_guard` is dropped, so the window closes before the
        // next holder can start.
        if let Some(trace) = &self.locks.trace {
            trace
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(LockWindow {
                    path: self.path.clone(),
                    mutant_id: self.mutant_id,
                    acquired: self.acquired,
                    released: Instant::now(),
                });
        }
    }
}

/// Replace `target` with `contents` through a sibling temp file and a rename
pub fn write_atomic(target: &Path, contents: &str) -> Result<()> {
    let staged = codegen::stage(target, contents)?;
    staged
        .persist(target)
        .map(drop)
        .map_err(|e| MutationError::WriteError {
            file: target.to_path_buf(),
            error: e.error.to_string(),
        })
}

/// A mutated file swapped in over its original.
///
/// `restore` puts the original back, retrying with a backoff. If it is never
/// called, drop makes one last attempt.
#[derive(Debug)]
pub struct SwapGuard {
    target: PathBuf,
    original: Arc<str>,
    backup: PathBuf,
    restored: bool,
}

impl SwapGuard {
    /// Back up the original, then rename `staged` over `target`
    pub fn install(target: &Path, original: Arc<str>, staged: NamedTempFile) -> Result<Self> {
        let backup = safety::write_backup(target, &original)?;
        if let Err(e) = staged.persist(target) {
            let _ = std::fs::remove_file(&backup);
            return Err(MutationError::WriteError {
                file: target.to_path_buf(),
                error: e.error.to_string(),
            });
        }
        Ok(Self {
            target: target.to_path_buf(),
            original,
            backup,
            restored: false,
        })
    }

    pub async fn restore(mut self) -> Result<()> {
        let mut last_error = String::new();
        for attempt in 1..=RESTORE_ATTEMPTS {
            match self.try_restore() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(file = %self.target.display(), attempt, "restore failed: {e}");
                    last_error = e.to_string();
                    if attempt < RESTORE_ATTEMPTS {
                        tokio::time::sleep(RESTORE_BACKOFF * attempt).await;
                    }
                }
            }
        }
        Err(MutationError::RestorationFailure {
            file: self.target.clone(),
            error: last_error,
        })
    }

    fn try_restore(&mut self) -> Result<()> {
        write_atomic(&self.target, &self.original)?;
        self.restored = true;
        if let Err(e) = std::fs::remove_file(&self.backup) {
            warn!(backup = %self.backup.display(), "failed to remove backup: {e}");
        }
        Ok(())
    }
}

impl Drop for SwapGuard {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = self.try_restore() {
            error!(
                file = %self.target.display(),
                "{e}; the original is kept at '{}'",
                self.backup.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const ORIGINAL: &str = "fn f() -> u8 {\r\n    1 + 1\r\n}\r\n";

    fn swap_in(dir: &TempDir, mutated: &str) -> (PathBuf, SwapGuard) {
        let target = dir.path().join("lib.rs");
        fs::write(&target, ORIGINAL).unwrap();
        let staged = codegen::stage(&target, mutated).unwrap();
        let guard = SwapGuard::install(&target, Arc::from(ORIGINAL), staged).unwrap();
        (target, guard)
    }

    #[tokio::test]
    async fn test_install_and_restore() {
        let dir = TempDir::new().unwrap();
        let (target, guard) = swap_in(&dir, "fn f() -> u8 { 1 - 1 }");
        assert_eq!(fs::read_to_string(&target).unwrap(), "fn f() -> u8 { 1 - 1 }");
        assert!(safety::check_interrupted_run(&target).is_some());

        guard.restore().await.unwrap();
        assert_eq!(fs::read(&target).unwrap(), ORIGINAL.as_bytes());
        assert!(safety::check_interrupted_run(&target).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_swap_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib.rs");
        fs::write(&target, ORIGINAL).unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o644)).unwrap();
        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;

        let staged = codegen::stage(&target, "mutated").unwrap();
        let guard = SwapGuard::install(&target, Arc::from(ORIGINAL), staged).unwrap();
        assert_eq!(mode(&target), 0o644);

        guard.restore().await.unwrap();
        assert_eq!(mode(&target), 0o644);
        assert_eq!(fs::read_to_string(&target).unwrap(), ORIGINAL);
    }

    #[test]
    fn test_drop_restores() {
        let dir = TempDir::new().unwrap();
        let (target, guard) = swap_in(&dir, "mutated");
        drop(guard);
        assert_eq!(fs::read_to_string(&target).unwrap(), ORIGINAL);
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_lock_windows_do_not_overlap() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib.rs");
        fs::write(&target, ORIGINAL).unwrap();
        let locks = Arc::new(FileLocks::with_trace());

        let mut tasks = tokio::task::JoinSet::new();
        for id in 0..6 {
            let locks = Arc::clone(&locks);
            let target = target.clone();
            tasks.spawn(async move {
                let _lease = locks.acquire(&target, id).await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let mut windows = locks.trace();
        assert_eq!(windows.len(), 6);
        windows.sort_by_key(|w| w.acquired);
        for pair in windows.windows(2) {
            assert!(pair[0].released <= pair[1].acquired);
        }
    }

    #[tokio::test]
    async fn test_different_files_do_not_block() {
        let dir = TempDir::new().unwrap();
        let locks = Arc::new(FileLocks::default());
        let a = locks.acquire(&dir.path().join("a.rs"), 0).await;
        let b = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire(&dir.path().join("b.rs"), 1),
        )
        .await;
        assert!(b.is_ok());
        drop(a);
        assert!(locks.trace().is_empty());
    }
}
