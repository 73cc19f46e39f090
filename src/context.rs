//! Per-run state shared by the annotator and the scheduler

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::annotate::{SymbolTable, TypeCache};
use crate::swap::FileLocks;

/// Everything that lives exactly as long as one mutation run.
///
/// A fresh context starts with an empty symbol table and type cache, so two
/// runs in the same process never see each other's declarations.
#[derive(Debug, Default)]
pub struct RunContext {
    pub symbols: SymbolTable,
    pub types: TypeCache,
    pub locks: Arc<FileLocks>,
    /// Cancelled by Ctrl-C or `settings.max_duration`; clones go to every worker
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }
}
