//! End-to-end orchestration of a mutation run
//!
//! This module coordinates the mutation testing process:
//! - Restores files left mutated by an interrupted run
//! - Discovers, parses and annotates source files
//! - Generates mutants and selects tests for each
//! - Runs the baseline, then schedules every mutant
//! - Aggregates the records into a report

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::annotate::{self, QualifiedNames};
use crate::config::{Config, SourceConfig};
use crate::context::RunContext;
use crate::coverage::{self, CoverageIndex};
use crate::error::{MutationError, Result};
use crate::generator::{Generator, Mutant, MutatorFilter};
use crate::mutator;
use crate::report::{FileError, MutationReport};
use crate::safety;
use crate::sandbox;
use crate::scheduler::{self, Job, Scheduler};
use crate::selector::{self, TestSelection};
use crate::syntax::SyntaxTree;

/// Upper bound for the baseline run when no `max_duration` is set
const BASELINE_LIMIT: Duration = Duration::from_secs(60 * 60);

/// Everything generated before any test runs
#[derive(Debug, Default)]
pub struct Prepared {
    pub mutants: Vec<Mutant>,
    /// Unmodified text of every parsed file, keyed by root-relative path
    pub originals: HashMap<PathBuf, Arc<str>>,
    pub file_errors: Vec<FileError>,
    /// Mutants dropped because their replacement did not parse
    pub conflicts: usize,
}

/// Root-relative paths of every source file to mutate, sorted
pub fn discover(source: &SourceConfig) -> Result<Vec<PathBuf>> {
    let root = &source.root;
    let mut found = BTreeSet::new();

    for dir in &source.directories {
        let dir = root.join(dir);
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "source directory does not exist");
            continue;
        }
        for entry in WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !sandbox::should_skip(&e.file_name().to_string_lossy())
            })
        {
            let entry = entry.map_err(|e| MutationError::FileReadError {
                file: dir.clone(),
                error: e.to_string(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || !path.extension().is_some_and(|ext| ext == "rs") {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(root) {
                found.insert(relative.to_path_buf());
            }
        }
    }
    found.extend(source.files.iter().map(|file| coverage::normalize(file)));

    Ok(found
        .into_iter()
        .filter(|path| !is_excluded(path, &source.exclude))
        .collect())
}

fn is_excluded(relative: &Path, patterns: &[String]) -> bool {
    let path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    patterns
        .iter()
        .any(|pattern| glob_match::glob_match(pattern, &path))
}

/// Recover, discover, parse, annotate and generate.
///
/// Files that cannot be read or parsed are skipped and recorded, unless
/// `settings.strict` is set.
pub fn prepare(config: &Config, ctx: &mut RunContext) -> Result<Prepared> {
    let root = &config.source.root;
    for restored in safety::recover(root)? {
        warn!(file = %restored.display(), "restored from backup");
    }

    let files = discover(&config.source)?;
    info!(files = files.len(), "discovered source files");

    let mut prepared = Prepared::default();
    let mut trees = Vec::with_capacity(files.len());
    for relative in files {
        let read = std::fs::read_to_string(root.join(&relative)).map_err(|e| {
            MutationError::FileReadError {
                file: relative.clone(),
                error: e.to_string(),
            }
        });
        let parsed = read.and_then(|source| SyntaxTree::parse(&relative, source));
        match parsed {
            Ok(mut tree) => {
                annotate::link_parents(&mut tree);
                trees.push(tree);
            }
            Err(err) if config.settings.strict => return Err(err),
            Err(err) => {
                warn!("skipping file: {err}");
                prepared.file_errors.push(FileError {
                    file: relative,
                    message: err.to_string(),
                });
            }
        }
    }

    // Every file registers its declarations before any file is annotated,
    // so impls in one file reach types declared in another.
    let names: Vec<QualifiedNames> = trees
        .iter()
        .map(|tree| QualifiedNames::resolve(tree, &annotate::module_path(tree.path()), ctx))
        .collect();

    let catalog = mutator::catalog();
    let filter = MutatorFilter::from_config(config);
    let mut generator = Generator::new(&catalog, &filter);
    for (tree, names) in trees.iter().zip(&names) {
        let annotations = annotate::annotate(tree, names, ctx);
        let generated = generator.generate(tree, &annotations);
        debug!(
            file = %tree.path().display(),
            mutants = generated.mutants.len(),
            "generated mutants"
        );
        prepared.conflicts += generated.conflicts.len();
        prepared.mutants.extend(generated.mutants);
        prepared
            .originals
            .insert(tree.path().to_path_buf(), Arc::from(tree.source()));
    }

    info!(
        mutants = prepared.mutants.len(),
        conflicts = prepared.conflicts,
        skipped_files = prepared.file_errors.len(),
        "generation finished"
    );
    Ok(prepared)
}

/// Coverage index named by the config, resolved against the project root
pub fn load_coverage(config: &Config) -> Result<Option<CoverageIndex>> {
    config
        .coverage
        .path
        .as_ref()
        .map(|path| CoverageIndex::load(&config.source.root.join(path)))
        .transpose()
}

/// Pair every mutant with its tests and timeout
pub fn plan(
    config: &Config,
    mutants: Vec<Mutant>,
    coverage: Option<&CoverageIndex>,
    baseline: Duration,
) -> Vec<Job> {
    mutants
        .into_iter()
        .map(|mutant| {
            let selection = selector::select(coverage, &mutant);
            let expected = selector::expected_duration(&selection, coverage, baseline);
            Job {
                timeout: config.timeout.for_expected(expected),
                mutant,
                selection,
            }
        })
        .collect()
}

/// Background tasks that cancel the run; aborted on drop
struct CancelTriggers(Vec<JoinHandle<()>>);

impl CancelTriggers {
    fn spawn(max_duration: Option<Duration>, cancel: &CancellationToken) -> Self {
        let mut handles = Vec::new();

        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; restoring files and stopping");
                token.cancel();
            }
        }));

        if let Some(limit) = max_duration {
            let token = cancel.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(after = ?limit, "max duration reached; stopping");
                token.cancel();
            }));
        }

        Self(handles)
    }
}

impl Drop for CancelTriggers {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Run the whole pipeline and aggregate the outcome
pub async fn run(config: &Config, ctx: &mut RunContext) -> Result<MutationReport> {
    let started = Instant::now();
    let _triggers = CancelTriggers::spawn(config.settings.max_duration(), &ctx.cancel);

    let prepared = prepare(config, ctx)?;
    let coverage = load_coverage(config)?;
    if coverage.is_none() {
        info!("no coverage index; every mutant runs the whole suite");
    }

    let mut jobs = plan(config, prepared.mutants, coverage.as_ref(), Duration::ZERO);
    let needs_suite = jobs
        .iter()
        .any(|job| !matches!(job.selection, TestSelection::NotCovered));

    if config.settings.baseline && needs_suite {
        info!("running baseline");
        let limit = config.settings.max_duration().unwrap_or(BASELINE_LIMIT);
        let baseline = scheduler::run_baseline(
            &config.runner,
            &config.source.root,
            limit,
            &ctx.cancel,
        )
        .await?;
        info!(duration = ?baseline, "baseline passed");
        for job in &mut jobs {
            if job.selection == TestSelection::All {
                job.timeout = config.timeout.for_expected(baseline);
            }
        }
    }

    let scheduled = Scheduler::new(config, ctx)
        .run(jobs, prepared.originals)
        .await?;
    if scheduled.interrupted {
        warn!(finished = scheduled.records.len(), "run was interrupted");
    }

    Ok(MutationReport::new(
        scheduled.records,
        prepared.file_errors,
        scheduled.interrupted,
        started.elapsed(),
    ))
}
