//! Mutant execution
//!
//! A bounded pool of worker slots runs one mutant per slot at a time. Each
//! worker takes the file lock, swaps the mutated file in, runs the selected
//! tests under a timeout, restores the original, and classifies the result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codegen;
use crate::config::{Config, Isolation, RunnerConfig};
use crate::context::RunContext;
use crate::error::{MutationError, Result};
use crate::generator::Mutant;
use crate::report::{MutantOutcome, MutantRecord};
use crate::sandbox::Sandbox;
use crate::selector::TestSelection;
use crate::swap::{FileLocks, SwapGuard};

/// Captured output is cut to this many bytes in records
const MAX_DETAILS_BYTES: usize = 4096;

/// How long to keep reading stderr after the runner is gone
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// A mutant ready to run
#[derive(Debug, Clone)]
pub struct Job {
    pub mutant: Mutant,
    pub selection: TestSelection,
    pub timeout: Duration,
}

/// Permission to run one mutant, plus where to run it
#[derive(Debug)]
struct WorkerSlot {
    index: usize,
    root: PathBuf,
    _sandbox: Option<Sandbox>,
}

/// A slot on loan to one worker. Dropping it, including during a panic,
/// puts the slot back in the pool.
#[derive(Debug)]
struct SlotLease {
    slot: Arc<WorkerSlot>,
    home: mpsc::Sender<Arc<WorkerSlot>>,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        // The channel has room for every slot, so this never fails for lack of space
        let _ = self.home.try_send(Arc::clone(&self.slot));
    }
}

/// Records produced by a scheduling pass
#[derive(Debug, Default)]
pub struct Scheduled {
    pub records: Vec<MutantRecord>,
    /// Cancellation stopped the pass before every job finished
    pub interrupted: bool,
}

#[derive(Debug)]
pub struct Scheduler {
    runner: Arc<RunnerConfig>,
    root: PathBuf,
    workers: usize,
    isolation: Isolation,
    locks: Arc<FileLocks>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(config: &Config, ctx: &RunContext) -> Self {
        Self::with_runner(
            config.runner.clone(),
            &config.source.root,
            config.settings.worker_count(),
            config.settings.isolation,
            ctx,
        )
    }

    pub fn with_runner(
        runner: RunnerConfig,
        root: &Path,
        workers: usize,
        isolation: Isolation,
        ctx: &RunContext,
    ) -> Self {
        Self {
            runner: Arc::new(runner),
            root: root.to_path_buf(),
            workers: workers.max(1),
            isolation,
            locks: Arc::clone(&ctx.locks),
            cancel: ctx.cancel.clone(),
        }
    }

    /// Run every job. `originals` maps each mutated file (root-relative) to
    /// its unmodified text.
    ///
    /// Per-mutant failures become `Errored` records. A file that cannot be
    /// restored stops dispatch, waits for in-flight workers, and fails the
    /// whole pass.
    pub async fn run(
        &self,
        jobs: Vec<Job>,
        originals: HashMap<PathBuf, Arc<str>>,
    ) -> Result<Scheduled> {
        let originals = Arc::new(originals);
        let (slot_tx, mut slot_rx) = mpsc::channel::<Arc<WorkerSlot>>(self.workers);
        for index in 0..self.workers {
            let slot = Arc::new(self.make_slot(index)?);
            // The channel holds exactly `workers` slots
            let _ = slot_tx.send(slot).await;
        }
        info!(
            jobs = jobs.len(),
            workers = self.workers,
            "dispatching mutants"
        );

        let mut running = JoinSet::new();
        let mut scheduled = Scheduled::default();
        let mut fatal: Option<MutationError> = None;
        // Set by a worker that could not restore its file, before its slot returns
        let halt = CancellationToken::new();

        for job in jobs {
            if let TestSelection::NotCovered = job.selection {
                debug!(id = job.mutant.id, "no covering tests");
                scheduled.records.push(MutantRecord::not_covered(job.mutant));
                continue;
            }

            while let Some(joined) = running.try_join_next() {
                collect(joined, &mut scheduled, &mut fatal);
            }
            if fatal.is_some() || halt.is_cancelled() || self.cancel.is_cancelled() {
                break;
            }

            let slot = tokio::select! {
                slot = slot_rx.recv() => slot,
                _ = self.cancel.cancelled() => None,
                _ = halt.cancelled() => None,
            };
            let Some(slot) = slot else {
                break;
            };
            if halt.is_cancelled() {
                break;
            }

            let worker = Worker {
                runner: Arc::clone(&self.runner),
                locks: Arc::clone(&self.locks),
                cancel: self.cancel.clone(),
                originals: Arc::clone(&originals),
            };
            let lease = SlotLease {
                slot,
                home: slot_tx.clone(),
            };
            let halt = halt.clone();
            running.spawn(async move {
                let result = worker.execute(job, &lease.slot).await;
                if result.is_err() {
                    halt.cancel();
                }
                drop(lease);
                result
            });
        }

        while let Some(joined) = running.join_next().await {
            collect(joined, &mut scheduled, &mut fatal);
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        scheduled.interrupted = self.cancel.is_cancelled();
        scheduled.records.sort_by_key(|r| r.mutant.id);
        Ok(scheduled)
    }

    fn make_slot(&self, index: usize) -> Result<WorkerSlot> {
        match self.isolation {
            Isolation::Shared => Ok(WorkerSlot {
                index,
                root: self.root.clone(),
                _sandbox: None,
            }),
            Isolation::Sandbox => {
                let sandbox = Sandbox::create(&self.root, index)?;
                Ok(WorkerSlot {
                    index,
                    root: sandbox.root().to_path_buf(),
                    _sandbox: Some(sandbox),
                })
            }
        }
    }
}

fn collect(
    joined: std::result::Result<Result<Option<MutantRecord>>, tokio::task::JoinError>,
    scheduled: &mut Scheduled,
    fatal: &mut Option<MutationError>,
) {
    match joined {
        Ok(Ok(Some(record))) => scheduled.records.push(record),
        Ok(Ok(None)) => {}
        Ok(Err(err)) => {
            error!("{err}");
            fatal.get_or_insert(err);
        }
        Err(join_error) => error!("worker panicked: {join_error}"),
    }
}

struct Worker {
    runner: Arc<RunnerConfig>,
    locks: Arc<FileLocks>,
    cancel: CancellationToken,
    originals: Arc<HashMap<PathBuf, Arc<str>>>,
}

impl Worker {
    /// `Ok(None)` means the run was cancelled before an outcome was known
    async fn execute(&self, job: Job, slot: &WorkerSlot) -> Result<Option<MutantRecord>> {
        let mutant = &job.mutant;
        let started = Instant::now();
        let target = slot.root.join(&mutant.source_file);
        debug!(id = mutant.id, slot = slot.index, location = %mutant.location(), "running mutant");

        let Some(original) = self.originals.get(&mutant.source_file).cloned() else {
            let err = MutationError::FileReadError {
                file: mutant.source_file.clone(),
                error: "file was not loaded for this run".to_string(),
            };
            return Ok(Some(errored(job, started, err.to_string())));
        };

        let lease = self.locks.acquire(&target, mutant.id).await;
        let guard = match codegen::splice(&original, mutant)
            .and_then(|mutated| codegen::stage(&target, &mutated))
            .and_then(|staged| SwapGuard::install(&target, original, staged))
        {
            Ok(guard) => guard,
            Err(err) => return Ok(Some(errored(job, started, err.to_string()))),
        };

        let output = run_tests(&self.runner, &slot.root, &job.selection, job.timeout, &self.cancel).await;

        guard.restore().await?;
        drop(lease);

        let Some(output) = output else {
            debug!(id = mutant.id, "cancelled");
            return Ok(None);
        };
        let record = classify(job, output, &self.runner.error_patterns, started);
        debug!(id = record.mutant.id, outcome = ?record.outcome, "mutant finished");
        Ok(Some(record))
    }
}

/// How a runner invocation ended
#[derive(Debug)]
pub enum RunStatus {
    Exited { success: bool },
    TimedOut { after: Duration },
    SpawnFailed { error: String },
}

#[derive(Debug)]
pub struct RunOutput {
    pub status: RunStatus,
    /// First test reported as FAILED on stdout
    pub failing_test: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

fn build_command(runner: &RunnerConfig, root: &Path, selection: &TestSelection) -> Command {
    let mut cmd = Command::new(&runner.program);
    cmd.args(&runner.args);
    if let TestSelection::Tests(tests) = selection {
        cmd.args(&runner.filter_args);
        cmd.args(tests);
    }
    cmd.current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// The runner's process group. Test binaries and anything else the runner
/// starts are members, so killing the group leaves nothing running.
#[derive(Debug, Clone, Copy)]
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn kill(self) {
        #[cfg(unix)]
        if let Some(pgid) = self.0.and_then(|pid| i32::try_from(pid).ok()) {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            // ESRCH just means every member already exited
            let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
        }
    }
}

/// Run the test command once. Returns `None` if cancelled.
pub async fn run_tests(
    runner: &RunnerConfig,
    root: &Path,
    selection: &TestSelection,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Option<RunOutput> {
    let mut child = match build_command(runner, root, selection).spawn() {
        Ok(child) => child,
        Err(e) => {
            let error = MutationError::RunnerStart {
                program: runner.program.clone(),
                error: e.to_string(),
            };
            return Some(RunOutput {
                status: RunStatus::SpawnFailed {
                    error: error.to_string(),
                },
                failing_test: None,
                stdout: String::new(),
                stderr: String::new(),
            });
        }
    };

    let group = ProcessGroup(child.id());
    let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(read_all(stderr)));
    let stdout = child.stdout.take();
    let stop_early = runner.stop_on_first_failure;

    let mut failing_test = None;
    let mut captured = String::new();
    let finished = {
        let watch = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    captured.push_str(&line);
                    captured.push('\n');
                    if failing_test.is_none() {
                        failing_test = extract_failing_test(&line);
                        if failing_test.is_some() && stop_early {
                            group.kill();
                            let _ = child.start_kill();
                            break;
                        }
                    }
                }
            }
            child.wait().await
        };
        tokio::select! {
            waited = tokio::time::timeout(timeout, watch) => Some(waited),
            _ = cancel.cancelled() => None,
        }
    };

    // Whatever the runner left behind goes with it, on every path
    group.kill();
    let status = match finished {
        None => {
            let _ = child.kill().await;
            return None;
        }
        Some(Err(_elapsed)) => {
            let _ = child.kill().await;
            debug!("test run timed out after {:?}", timeout);
            RunStatus::TimedOut { after: timeout }
        }
        Some(Ok(Ok(exit))) => RunStatus::Exited {
            success: exit.success(),
        },
        Some(Ok(Err(e))) => RunStatus::SpawnFailed {
            error: e.to_string(),
        },
    };

    let stderr = match stderr_task {
        Some(task) => match tokio::time::timeout(STDERR_GRACE, task).await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        },
        None => String::new(),
    };

    Some(RunOutput {
        status,
        failing_test,
        stdout: captured,
        stderr,
    })
}

async fn read_all(mut stream: impl AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Name of the failing test in a libtest line like `test a::b ... FAILED`
fn extract_failing_test(line: &str) -> Option<String> {
    let line = line.trim();
    if !line.starts_with("test ") || !line.ends_with("FAILED") {
        return None;
    }
    line.split_whitespace().nth(1).map(str::to_string)
}

fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut end = max_bytes;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &output[..end])
}

fn errored(job: Job, started: Instant, details: String) -> MutantRecord {
    warn!(id = job.mutant.id, "{details}");
    MutantRecord {
        tests: job.selection.tests().to_vec(),
        mutant: job.mutant,
        outcome: MutantOutcome::Errored,
        killing_test: None,
        duration_ms: elapsed_ms(started),
        details: Some(details),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn classify(job: Job, output: RunOutput, error_patterns: &[String], started: Instant) -> MutantRecord {
    let combined = || truncate_output(&format!("{}\n{}", output.stdout, output.stderr), MAX_DETAILS_BYTES);
    let (outcome, details) = match &output.status {
        RunStatus::SpawnFailed { error } => (MutantOutcome::Errored, Some(error.clone())),
        RunStatus::TimedOut { after } => (
            MutantOutcome::TimedOut,
            Some(MutationError::TimeoutExceeded { after: *after }.to_string()),
        ),
        RunStatus::Exited { .. } if output.failing_test.is_some() => {
            (MutantOutcome::Killed, Some(combined()))
        }
        RunStatus::Exited { success: true } => (MutantOutcome::Escaped, None),
        RunStatus::Exited { success: false } => {
            if error_patterns.iter().any(|p| output.stderr.contains(p.as_str())) {
                (MutantOutcome::Errored, Some(combined()))
            } else {
                (MutantOutcome::Killed, Some(combined()))
            }
        }
    };

    MutantRecord {
        tests: job.selection.tests().to_vec(),
        mutant: job.mutant,
        outcome,
        killing_test: output.failing_test,
        duration_ms: elapsed_ms(started),
        details,
    }
}

/// Run the unmodified suite once; it must pass before anything is mutated.
/// Returns how long it took.
pub async fn run_baseline(
    runner: &RunnerConfig,
    root: &Path,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<Duration> {
    let started = Instant::now();
    let output = run_tests(runner, root, &TestSelection::All, limit, cancel)
        .await
        .ok_or_else(|| MutationError::BaselineFailed {
            output: "cancelled".to_string(),
        })?;
    match output.status {
        RunStatus::Exited { success: true } => Ok(started.elapsed()),
        RunStatus::SpawnFailed { error } => Err(MutationError::RunnerStart {
            program: runner.program.clone(),
            error,
        }),
        RunStatus::TimedOut { after } => Err(MutationError::TimeoutExceeded { after }),
        RunStatus::Exited { success: false } => Err(MutationError::BaselineFailed {
            output: truncate_output(
                &format!("{}\n{}", output.stdout, output.stderr),
                MAX_DETAILS_BYTES,
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SOURCE: &str = "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), SOURCE).unwrap();
        dir
    }

    fn mutant(id: usize, replacement: &str) -> Mutant {
        let start = SOURCE.find("a + b").unwrap();
        Mutant {
            id,
            mutator_id: "ArithmeticOperator".to_string(),
            source_file: PathBuf::from("src/lib.rs"),
            span_start: start,
            span_end: start + 5,
            start_line: 2,
            end_line: 2,
            original_text: "a + b".to_string(),
            mutated_text: replacement.to_string(),
            function: Some("crate::add".to_string()),
            enclosing_type: None,
        }
    }

    fn job(id: usize, selection: TestSelection) -> Job {
        Job {
            mutant: mutant(id, "a - b"),
            selection,
            timeout: Duration::from_secs(10),
        }
    }

    fn shell(script: &str) -> RunnerConfig {
        RunnerConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            filter_args: Vec::new(),
            ..RunnerConfig::default()
        }
    }

    fn originals() -> HashMap<PathBuf, Arc<str>> {
        HashMap::from([(PathBuf::from("src/lib.rs"), Arc::from(SOURCE))])
    }

    async fn run_jobs(
        script: &str,
        dir: &TempDir,
        jobs: Vec<Job>,
        ctx: &RunContext,
    ) -> Result<Scheduled> {
        Scheduler::with_runner(shell(script), dir.path(), 2, Isolation::Shared, ctx)
            .run(jobs, originals())
            .await
    }

    /// Fails like libtest when the mutated text is visible on disk
    const DETECTS_MUTATION: &str =
        "if grep -q 'a - b' src/lib.rs; then echo 'test tests::adds ... FAILED'; exit 101; fi; exit 0";

    #[tokio::test]
    async fn test_failing_test_kills_mutant() {
        let dir = project();
        let ctx = RunContext::new();
        let scheduled = run_jobs(DETECTS_MUTATION, &dir, vec![job(0, TestSelection::All)], &ctx)
            .await
            .unwrap();

        let record = &scheduled.records[0];
        assert_eq!(record.outcome, MutantOutcome::Killed);
        assert_eq!(record.killing_test.as_deref(), Some("tests::adds"));
        assert_eq!(fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(), SOURCE);
    }

    #[tokio::test]
    async fn test_passing_tests_mean_escaped() {
        let dir = project();
        let ctx = RunContext::new();
        let selection = TestSelection::Tests(vec!["tests::adds".to_string()]);
        let scheduled = run_jobs("test \"$1\" = tests::adds", &dir, vec![job(0, selection)], &ctx)
            .await
            .unwrap();
        assert_eq!(scheduled.records[0].outcome, MutantOutcome::Escaped);
        assert_eq!(scheduled.records[0].tests, vec!["tests::adds"]);
    }

    #[tokio::test]
    async fn test_not_covered_runs_nothing() {
        let dir = project();
        let ctx = RunContext::new();
        let scheduled = run_jobs("touch ran", &dir, vec![job(0, TestSelection::NotCovered)], &ctx)
            .await
            .unwrap();
        assert_eq!(scheduled.records[0].outcome, MutantOutcome::NotCovered);
        assert!(!dir.path().join("ran").exists());
    }

    #[tokio::test]
    async fn test_timeout_restores_file() {
        let dir = project();
        let ctx = RunContext::new();
        let mut slow = job(0, TestSelection::All);
        slow.timeout = Duration::from_millis(200);
        let scheduled = run_jobs("sleep 5", &dir, vec![slow], &ctx).await.unwrap();
        assert_eq!(scheduled.records[0].outcome, MutantOutcome::TimedOut);
        assert_eq!(fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(), SOURCE);
    }

    #[tokio::test]
    async fn test_compile_errors_are_errored() {
        let dir = project();
        let ctx = RunContext::new();
        let script = "echo 'error[E0308]: mismatched types' >&2; exit 101";
        let scheduled = run_jobs(script, &dir, vec![job(0, TestSelection::All)], &ctx)
            .await
            .unwrap();
        assert_eq!(scheduled.records[0].outcome, MutantOutcome::Errored);
    }

    #[tokio::test]
    async fn test_missing_runner_is_errored() {
        let dir = project();
        let ctx = RunContext::new();
        let runner = RunnerConfig {
            program: "/nonexistent/test-runner".to_string(),
            ..RunnerConfig::default()
        };
        let scheduled = Scheduler::with_runner(runner, dir.path(), 1, Isolation::Shared, &ctx)
            .run(vec![job(0, TestSelection::All)], originals())
            .await
            .unwrap();
        let record = &scheduled.records[0];
        assert_eq!(record.outcome, MutantOutcome::Errored);
        assert!(record.details.as_deref().unwrap().contains("/nonexistent/test-runner"));
    }

    #[tokio::test]
    async fn test_same_file_mutants_never_overlap() {
        let dir = project();
        let ctx = RunContext {
            locks: Arc::new(FileLocks::with_trace()),
            ..RunContext::default()
        };
        let jobs = (0..4).map(|id| job(id, TestSelection::All)).collect();
        let scheduled = Scheduler::with_runner(shell(DETECTS_MUTATION), dir.path(), 4, Isolation::Shared, &ctx)
            .run(jobs, originals())
            .await
            .unwrap();

        assert_eq!(scheduled.records.len(), 4);
        assert!(scheduled.records.iter().all(|r| r.outcome == MutantOutcome::Killed));
        let ids: Vec<_> = scheduled.records.iter().map(|r| r.mutant.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        let mut windows = ctx.locks.trace();
        windows.sort_by_key(|w| w.acquired);
        assert_eq!(windows.len(), 4);
        for pair in windows.windows(2) {
            assert!(pair[0].released <= pair[1].acquired);
        }
        assert_eq!(fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(), SOURCE);
    }

    #[tokio::test]
    async fn test_sandbox_leaves_project_untouched() {
        let dir = project();
        let ctx = RunContext::new();
        let script = format!(
            "cmp -s src/lib.rs '{}' && exit 0; echo 'test sandboxed ... FAILED'; exit 1",
            dir.path().join("src/lib.rs").display()
        );
        let scheduled = Scheduler::with_runner(shell(&script), dir.path(), 1, Isolation::Sandbox, &ctx)
            .run(vec![job(0, TestSelection::All)], originals())
            .await
            .unwrap();
        // The sandboxed copy differs from the project file only while mutated
        assert_eq!(scheduled.records[0].outcome, MutantOutcome::Killed);
        assert_eq!(fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(), SOURCE);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_interrupted() {
        let dir = project();
        let ctx = RunContext::new();
        ctx.cancel.cancel();
        let scheduled = run_jobs("exit 0", &dir, vec![job(0, TestSelection::All)], &ctx)
            .await
            .unwrap();
        assert!(scheduled.records.is_empty());
        assert!(scheduled.interrupted);
    }

    #[tokio::test]
    async fn test_unrestorable_file_stops_dispatch() {
        let dir = project();
        let ctx = RunContext::new();
        // Replaces the source directory with a plain file, so nothing can be
        // written back under it
        let script = "echo run >> runs; rm -rf src; touch src";
        let jobs = vec![job(0, TestSelection::All), job(1, TestSelection::All)];
        let result = Scheduler::with_runner(shell(script), dir.path(), 1, Isolation::Shared, &ctx)
            .run(jobs, originals())
            .await;

        match result {
            Err(MutationError::RestorationFailure { file, .. }) => {
                assert!(file.ends_with("src/lib.rs"));
            }
            other => panic!("unexpected scheduling result: {other:?}"),
        }
        assert_eq!(fs::read_to_string(dir.path().join("runs")).unwrap(), "run\n");
    }

    #[tokio::test]
    async fn test_cancel_restores_file_in_flight() {
        let dir = project();
        let ctx = RunContext::new();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let scheduled = run_jobs("sleep 5", &dir, vec![job(0, TestSelection::All)], &ctx)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(scheduled.records.is_empty());
        assert!(scheduled.interrupted);
        let target = dir.path().join("src/lib.rs");
        assert_eq!(fs::read_to_string(&target).unwrap(), SOURCE);
        assert!(crate::safety::check_interrupted_run(&target).is_none());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_every_runner_process() {
        let dir = project();
        let ctx = RunContext::new();
        let mut slow = job(0, TestSelection::All);
        slow.timeout = Duration::from_millis(300);
        let script = "sleep 30 & echo $! > sleeper.pid; wait";
        let scheduled = run_jobs(script, &dir, vec![slow], &ctx).await.unwrap();
        assert_eq!(scheduled.records[0].outcome, MutantOutcome::TimedOut);

        let pid = fs::read_to_string(dir.path().join("sleeper.pid")).unwrap();
        let stat = PathBuf::from(format!("/proc/{}/stat", pid.trim()));
        // Gone, or a zombie waiting for a reaper
        let alive = || {
            fs::read_to_string(&stat)
                .ok()
                .and_then(|s| s.rsplit(')').next().map(|rest| rest.trim_start().to_string()))
                .is_some_and(|rest| !rest.starts_with('Z'))
        };
        let deadline = Instant::now() + Duration::from_secs(2);
        while alive() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive(), "background sleep {} outlived the runner", pid.trim());
    }

    #[tokio::test]
    async fn test_slot_returns_when_worker_panics() {
        let (home, mut pool) = mpsc::channel(1);
        let lease = SlotLease {
            slot: Arc::new(WorkerSlot {
                index: 7,
                root: PathBuf::from("."),
                _sandbox: None,
            }),
            home,
        };
        let joined = tokio::spawn(async move {
            let _lease = lease;
            panic!("worker failed");
        })
        .await;
        assert!(joined.unwrap_err().is_panic());

        let returned = tokio::time::timeout(Duration::from_secs(1), pool.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(returned.index, 7);
    }

    #[tokio::test]
    async fn test_baseline() {
        let dir = project();
        let cancel = CancellationToken::new();
        let limit = Duration::from_secs(10);
        assert!(run_baseline(&shell("exit 0"), dir.path(), limit, &cancel).await.is_ok());
        let failed = run_baseline(&shell("echo broken; exit 1"), dir.path(), limit, &cancel).await;
        match failed {
            Err(MutationError::BaselineFailed { output }) => assert!(output.contains("broken")),
            other => panic!("unexpected baseline result: {other:?}"),
        }
    }

    #[test]
    fn test_extract_failing_test() {
        assert_eq!(
            extract_failing_test("test foo::bar::test_two ... FAILED"),
            Some("foo::bar::test_two".to_string())
        );
        assert_eq!(extract_failing_test("test foo ... ok"), None);
        assert_eq!(extract_failing_test("failures:"), None);
    }

    #[test]
    fn test_truncate_output_respects_char_boundaries() {
        assert_eq!(truncate_output("hello", 100), "hello");
        let truncated = truncate_output("ééé", 3);
        assert_eq!(truncated, "é...(truncated)");
    }
}
