//! Configuration file parsing for mutation testing

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MutationError;

/// Top-level configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub coverage: CoverageConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub mutators: MutatorsConfig,
    #[serde(default)]
    pub exclude: ExcludeConfig,
}

/// Which files are mutated
#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    /// Project root; the runner is started here
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Directories searched for `.rs` files, relative to the root
    #[serde(default = "default_directories")]
    pub directories: Vec<PathBuf>,
    /// Individual files, added on top of the directory scan
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Glob patterns matched against root-relative paths
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            directories: default_directories(),
            files: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_directories() -> Vec<PathBuf> {
    vec![PathBuf::from("src")]
}

/// Where mutated files are swapped in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Mutate the project tree in place
    #[default]
    Shared,
    /// Give each worker its own copy of the project
    Sandbox,
}

/// Global settings for a run
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Worker slots; defaults to the available parallelism
    #[serde(default)]
    pub threads: Option<usize>,
    /// Abort on the first unparsable file instead of skipping it
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub isolation: Isolation,
    /// Wall-clock budget for the whole run, in seconds
    #[serde(default)]
    pub max_duration: Option<u64>,
    /// Run the unmutated suite before mutating
    #[serde(default = "default_true")]
    pub baseline: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: None,
            strict: false,
            isolation: Isolation::default(),
            max_duration: None,
            baseline: default_true(),
        }
    }
}

impl Settings {
    pub fn worker_count(&self) -> usize {
        self.threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration.map(Duration::from_secs)
    }
}

fn default_true() -> bool {
    true
}

/// Per-mutant timeout: `base + multiplier * expected test duration`
#[derive(Debug, Deserialize)]
pub struct TimeoutConfig {
    /// Seconds added to every run
    #[serde(default = "default_timeout_base")]
    pub base: f64,
    #[serde(default = "default_timeout_multiplier")]
    pub multiplier: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            base: default_timeout_base(),
            multiplier: default_timeout_multiplier(),
        }
    }
}

impl TimeoutConfig {
    pub fn for_expected(&self, expected: Duration) -> Duration {
        Duration::from_secs_f64(self.base + self.multiplier * expected.as_secs_f64())
    }
}

fn default_timeout_base() -> f64 {
    30.0
}

fn default_timeout_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Default)]
pub struct CoverageConfig {
    /// JSON coverage index; without it every mutant runs the whole suite
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// External test command
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Inserted between `args` and the selected test ids
    #[serde(default = "default_filter_args")]
    pub filter_args: Vec<String>,
    /// Stderr substrings that mean the mutant did not build
    #[serde(default = "default_error_patterns")]
    pub error_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub stop_on_first_failure: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            filter_args: default_filter_args(),
            error_patterns: default_error_patterns(),
            stop_on_first_failure: default_true(),
        }
    }
}

fn default_program() -> String {
    "cargo".to_string()
}

fn default_args() -> Vec<String> {
    vec!["test".to_string()]
}

fn default_filter_args() -> Vec<String> {
    vec!["--".to_string(), "--exact".to_string()]
}

fn default_error_patterns() -> Vec<String> {
    vec!["error[E".to_string(), "could not compile".to_string()]
}

/// Minimum scores, as fractions in `0.0..=1.0`
#[derive(Debug, Deserialize, Default)]
pub struct Thresholds {
    #[serde(default)]
    pub min_msi: Option<f64>,
    #[serde(default)]
    pub min_covered_msi: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MutatorsConfig {
    /// Mutator ids to run; empty means all
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub disabled: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExcludeConfig {
    /// Qualified type names or trait names whose code is never mutated
    #[serde(default)]
    pub types: Vec<String>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self, MutationError> {
        let content = std::fs::read_to_string(path).map_err(|e| MutationError::ConfigError {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        Self::from_yaml(&content).map_err(|e| MutationError::ConfigError {
            message: format!("Failed to parse config file '{}': {}", path.display(), e),
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Check everything that can be checked before a run starts
    pub fn validate(&self) -> Result<(), Vec<MutationError>> {
        let mut errors = Vec::new();
        let mut fail = |message: String| errors.push(MutationError::ConfigError { message });

        if !self.source.root.is_dir() {
            fail(format!(
                "source.root '{}' is not a directory",
                self.source.root.display()
            ));
        }
        for file in &self.source.files {
            if !self.source.root.join(file).is_file() {
                fail(format!("source file '{}' does not exist", file.display()));
            }
        }
        if self.settings.threads == Some(0) {
            fail("settings.threads must be at least 1".to_string());
        }
        if self.timeout.base < 0.0 || self.timeout.multiplier < 0.0 {
            fail("timeout.base and timeout.multiplier must not be negative".to_string());
        }
        if self.runner.program.trim().is_empty() {
            fail("runner.program must not be empty".to_string());
        }
        for (name, value) in [
            ("thresholds.min_msi", self.thresholds.min_msi),
            ("thresholds.min_covered_msi", self.thresholds.min_covered_msi),
        ] {
            if value.is_some_and(|v| !(0.0..=1.0).contains(&v)) {
                fail(format!("{name} must be between 0.0 and 1.0"));
            }
        }
        let known = crate::mutator::catalog_ids();
        for id in self.mutators.enabled.iter().chain(&self.mutators.disabled) {
            if !known.contains(&id.as_str()) {
                fail(format!("unknown mutator '{id}'"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
