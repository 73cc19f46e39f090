//! Error types for mutation testing

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during mutation testing
#[derive(Debug, Error)]
pub enum MutationError {
    /// Source file couldn't be parsed as valid Rust
    #[error("Failed to parse '{}' at line {line}, column {column}: {message}", file.display())]
    Parse {
        file: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    /// A mutator produced a fragment that no longer parses
    #[error("Mutator '{mutator}' produced invalid code at {}:{line}: {reason}", file.display())]
    MutationConflict {
        mutator: String,
        file: PathBuf,
        line: usize,
        reason: String,
    },

    /// The external test runner could not be launched
    #[error("Failed to start test runner '{program}': {error}")]
    RunnerStart { program: String, error: String },

    /// The test run exceeded its wall-clock budget
    #[error("Test run exceeded its timeout of {:.1}s", after.as_secs_f64())]
    TimeoutExceeded { after: Duration },

    /// A mutated file could not be put back; the working tree is unsafe
    #[error("Failed to restore '{}' after mutation: {error}", file.display())]
    RestorationFailure { file: PathBuf, error: String },

    /// The unmutated test suite does not pass
    #[error("Baseline test run failed; fix the test suite before mutation testing\n{output}")]
    BaselineFailed { output: String },

    /// Scores are below the configured minimums
    #[error("{}", format_threshold_failures(failures))]
    ThresholdNotMet { failures: Vec<ThresholdFailure> },

    /// Failed to read source file
    #[error("Failed to read file '{}': {error}", file.display())]
    FileReadError { file: PathBuf, error: String },

    /// Failed to write a staged or restored file
    #[error("Failed to write file '{}': {error}", file.display())]
    WriteError { file: PathBuf, error: String },

    /// Coverage index couldn't be loaded
    #[error("Failed to load coverage index '{}': {error}", file.display())]
    Coverage { file: PathBuf, error: String },

    /// Per-worker sandbox couldn't be prepared
    #[error("Failed to prepare sandbox: {error}")]
    Sandbox { error: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

/// A score that fell below its configured minimum
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdFailure {
    pub metric: &'static str,
    pub actual: f64,
    pub minimum: f64,
}

fn format_threshold_failures(failures: &[ThresholdFailure]) -> String {
    failures
        .iter()
        .map(|f| {
            format!(
                "{} {:.2}% is below the required minimum of {:.2}%",
                f.metric,
                f.actual * 100.0,
                f.minimum * 100.0
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for mutation operations
pub type Result<T> = std::result::Result<T, MutationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_message_lists_every_metric() {
        let err = MutationError::ThresholdNotMet {
            failures: vec![
                ThresholdFailure {
                    metric: "MSI",
                    actual: 0.5,
                    minimum: 0.8,
                },
                ThresholdFailure {
                    metric: "Covered MSI",
                    actual: 0.7,
                    minimum: 0.9,
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("MSI 50.00% is below the required minimum of 80.00%"));
        assert!(message.contains("Covered MSI 70.00%"));
    }

    #[test]
    fn test_parse_error_carries_position() {
        let err = MutationError::Parse {
            file: PathBuf::from("src/lib.rs"),
            line: 3,
            column: 7,
            message: "expected `;`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to parse 'src/lib.rs' at line 3, column 7: expected `;`"
        );
    }
}
