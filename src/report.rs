//! Result aggregation and reporting
//!
//! Collects per-mutant records into scores, checks them against the
//! configured minimums, and renders them for people (console) and tools (JSON).

use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codegen;
use crate::error::{MutationError, Result, ThresholdFailure};
use crate::generator::Mutant;

/// Terminal state of one mutant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutantOutcome {
    /// A selected test failed
    Killed,
    /// Every selected test passed
    Escaped,
    /// The run exceeded its timeout; counted as killed
    TimedOut,
    /// The mutant could not be evaluated (build failure, runner failure)
    Errored,
    /// No test covers the mutated lines
    NotCovered,
}

/// Everything known about one mutant after it ran
#[derive(Debug, Clone, Serialize)]
pub struct MutantRecord {
    pub mutant: Mutant,
    pub outcome: MutantOutcome,
    /// Tests that were selected; empty when the whole suite ran
    pub tests: Vec<String>,
    pub killing_test: Option<String>,
    pub duration_ms: u64,
    pub details: Option<String>,
}

impl MutantRecord {
    pub fn not_covered(mutant: Mutant) -> Self {
        Self {
            mutant,
            outcome: MutantOutcome::NotCovered,
            tests: Vec::new(),
            killing_test: None,
            duration_ms: 0,
            details: None,
        }
    }
}

/// A source file that was skipped
#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub file: PathBuf,
    pub message: String,
}

/// Counts and scores for a whole run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunResult {
    pub killed: usize,
    pub escaped: usize,
    pub timed_out: usize,
    pub errored: usize,
    pub not_covered: usize,
    pub msi: f64,
    pub covered_msi: f64,
    /// Files skipped because they could not be read or parsed
    pub file_errors: Vec<PathBuf>,
    pub interrupted: bool,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl RunResult {
    pub fn from_records(records: &[MutantRecord]) -> Self {
        let mut result = Self::default();
        for record in records {
            match record.outcome {
                MutantOutcome::Killed => result.killed += 1,
                MutantOutcome::Escaped => result.escaped += 1,
                MutantOutcome::TimedOut => result.timed_out += 1,
                MutantOutcome::Errored => result.errored += 1,
                MutantOutcome::NotCovered => result.not_covered += 1,
            }
        }
        let detected = result.killed + result.timed_out;
        result.msi = ratio(detected, detected + result.escaped + result.not_covered);
        result.covered_msi = ratio(detected, detected + result.escaped);
        result
    }

    pub fn total(&self) -> usize {
        self.killed + self.escaped + self.timed_out + self.errored + self.not_covered
    }

    /// Mutants that count towards the MSI
    pub fn scored(&self) -> usize {
        self.total() - self.errored
    }

    /// Fail when a score is below its minimum. A run with nothing scored
    /// passes, since there is nothing to judge.
    pub fn check_thresholds(&self, min_msi: Option<f64>, min_covered_msi: Option<f64>) -> Result<()> {
        if self.scored() == 0 {
            return Ok(());
        }
        let failures: Vec<ThresholdFailure> = [
            ("MSI", self.msi, min_msi),
            ("Covered MSI", self.covered_msi, min_covered_msi),
        ]
        .into_iter()
        .filter_map(|(metric, actual, minimum)| {
            let minimum = minimum?;
            (actual < minimum).then_some(ThresholdFailure {
                metric,
                actual,
                minimum,
            })
        })
        .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MutationError::ThresholdNotMet { failures })
        }
    }
}

/// Summary report of a mutation run
#[derive(Debug, Serialize)]
pub struct MutationReport {
    pub result: RunResult,
    pub mutants: Vec<MutantRecord>,
    pub file_errors: Vec<FileError>,
    #[serde(skip)]
    pub total_duration: Duration,
}

impl MutationReport {
    /// Aggregate records that may have arrived in any order
    pub fn new(
        mut mutants: Vec<MutantRecord>,
        file_errors: Vec<FileError>,
        interrupted: bool,
        total_duration: Duration,
    ) -> Self {
        mutants.sort_by_key(|r| r.mutant.id);
        let mut result = RunResult::from_records(&mutants);
        result.file_errors = file_errors.iter().map(|e| e.file.clone()).collect();
        result.interrupted = interrupted;
        Self {
            result,
            mutants,
            file_errors,
            total_duration,
        }
    }

    pub fn with_outcome(&self, outcome: MutantOutcome) -> impl Iterator<Item = &MutantRecord> {
        self.mutants.iter().filter(move |r| r.outcome == outcome)
    }

    /// Print the report to stdout
    pub fn print(&self) {
        println!();
        println!("{}", "Mutation Testing Report".bold());
        println!("{}", "=".repeat(60));
        println!();

        for record in &self.mutants {
            let status = match record.outcome {
                MutantOutcome::Killed => "[KILLED]".green().bold(),
                MutantOutcome::TimedOut => "[TIMEOUT]".green().bold(),
                MutantOutcome::Escaped => "[ESCAPED]".red().bold(),
                MutantOutcome::NotCovered => "[NOT COVERED]".red().bold(),
                MutantOutcome::Errored => "[ERROR]".yellow().bold(),
            };
            println!(
                "{} {} {} - {} -> {}",
                status,
                format!("#{}", record.mutant.id).dimmed(),
                record.mutant.mutator_id,
                one_line(&record.mutant.original_text),
                one_line(&record.mutant.mutated_text)
            );
            let function = record.mutant.function.as_deref().unwrap_or("<closure>");
            println!(
                "        {} in '{}'",
                record.mutant.location().dimmed(),
                function
            );
            if let Some(test) = &record.killing_test {
                println!("        killed by {}", test.dimmed());
            }
        }

        let result = &self.result;
        println!();
        println!("{}", "Summary".bold());
        println!("{}", "-".repeat(40));
        println!("Total mutants:     {}", result.total());
        println!(
            "Killed:            {} {}",
            result.killed,
            "(good - tests caught the mutation)".dimmed()
        );
        if result.timed_out > 0 {
            println!("Timed out:         {}", result.timed_out);
        }
        println!(
            "Escaped:           {} {}",
            result.escaped,
            "(bad - tests missed the mutation)".dimmed()
        );
        println!(
            "Not covered:       {} {}",
            result.not_covered,
            "(no test runs this code)".dimmed()
        );
        if result.errored > 0 {
            println!("Errors:            {}", result.errored);
        }
        if !self.file_errors.is_empty() {
            println!("Skipped files:     {}", self.file_errors.len());
        }

        println!();
        println!("MSI:               {}", colored_score(result.msi));
        println!("Covered MSI:       {}", colored_score(result.covered_msi));
        println!(
            "Duration:          {}",
            format_duration(self.total_duration)
        );
        if result.interrupted {
            println!("{}", "Run was interrupted; results are partial".yellow());
        }

        let escaped: Vec<_> = self.with_outcome(MutantOutcome::Escaped).collect();
        if !escaped.is_empty() {
            println!();
            println!("{}", "Escaped Mutants (improve your tests!)".red().bold());
            println!("{}", "-".repeat(40));
            for record in escaped {
                println!(
                    "  #{} {} at {}",
                    record.mutant.id,
                    record.mutant.mutator_id,
                    record.mutant.location()
                );
                for line in codegen::diff(&record.mutant.original_text, &record.mutant.mutated_text).lines() {
                    let line = if line.starts_with('-') {
                        line.red()
                    } else {
                        line.green()
                    };
                    println!("    {line}");
                }
            }
        }

        for error in &self.file_errors {
            println!(
                "{} {}: {}",
                "skipped".yellow(),
                error.file.display(),
                error.message
            );
        }
    }
}

fn colored_score(score: f64) -> colored::ColoredString {
    let text = format!("{:.1}%", score * 100.0);
    if score >= 0.9 {
        text.green().bold()
    } else if score >= 0.7 {
        text.yellow().bold()
    } else {
        text.red().bold()
    }
}

fn one_line(text: &str) -> String {
    let mut lines = text.lines();
    let first = lines.next().unwrap_or_default().trim();
    if lines.next().is_some() {
        format!("{first} ...")
    } else {
        first.to_string()
    }
}

/// Format duration in a human-readable way
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = (secs / 60.0).floor();
        let remaining_secs = secs % 60.0;
        format!("{}m {:.0}s", mins, remaining_secs)
    }
}

/// Write the report as pretty-printed JSON
pub fn write_json(path: &Path, report: &MutationReport) -> Result<()> {
    let write_error = |error: String| MutationError::WriteError {
        file: path.to_path_buf(),
        error,
    };
    let json = serde_json::to_string_pretty(report).map_err(|e| write_error(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| write_error(e.to_string()))
}
