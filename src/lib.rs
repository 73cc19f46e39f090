//! Mutation testing for Rust
//!
//! This library parses Rust sources into an annotated syntax tree, applies a
//! catalog of mutation operators to generate mutants, and runs the tests that
//! cover each mutant in a bounded worker pool. The result is a Mutation Score
//! Indicator (MSI): the share of mutants the test suite detects.
//!
//! # Example Configuration
//!
//! ```yaml
//! source:
//!   directories: [src]
//! coverage:
//!   path: coverage.json
//! thresholds:
//!   min_msi: 0.8
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use mutation_score::{run, Config, RunContext};
//! use std::path::Path;
//!
//! # async fn example() -> mutation_score::Result<()> {
//! let config = Config::load(Path::new("mutation-score.yaml"))?;
//! let report = run(&config, &mut RunContext::new()).await?;
//! report.print();
//! report.result.check_thresholds(config.thresholds.min_msi, None)?;
//! # Ok(())
//! # }
//! ```

pub mod annotate;
pub mod codegen;
pub mod config;
pub mod context;
pub mod coverage;
pub mod error;
pub mod generator;
pub mod mutator;
pub mod report;
pub mod runner;
pub mod safety;
pub mod sandbox;
pub mod scheduler;
pub mod selector;
pub mod swap;
pub mod syntax;

// Re-export main types at crate root
pub use config::{Config, Settings};
pub use context::RunContext;
pub use error::{MutationError, Result};
pub use generator::Mutant;
pub use report::{MutantOutcome, MutantRecord, MutationReport, RunResult};
pub use runner::{discover, load_coverage, prepare, run, Prepared};
pub use syntax::SyntaxTree;
pub use tokio_util::sync::CancellationToken;
