//! CLI for mutation-score

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use mutation_score::{
    load_coverage, prepare, run, selector, Config, MutationError, RunContext,
};

#[derive(Parser)]
#[command(name = "mutation-score")]
#[command(author, version, about = "Mutation testing for Rust with coverage-driven test selection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ProjectArgs {
    /// Path to the config file; defaults apply when it does not exist
    #[arg(short, long, default_value = "mutation-score.yaml")]
    config: PathBuf,

    /// Project directory, overriding `source.root`
    #[arg(short, long)]
    project: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate mutants, run the tests against each and report the score
    Run {
        #[command(flatten)]
        project: ProjectArgs,

        /// Also write every record as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Generate and print mutants without running any tests
    List {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Show example configuration
    Example,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Run { project, json } => {
            init_logging(project.verbose);
            run_mutants(&project, json.as_deref())
        }
        Commands::List { project } => {
            init_logging(project.verbose);
            list_mutants(&project)
        }
        Commands::Example => {
            print_example();
            Ok(ExitCode::SUCCESS)
        }
    };

    outcome.unwrap_or_else(|e| {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        ExitCode::from(2)
    })
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load, override and validate the configuration
fn load_config(args: &ProjectArgs) -> anyhow::Result<Config> {
    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        tracing::info!(
            "no config at '{}', using defaults",
            args.config.display()
        );
        Config::default()
    };
    if let Some(project) = &args.project {
        config.source.root = project.clone();
    }

    if let Err(errors) = config.validate() {
        eprintln!("{}", "Configuration errors found:".red().bold());
        for error in &errors {
            eprintln!("  • {}", error);
        }
        anyhow::bail!("{} configuration error(s)", errors.len());
    }
    Ok(config)
}

fn run_mutants(args: &ProjectArgs, json: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = load_config(args)?;
    let runtime = tokio::runtime::Runtime::new().context("failed to start the async runtime")?;

    let mut ctx = RunContext::new();
    let report = runtime.block_on(run(&config, &mut ctx))?;
    report.print();

    if let Some(path) = json {
        mutation_score::report::write_json(path, &report)?;
        println!("Wrote {}", path.display());
    }

    match report
        .result
        .check_thresholds(config.thresholds.min_msi, config.thresholds.min_covered_msi)
    {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e @ MutationError::ThresholdNotMet { .. }) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            Ok(ExitCode::from(1))
        }
        Err(e) => Err(e.into()),
    }
}

fn list_mutants(args: &ProjectArgs) -> anyhow::Result<ExitCode> {
    let config = load_config(args)?;
    let prepared = prepare(&config, &mut RunContext::new())?;
    let coverage = load_coverage(&config)?;

    for mutant in &prepared.mutants {
        let selection = match selector::select(coverage.as_ref(), mutant) {
            selector::TestSelection::NotCovered => "not covered".red().to_string(),
            selector::TestSelection::All => "all tests".dimmed().to_string(),
            selector::TestSelection::Tests(tests) => format!("{} test(s)", tests.len()),
        };
        println!(
            "{} {} {} [{}]",
            format!("#{}", mutant.id).dimmed(),
            mutant.location(),
            mutant.mutator_id,
            selection
        );
        for line in mutation_score::codegen::diff(&mutant.original_text, &mutant.mutated_text).lines() {
            println!("    {line}");
        }
    }

    println!();
    println!(
        "{} {} mutant(s) in {} file(s)",
        "✓".green().bold(),
        prepared.mutants.len(),
        prepared.originals.len()
    );
    for error in &prepared.file_errors {
        println!("{} {}", "skipped".yellow(), error.message);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_example() {
    let example = r#"# Example mutation-score.yaml configuration file
source:
  root: .
  directories: [src]
  exclude:
    - "src/generated/**"

settings:
  threads: 4           # worker slots; defaults to the number of CPUs
  isolation: shared    # or `sandbox` to give each worker its own copy
  strict: false        # abort on unparsable files instead of skipping them
  baseline: true       # run the unmutated suite first
  max_duration: 1800   # seconds for the whole run

timeout:
  base: 30             # seconds added to every run
  multiplier: 2.0      # times the expected duration of the selected tests

coverage:
  path: coverage.json  # per-line test coverage; without it every mutant runs all tests

runner:
  program: cargo
  args: [test]
  filter_args: ["--", "--exact"]
  stop_on_first_failure: true

thresholds:
  min_msi: 0.8
  min_covered_msi: 0.9

mutators:
  disabled: [StringLiteral]

exclude:
  types:
    - "crate::generated::Model"
    - "serde::Serialize"  # anything deriving or implementing this trait
"#;

    println!("{}", example);
}
