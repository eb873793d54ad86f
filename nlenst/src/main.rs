//! Nlenst CLI - the NumaLens launcher.
//!
//! This is the main entry point for the nlenst CLI application.
//! It uses clap for argument parsing and dispatches to appropriate
//! command handlers based on user input.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{
    explain::{run_explain, ExplainArgs},
    run::{run_launch, RunArgs},
};
use error::{NlenstError, Result};

/// Nlenst - launcher and report reader for NumaLens
///
/// Nlenst launches target binaries under the NumaLens preload runtime and
/// pretty-prints the JSON reports those runs save.
#[derive(Parser, Debug)]
#[command(name = "nlenst")]
#[command(author = "NumaLens Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Launch binaries under the NumaLens profiler", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, env = "NLENST_VERBOSE")]
    verbose: bool,

    /// Disable color output
    #[arg(long, global = true, env = "NLENST_NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the nlenst CLI.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch a binary under the profiler
    ///
    /// Assembles the NUMAPERF_* environment from the given flags, preloads
    /// the runtime library, and execs the target with its arguments.
    Run(RunCommand),

    /// Pretty-print a saved JSON report
    ///
    /// Summarizes the object, page, site, and lock sections of a report
    /// produced by a run with --json.
    Explain(ExplainCommand),
}

/// Arguments for the run subcommand.
#[derive(Parser, Debug)]
struct RunCommand {
    /// Path to the preload runtime library (default: NLENST_RUNTIME or
    /// libnlens.so next to this binary)
    #[arg(short, long)]
    runtime: Option<PathBuf>,

    /// Foreign accesses before a page escalates
    #[arg(long)]
    page_threshold: Option<u64>,

    /// Writer transitions before a cache line escalates
    #[arg(long)]
    cache_threshold: Option<u32>,

    /// Objects kept in the final report
    #[arg(long)]
    top_objects: Option<usize>,

    /// Cache lines reported per object
    #[arg(long)]
    top_cache_lines: Option<usize>,

    /// Emit the report as JSON
    #[arg(short, long)]
    json: bool,

    /// File descriptor the report is written to (default: stderr)
    #[arg(long)]
    report_fd: Option<i32>,

    /// The target binary and its arguments
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

/// Arguments for the explain subcommand.
#[derive(Parser, Debug)]
struct ExplainCommand {
    /// Path to the saved JSON report
    #[arg(required = true)]
    input: PathBuf,

    /// Entries shown per section
    #[arg(short, long)]
    top: Option<usize>,
}

/// Main entry point for the nlenst CLI.
///
/// Parses command-line arguments, initializes logging, and dispatches to
/// the appropriate command handler. The run command forwards the target's
/// exit code.
fn main() {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.verbose, cli.no_color) {
        eprintln!("nlenst: {err}");
        std::process::exit(2);
    }

    match execute_command(cli.command, cli.verbose) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nlenst: {err}");
            std::process::exit(2);
        }
    }
}

/// Initialize the logging system.
fn init_logging(verbose: bool, no_color: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let subscriber = fmt::layer()
        .with_ansi(!no_color)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(subscriber)
        .try_init()
        .map_err(|e| NlenstError::Config(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Execute the selected command, returning the process exit code.
fn execute_command(command: Commands, verbose: bool) -> Result<i32> {
    match command {
        Commands::Run(args) => execute_run(args, verbose),
        Commands::Explain(args) => execute_explain(args, verbose).map(|()| 0),
    }
}

/// Execute the run command.
fn execute_run(args: RunCommand, verbose: bool) -> Result<i32> {
    let run_args = RunArgs {
        verbose,
        runtime: args.runtime,
        page_threshold: args.page_threshold,
        cache_threshold: args.cache_threshold,
        top_objects: args.top_objects,
        top_cache_lines: args.top_cache_lines,
        json: args.json,
        report_fd: args.report_fd,
        command: args.command,
    };
    run_launch(run_args)
}

/// Execute the explain command.
fn execute_explain(args: ExplainCommand, verbose: bool) -> Result<()> {
    let explain_args = ExplainArgs {
        verbose,
        input: args.input,
        top: args.top,
    };
    run_explain(explain_args)
}
