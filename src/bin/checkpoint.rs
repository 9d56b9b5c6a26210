//! # Checkpoint CLI - Fingerprint directory trees and compare them
//!
//! A command-line interface for the checkpoint library.
//!
//! ## Features
//! - Create checkpoints of directory trees, resumable after interruption
//! - Compare an old checkpoint against a new one and report integrity failures
//! - Inspect and normalize checkpoint files
//!
//! ## Usage
//! ```bash
//! # Fingerprint a backup and the live data
//! checkpoint create /mnt/backup/photos photos-backup
//! checkpoint create ~/photos photos-now --medium ssd
//!
//! # Compare them
//! checkpoint check photos-backup photos-now --important-dir ./2019
//!
//! # Show what a checkpoint holds
//! checkpoint inspect photos-now --json
//! ```

use checkpoint::checking::{DEFAULT_MATURITY_MONTHS, DEFAULT_MIN_HASH_MATCH_SIZE};
use checkpoint::checkpoint::CheckpointStats;
use checkpoint::generator::FailureKind;
use checkpoint::hashing::DEFAULT_BUFFER_SIZE;
use checkpoint::progress::ProgressDisplay;
use checkpoint::utils::format_bytes;
use checkpoint::{
    CancellationToken, Check, CheckEngine, CheckOptions, Checkpoint, CheckpointError,
    GeneratorBuilder, NodePath, Result, StorageMedium,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use humantime::format_duration;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Checkpoint CLI - Tamper- and corruption-evident directory fingerprints
#[derive(Parser)]
#[command(name = "checkpoint")]
#[command(version)]
#[command(about = "Fingerprint directory trees and detect corruption and tampering between fingerprints")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a checkpoint of a directory tree
    Create {
        /// Directory to fingerprint
        input: PathBuf,

        /// Checkpoint directory to write
        output: PathBuf,

        /// Worker threads (default: 2 for hdd, 4 per CPU for ssd)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Read buffer size per worker in bytes
        #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
        buffer: usize,

        /// Storage medium of the input directory
        #[arg(long, value_enum, default_value = "ssd")]
        medium: MediumArg,

        /// Minutes between intermediate saves, 0 disables them
        #[arg(long, default_value_t = 15)]
        autosave_minutes: u64,

        /// Start over instead of resuming an incomplete checkpoint
        #[arg(long)]
        no_resume: bool,
    },

    /// Compare an old checkpoint against a new one
    Check {
        /// Old checkpoint, e.g. of a backup
        old: PathBuf,

        /// New checkpoint, e.g. of the live data
        new: PathBuf,

        /// Directory in which any destructive change is reported, like ./docs
        #[arg(long = "important-dir")]
        important_dirs: Vec<String>,

        /// Months without modification after which a node is mature
        #[arg(long, default_value_t = DEFAULT_MATURITY_MONTHS)]
        maturity_months: u32,

        /// Smallest file size matched by content hash alone when detecting moves
        #[arg(long, default_value_t = DEFAULT_MIN_HASH_MATCH_SIZE)]
        min_hash_match_size: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show information about a checkpoint
    Inspect {
        /// Checkpoint directory or file
        checkpoint: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load a checkpoint and save it again
    Rewrite {
        /// Checkpoint directory or file
        checkpoint: PathBuf,

        /// Checkpoint directory to write (defaults to the input's directory)
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum MediumArg {
    /// Solid-state drive
    Ssd,
    /// Rotational hard disk
    Hdd,
}

impl From<MediumArg> for StorageMedium {
    fn from(arg: MediumArg) -> Self {
        match arg {
            MediumArg::Ssd => StorageMedium::SolidState,
            MediumArg::Hdd => StorageMedium::Rotational,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e.user_message());
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` or the verbosity flag
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Main command runner
fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Create {
            input,
            output,
            threads,
            buffer,
            medium,
            autosave_minutes,
            no_resume,
        } => cmd_create(
            input,
            output,
            threads,
            buffer,
            medium.into(),
            autosave_minutes,
            !no_resume,
        ),
        Commands::Check {
            old,
            new,
            important_dirs,
            maturity_months,
            min_hash_match_size,
            json,
        } => cmd_check(
            &old,
            &new,
            &important_dirs,
            maturity_months,
            min_hash_match_size,
            json,
        ),
        Commands::Inspect { checkpoint, json } => cmd_inspect(&checkpoint, json),
        Commands::Rewrite { checkpoint, output } => cmd_rewrite(&checkpoint, output),
    }
}

/// Create a checkpoint
///
/// An incomplete checkpoint already present in `output` is continued unless
/// `resume` is off. SIGINT, SIGTERM and SIGHUP stop the run and save what was
/// computed so far as an incomplete checkpoint.
fn cmd_create(
    input: PathBuf,
    output: PathBuf,
    threads: Option<usize>,
    buffer: usize,
    medium: StorageMedium,
    autosave_minutes: u64,
    resume: bool,
) -> Result<ExitCode> {
    let token = CancellationToken::new();
    watch_signals(token.clone());

    let display = Arc::new(ProgressDisplay::for_stderr());
    let autosave = (autosave_minutes > 0).then(|| Duration::from_secs(autosave_minutes * 60));

    let mut builder = GeneratorBuilder::new()
        .medium(medium)
        .buffer_size(buffer)
        .autosave_interval(autosave)
        .resume(resume)
        .progress_callback(display.callback())
        .cancellation(token);
    if let Some(threads) = threads {
        builder = builder.threads(threads);
    }

    println!("{}", "Creating checkpoint...".blue().bold());
    let result = builder.build(input, output).and_then(|generator| generator.run());
    display.finish();
    let report = result?;

    let hashing = report.failures_of(FailureKind::Hashing).count();
    let timestamping = report.failures.len() - hashing;

    if report.cancelled() {
        println!(
            "{} Interrupted, incomplete checkpoint saved to {}",
            "⚠".yellow().bold(),
            report.checkpoint_file.display().to_string().cyan()
        );
        println!("  Run the same command again to resume.");
        return Ok(ExitCode::FAILURE);
    }

    println!(
        "{} Created checkpoint {}",
        "✓".green().bold(),
        report.checkpoint_file.display().to_string().cyan()
    );
    println!("  Nodes: {}", report.discovered.to_string().cyan());
    if report.reused > 0 {
        println!("  Resumed: {} nodes", report.reused.to_string().cyan());
    }
    println!("  Size: {}", format_bytes(report.total_bytes).cyan());
    println!("  Threads: {}", report.threads.to_string().cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_secs(report.duration.as_secs()))
            .to_string()
            .cyan()
    );
    if !report.failures.is_empty() {
        println!(
            "  Failures: {} hashing, {} timestamping",
            hashing.to_string().yellow(),
            timestamping.to_string().yellow()
        );
    }

    Ok(ExitCode::SUCCESS)
}

/// Compare two checkpoints
///
/// Exits successfully only if every check passed on every node.
fn cmd_check(
    old_path: &Path,
    new_path: &Path,
    important_dirs: &[String],
    maturity_months: u32,
    min_hash_match_size: u64,
    json: bool,
) -> Result<ExitCode> {
    let important_dirs = important_dirs
        .iter()
        .map(|dir| NodePath::parse_user(dir))
        .collect::<Result<Vec<_>>>()?;

    let old = Checkpoint::load(old_path)?;
    let new = Checkpoint::load(new_path)?;
    let options = CheckOptions {
        maturity_months,
        important_dirs,
        min_hash_match_size,
    };
    let engine = CheckEngine::new(&old, &new, options);
    let report = engine.run();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for dir in engine.unknown_important_dirs() {
            println!(
                "{} Important directory {} is not in the old checkpoint, nothing beneath it is protected",
                "⚠".yellow().bold(),
                dir
            );
        }
        if !report.old_complete || !report.new_complete {
            println!(
                "{} Comparing incomplete checkpoints, results may be partial",
                "⚠".yellow().bold()
            );
        }

        for failure in &report.failures {
            println!(
                "{}: {} {}",
                failure.path,
                failure.message,
                format!("[{}]", failure.check).dimmed()
            );
        }

        if report.passed() {
            println!("{} {}", "✓".green().bold(), report.summary());
        } else {
            println!("{} {}", "✗".red().bold(), report.summary());
            for check in Check::registry() {
                if report.failure_count(*check) > 0 {
                    println!("  {}: {}", check.name().yellow(), check.description());
                }
            }
        }
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// What `inspect` prints
#[derive(Serialize)]
struct Inspection {
    file: PathBuf,
    date_estimate: Option<DateTime<Utc>>,
    #[serde(flatten)]
    stats: CheckpointStats,
}

/// Show checkpoint info
fn cmd_inspect(path: &Path, json: bool) -> Result<ExitCode> {
    let checkpoint = Checkpoint::load(path)?;
    let inspection = Inspection {
        file: Checkpoint::file_path(path),
        date_estimate: checkpoint.date_estimate(),
        stats: checkpoint.stats(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(ExitCode::SUCCESS);
    }

    let stats = &inspection.stats;
    println!("{}", "Checkpoint Details:".blue().bold());
    println!("  File: {}", inspection.file.display().to_string().cyan());
    println!(
        "  Status: {}",
        if stats.complete {
            "complete".green()
        } else {
            "incomplete".yellow()
        }
    );
    match inspection.date_estimate {
        Some(date) => println!("  Date estimate: {}", date.to_string().cyan()),
        None => println!("  Date estimate: {}", "unknown".dimmed()),
    }
    println!("  Nodes: {}", stats.node_count.to_string().cyan());
    println!("  Hashing failures: {}", count_colored(stats.hashing_failures));
    println!(
        "  Timestamping failures: {}",
        count_colored(stats.timestamping_failures)
    );

    Ok(ExitCode::SUCCESS)
}

/// Load a checkpoint and save it again in canonical form
fn cmd_rewrite(path: &Path, output: Option<PathBuf>) -> Result<ExitCode> {
    let checkpoint = Checkpoint::load(path)?;

    let output = match output {
        Some(output) => output,
        None if path.is_dir() => path.to_path_buf(),
        None => path
            .parent()
            .map(|parent| {
                if parent.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    parent.to_path_buf()
                }
            })
            .ok_or_else(|| CheckpointError::InvalidPath {
                path: path.display().to_string(),
                reason: "has no parent directory".to_string(),
            })?,
    };

    let file = checkpoint.save(&output)?;
    println!(
        "{} Rewrote {} nodes to {}",
        "✓".green().bold(),
        checkpoint.node_count().to_string().cyan(),
        file.display().to_string().cyan()
    );
    Ok(ExitCode::SUCCESS)
}

fn count_colored(count: usize) -> ColoredString {
    if count == 0 {
        count.to_string().green()
    } else {
        count.to_string().yellow()
    }
}

/// Cancel `token` on the first termination signal, exit on the second
fn watch_signals(token: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Cannot listen for signals: {}", e);
                    return;
                }
            };

            runtime.block_on(async {
                match shutdown_signal().await {
                    Ok(name) => {
                        warn!("Received {}, stopping and saving an incomplete checkpoint", name);
                        token.cancel();
                    }
                    Err(e) => {
                        warn!("Cannot listen for signals: {}", e);
                        return;
                    }
                }

                if let Ok(name) = shutdown_signal().await {
                    error!("Received {} again, exiting without saving", name);
                    std::process::exit(130);
                }
            });
        });

    if let Err(e) = spawned {
        warn!("Cannot start signal watcher: {}", e);
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
        _ = hangup.recv() => Ok("SIGHUP"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "Ctrl-C")
}
