// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Riskscan: AI-assisted critical risk scanner
//!
//! Scans a project (or selected files), asks a hosted Gemini model for
//! critical runtime, security and scale risks, and writes a Markdown report.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use riskscan::config::AppConfig;
use riskscan::gemini::{resolve_api_key, GeminiClient};
use riskscan::history::RunHistory;
use riskscan::pipeline::{AnalysisJob, Pipeline, ProgressEvent, RunSummary, StopFlag};
use riskscan::{Result, RiskscanError};

/// Riskscan CLI - AI-assisted critical risk scanner
#[derive(Parser, Debug)]
#[command(name = "riskscan")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Find critical production risks in a source tree with a hosted AI model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "riskscan.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a whole project folder, grouped into feature units
    Folder {
        /// Project directory to scan
        path: PathBuf,

        /// Report file (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Analyze individual files, one prompt per file
    Files {
        /// Files to analyze
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Report file (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check the API key and list available models
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Past analysis runs
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "riskscan.json")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent runs
    List {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Clear all history
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Folder { path, output } => {
            run_analysis(config, AnalysisJob::Folder(path), output, cli.quiet).await
        }
        Commands::Files { paths, output } => {
            run_analysis(config, AnalysisJob::Files(paths), output, cli.quiet).await
        }
        Commands::Status => run_status(config).await,
        Commands::Config { action } => run_config_command(config, action, &cli.config),
        Commands::History { action } => run_history_command(config, action),
    }
}

/// Run one analysis in the background and print its progress
async fn run_analysis(
    config: AppConfig,
    job: AnalysisJob,
    output: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    if let AnalysisJob::Folder(ref dir) = job {
        if !dir.is_dir() {
            return Err(RiskscanError::InvalidInput(format!(
                "'{}' is not a valid folder path",
                dir.display()
            )));
        }
    }

    let history = RunHistory::new(PathBuf::from(&config.history.path));
    let pipeline = Pipeline::new(config).with_output(output);
    let stop = StopFlag::new();

    // First Ctrl+C finishes the current unit and keeps the partial report;
    // a second one exits without waiting for the model
    let stopper = stop.clone();
    tokio::spawn(async move {
        let mut presses = 0;
        while signal::ctrl_c().await.is_ok() {
            presses += 1;
            if handle_interrupt(presses, &stopper) {
                std::process::exit(130);
            }
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = pipeline.spawn(job, tx, stop);

    let mut finished: Option<RunSummary> = None;
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Started { .. } => {}
            ProgressEvent::Line { text } => println!("{}", text),
            ProgressEvent::Finished { summary } => finished = Some(summary),
        }
    }

    let summary = match finished {
        Some(summary) => summary,
        None => worker.await
            .map_err(|e| RiskscanError::Config(format!("Analysis worker failed: {}", e)))?,
    };

    if let Err(e) = history.append(&summary) {
        warn!("Failed to record run history: {}", e);
    }

    if !quiet {
        print_summary(&summary);
    }

    Ok(())
}

/// React to the n-th Ctrl+C; returns true when the process should exit
fn handle_interrupt(presses: u32, stop: &StopFlag) -> bool {
    if presses <= 1 {
        info!("Received Ctrl+C, stopping after the current unit (press again to quit)...");
        stop.stop();
        false
    } else {
        warn!("Received another Ctrl+C, exiting");
        true
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{} run {}: {}/{} analyzed, {} failed{}",
        summary.mode,
        &summary.id[..8.min(summary.id.len())],
        summary.analyzed,
        summary.total,
        summary.failed,
        if summary.stopped { " (stopped)" } else { "" }
    );
    if let Some(ref report) = summary.report_path {
        println!("Report: {}", report.display());
    }
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    println!("Riskscan v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    println!("\nEngine:");
    println!("  URL: {}", config.engine.url);
    println!("  Model: {}", config.engine.model);

    let api_key = match resolve_api_key(&config.engine.api_key_env) {
        Ok(key) => {
            println!("  API key ({}): set", config.engine.api_key_env);
            key
        }
        Err(e) => {
            println!("  API key: ✗ {}", e);
            return Ok(());
        }
    };

    let client = GeminiClient::new(&config.engine, api_key)?;
    match client.list_models().await {
        Ok(models) => {
            println!("\nAvailable models:");
            for m in &models {
                let marker = if m == client.model() { "→" } else { " " };
                println!("  {} {}", marker, m);
            }
            if !models.iter().any(|m| m == client.model()) {
                println!("\nConfigured model '{}' is not in the list", client.model());
            }
        }
        Err(e) => println!("\nModels: ✗ Error - {}", e),
    }

    println!("\nScan:");
    println!("  Extensions: {}", config.scan.extensions.join(", "));
    println!("  Strip words: {}", config.scan.strip_suffixes.join(", "));

    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output, force } => {
            if output.exists() && !force {
                return Err(RiskscanError::Config(format!(
                    "{} already exists. Use --force to overwrite",
                    output.display()
                )));
            }
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Model: {}", config.engine.model);
            println!("  Extensions: {}", config.scan.extensions.join(", "));
            println!("  Folder report: {}", config.report.folder_output);
            println!("  File report: {}", config.report.files_output);
        }
    }

    Ok(())
}

/// Run history commands
fn run_history_command(config: AppConfig, action: HistoryCommands) -> Result<()> {
    let history = RunHistory::new(PathBuf::from(&config.history.path));

    match action {
        HistoryCommands::List { count } => {
            let entries = history.get_recent(count)?;
            println!("Recent runs from {} ({} entries):", history.path().display(), entries.len());
            for entry in entries {
                let status = if entry.stopped { "[STOPPED]" } else { "" };
                println!("  {} {:<6} {} - {}/{} analyzed, {} failed {}",
                    entry.started_at.format("%Y-%m-%d %H:%M"),
                    entry.mode.to_string(),
                    entry.target,
                    entry.analyzed,
                    entry.total,
                    entry.failed,
                    status
                );
            }
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing history");
                return Ok(());
            }
            history.clear()?;
            println!("History cleared ({})", history.path().display());
        }
    }

    Ok(())
}
