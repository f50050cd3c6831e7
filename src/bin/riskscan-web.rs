// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Riskscan Web Dashboard
//!
//! Local web front end: pick a folder or a list of files, start or stop an
//! analysis, and watch the log stream in.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::Command;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use riskscan::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "riskscan-web")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Riskscan Web Dashboard Server")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "riskscan.json")]
    config: PathBuf,

    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Open browser automatically
    #[arg(long)]
    open: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(ref host) = self.host {
            config.web.host = host.clone();
        }
        if let Some(port) = self.port {
            config.web.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let fallback = if args.verbose { "riskscan=debug,tower_http=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .init();

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    args.apply(&mut config);

    info!(
        "Riskscan dashboard v{} (model {}, history {})",
        env!("CARGO_PKG_VERSION"),
        config.engine.model,
        config.history.path
    );

    if args.open {
        let url = format!("http://{}:{}", config.web.host, config.web.port);
        if let Err(e) = open_browser(&url) {
            warn!("Could not launch a browser for {}: {}", url, e);
        }
    }

    riskscan::web::start_server(config)
        .await
        .context("web server stopped")
}

fn open_browser(url: &str) -> std::io::Result<()> {
    let (program, args): (&str, &[&str]) = if cfg!(target_os = "macos") {
        ("open", &[])
    } else if cfg!(target_os = "windows") {
        ("cmd", &["/c", "start"])
    } else {
        ("xdg-open", &[])
    };

    Command::new(program).args(args).arg(url).spawn().map(|_| ())
}
