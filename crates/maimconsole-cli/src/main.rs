//! maimconsole
//!
//! Console adapter for MaimCore: reads lines from stdin, sends them as chat
//! messages and prints the replies.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use maimconsole_cli::console::Console;
use maimconsole_cli::relay;
use maimconsole_cli::shutdown::EXIT_STARTUP_FAILURE;
use maimconsole_core::config::load_config;
use maimconsole_core::tracing_init::{default_filter, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "maimconsole")]
#[command(version, about = "Console adapter for MaimCore", long_about = None)]
struct Cli {
    /// Config file (defaults to ./config.toml, then the user config dir)
    #[arg(short, long, env = "MAIMCONSOLE_CONFIG")]
    config: Option<PathBuf>,

    /// MaimCore WebSocket URL (overrides the config file)
    #[arg(long)]
    url: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "MAIMCONSOLE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&default_filter(cli.debug), cli.log_json);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting maimconsole");

    let console = Console::stdout(std::io::stdin().is_terminal());
    let code = match run(cli, console.clone()).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Startup failed");
            console.error(&format!("{e:#}"));
            EXIT_STARTUP_FAILURE
        }
    };

    // The stdin reader thread can stay parked in a blocking read.
    std::process::exit(code)
}

async fn run(cli: Cli, console: Console) -> anyhow::Result<i32> {
    let loaded = load_config(cli.config.as_deref())?;
    match &loaded.source {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => warn!("No config file found, using defaults"),
    }

    let mut config = loaded.config;
    if let Some(url) = cli.url {
        config.service_url = url;
    }
    config.validate()?;

    let input = BufReader::new(tokio::io::stdin());
    let reason = relay::start(&config, console, input, interrupt_signal()).await;
    Ok(reason.exit_code())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn interrupt_signal() {
    #[cfg(unix)]
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(error = %e, "Cannot install SIGTERM handler");
                None
            }
        };

    #[cfg(unix)]
    let sigterm_future = async {
        match sigterm.as_mut() {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C");
        }
        () = sigterm_future => {
            info!("Received SIGTERM");
        }
    }
}
