// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agendo worker daemon (agendod).
//!
//! Claims jobs from the durable queues, runs executions and sessions, and
//! serves the socket API. Configuration comes from the environment and is
//! validated fail-fast at startup.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agendo_daemon::listener::Listener;
use agendo_daemon::{lifecycle, Config};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("agendod {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("agendod {}", env!("CARGO_PKG_VERSION"));
                println!("Agendo worker daemon - runs executions and sessions from the queues");
                println!();
                println!("USAGE:");
                println!("    agendod");
                println!();
                println!("Configuration is taken from the environment (WORKER_ID,");
                println!("ALLOWED_WORKING_DIRS, LOG_DIR, ...). The daemon listens on a");
                println!("Unix socket under AGENDO_STATE_DIR for API requests.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: agendod [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = setup_logging(&config)?;

    let lifecycle::StartupResult {
        daemon,
        listener,
        shutdown,
    } = match lifecycle::startup(config).await {
        Ok(result) => result,
        Err(e) => {
            error!("failed to start daemon: {e}");
            eprintln!("agendod failed to start: {e}");
            std::process::exit(1);
        }
    };

    // Socket API
    let ctx = Arc::new(daemon.listen_ctx(Arc::clone(&shutdown)));
    tokio::spawn(Listener::new(listener, ctx).run());

    // Queue polling / heartbeats / reaper
    let worker = Arc::clone(&daemon.worker);
    tokio::spawn(Arc::clone(&worker).run());

    // Wait for a termination signal or an API-driven shutdown
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = sigint.recv() => info!("SIGINT received"),
        _ = shutdown.notified() => info!("shutdown requested over the socket"),
    }

    // Synchronous first: live sessions must know the termination is
    // intentional before the signal cascade reaches their children
    worker.begin_shutdown();
    worker.finish_shutdown().await;
    daemon.cleanup();

    Ok(())
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.daemon_log_path())
        .or_else(|_| {
            std::fs::create_dir_all(&config.state_dir)?;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(config.daemon_log_path())
        })?;
    let (writer, guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}
