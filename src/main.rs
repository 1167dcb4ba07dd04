//! Standalone driver for one outprocess module proxy.
//!
//! Loads a JSON proxy configuration, connects to the module host, walks
//! the module through create and start, and keeps it alive until the run
//! window closes or the process is interrupted. Messages the module
//! publishes are logged; with `--send-stdin`, lines typed on stdin travel
//! to the module as gateway messages.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use outprocess_proxy::{proxy, GatewayMessage, LogBroker, ProxyConfig};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

mod cli;
mod logging;

use cli::Args;
use logging::ConsoleFormatter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // -v raises the level for both the detailed layer and stdout.
    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // Detailed diagnostics go to a file when requested, stderr otherwise.
    // The appender guard must outlive the run for file logging to flush.
    let guard;
    let detailed_layer;
    match args.log_file.as_deref() {
        Some(path) => {
            let log_path = std::path::Path::new(path);
            let dir = log_path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file = log_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("outprocess-proxy.log"));
            let appender = tracing_appender::rolling::daily(dir, file);
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            detailed_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(log_level)
                .boxed();
            guard = Some(file_guard);
        }
        None => {
            detailed_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(log_level)
                .boxed();
            guard = None;
        }
    }

    // Clean, colorized user-facing output unless silenced.
    let stdout_layer = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ConsoleFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_layer)
        .with(stdout_layer)
        .init();
    let _guard = guard;

    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading configuration from {}", args.config.display()))?;
    let config = ProxyConfig::from_json(&raw)?;

    info!(
        control = %config.control_uri,
        message = %config.message_uri,
        "connecting to module host"
    );

    let handle = proxy::create(Arc::new(LogBroker), config)
        .await
        .ok_or_else(|| anyhow!("module creation failed; see log for details"))?;

    if let Err(e) = handle.start().await {
        error!("module start failed: {e}");
        handle.destroy().await;
        return Err(e.into());
    }
    info!(module = %handle.id(), "module running, press ctrl-c to stop");

    let stdin_pump = if args.send_stdin {
        Some(spawn_stdin_pump(handle.clone()))
    } else {
        None
    };

    match args.run_for {
        Some(window) => {
            tokio::select! {
                _ = tokio::time::sleep(window) => info!("run window elapsed"),
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("interrupted");
        }
    }

    if let Some(pump) = stdin_pump {
        pump.abort();
    }
    handle.destroy().await;
    info!("module destroyed, exiting");
    Ok(())
}

/// Feed stdin lines to the module as gateway messages.
fn spawn_stdin_pump(handle: proxy::ModuleHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let message = GatewayMessage::new(line.into_bytes()).with_property("source", "stdin");
            handle.receive(&message).await;
        }
    })
}
