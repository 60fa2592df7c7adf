use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use floodgate::config::FloodgateConfig;
use floodgate::ratelimit::{self, RateLimiter};
use floodgate::Decision;

/// Answer rate limit checks read from stdin.
///
/// Each input line is `<rule> <key>`; each output line is a JSON decision.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Serialize)]
struct CheckResponse<'a> {
    rule: &'a str,
    key: &'a str,
    #[serde(flatten)]
    decision: Decision,
}

#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    error: String,
    line: &'a str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    info!("Starting floodgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => FloodgateConfig::from_file(path)?,
        None => FloodgateConfig::default(),
    };
    info!(rules = config.limits.len(), "Configuration loaded");

    let sweep = config.sweep.to_sweep_config();
    let mut limiters: HashMap<String, Arc<dyn RateLimiter<String>>> = HashMap::new();
    let mut sweepers = Vec::with_capacity(config.limits.len());
    for rule in &config.limits {
        let limiter = rule.build(sweep)?;
        sweepers.push(ratelimit::spawn_sweeper(&limiter, config.sweep.interval()));
        limiters.insert(rule.name.clone(), limiter);
    }

    tokio::select! {
        result = serve(&limiters) => {
            result?;
            info!("Input closed");
        }
        _ = shutdown_signal() => {}
    }

    for sweeper in sweepers {
        sweeper.abort();
    }

    info!("floodgate stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read `<rule> <key>` lines until EOF, answering each on stdout.
async fn serve(limiters: &HashMap<String, Arc<dyn RateLimiter<String>>>) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next().await {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let output = answer(limiters, line)?;
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn answer(
    limiters: &HashMap<String, Arc<dyn RateLimiter<String>>>,
    line: &str,
) -> serde_json::Result<String> {
    let Some((rule, key)) = line.split_once(char::is_whitespace) else {
        warn!(line, "Malformed request line");
        return serde_json::to_string(&ErrorResponse {
            error: "expected '<rule> <key>'".to_string(),
            line,
        });
    };
    let key = key.trim();

    let Some(limiter) = limiters.get(rule) else {
        warn!(rule, "Unknown rule");
        return serde_json::to_string(&ErrorResponse {
            error: format!("unknown rule '{}'", rule),
            line,
        });
    };

    let decision = limiter.check(&key.to_string());
    debug!(rule, key, allowed = decision.allowed, "Answered check");
    serde_json::to_string(&CheckResponse {
        rule,
        key,
        decision,
    })
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
