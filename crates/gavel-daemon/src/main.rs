//! gavel-daemon - verifier HTTP service.
//!
//! Serves `GET /health`, `GET /verify`, `GET /reports`, and
//! `GET /domains` over a read-only view of the ledger directory. The
//! optional `POST /run` endpoint answers 503 unless an orchestrator is
//! wired in through the library.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use gavel_daemon::{router, AppState};

/// gavel-daemon - independent ledger verifier service
#[derive(Parser, Debug)]
#[command(name = "gavel-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding audit.jsonl and public.key
    #[arg(long, default_value = "logs/ledger")]
    ledger_dir: PathBuf,

    /// Directory verification reports are written to
    #[arg(long, default_value = "reports")]
    reports_dir: PathBuf,

    /// Bind address
    #[arg(long, default_value = "127.0.0.1:8484")]
    bind: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    std::fs::create_dir_all(&args.reports_dir)
        .with_context(|| format!("cannot create reports dir {}", args.reports_dir.display()))?;

    let state = Arc::new(AppState {
        ledger_dir: args.ledger_dir.clone(),
        reports_dir: args.reports_dir.clone(),
        orchestrator: None,
    });

    tracing::info!(
        bind = %args.bind,
        ledger = %args.ledger_dir.display(),
        reports = %args.reports_dir.display(),
        "gavel-daemon starting"
    );

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("cannot bind {}", args.bind))?;
    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}
