//! gavel - operator CLI for the governance kernel.
//!
//! Exit codes: 0 success, 2 config error, 3 role failure,
//! 4 verifier integrity failure.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use gavel_core::chain::{ChainError, ChainOptions, Orchestrator};
use gavel_core::config::compute_config_hash;
use gavel_core::crypto::{LedgerSigner, SignerConfig};
use gavel_core::llm::MockLlm;
use gavel_core::verify::Verifier;

/// Exit code for configuration errors.
const EXIT_CONFIG: u8 = 2;
/// Exit code when a role failed during the chain.
const EXIT_ROLE_FAILURE: u8 = 3;
/// Exit code when the ledger failed verification.
const EXIT_INTEGRITY: u8 = 4;

/// gavel - governance kernel CLI
#[derive(Parser, Debug)]
#[command(name = "gavel")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one chain session against a replay script
    Run {
        /// The objective text
        #[arg(long)]
        objective: String,

        /// Declared domain (defaults to the configured default domain)
        #[arg(long)]
        domain: Option<String>,

        /// Session id (generated when absent)
        #[arg(long)]
        session_id: Option<String>,

        /// Base directory holding config/, protocol/, roles/
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,

        /// JSON file with the scripted model responses, in call order
        #[arg(long)]
        replay: PathBuf,
    },

    /// Verify the ledger hash chain and signatures
    Verify {
        /// Directory holding audit.jsonl and public.key
        #[arg(long, default_value = "logs/ledger")]
        ledger_dir: PathBuf,

        /// Directory to write the verification report to
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,
    },

    /// Print the config fingerprint for a base directory
    Fingerprint {
        /// Base directory holding config/ and protocol/
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },

    /// Generate (or load) the ledger signing key and print its id
    Keygen {
        /// Signing key directory
        #[arg(long, default_value = "keys")]
        key_dir: PathBuf,

        /// Use the HMAC-SHA256 shared-secret scheme instead of Ed25519
        #[arg(long)]
        hmac: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        },
    }
}

fn dispatch(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Run {
            objective,
            domain,
            session_id,
            base_dir,
            replay,
        } => run_command(&objective, domain.as_deref(), session_id.as_deref(), base_dir, &replay),
        Commands::Verify {
            ledger_dir,
            reports_dir,
        } => verify_command(&ledger_dir, &reports_dir),
        Commands::Fingerprint { base_dir } => {
            println!("{}", compute_config_hash(&base_dir));
            Ok(ExitCode::SUCCESS)
        },
        Commands::Keygen { key_dir, hmac } => keygen_command(&key_dir, hmac),
    }
}

fn run_command(
    objective: &str,
    domain: Option<&str>,
    session_id: Option<&str>,
    base_dir: PathBuf,
    replay: &PathBuf,
) -> Result<ExitCode> {
    let script_text = std::fs::read_to_string(replay)
        .with_context(|| format!("cannot read replay script {}", replay.display()))?;
    let responses: Vec<String> =
        serde_json::from_str(&script_text).context("replay script must be a JSON array of strings")?;
    let llm = MockLlm::from_responses(responses);

    let options = ChainOptions::rooted(base_dir);
    let orchestrator = match Orchestrator::new(Box::new(llm), options) {
        Ok(orchestrator) => orchestrator,
        Err(err) => {
            eprintln!("error: {err}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        },
    };

    match orchestrator.run_chain(objective, domain, session_id) {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            let role_failed = result.results.errors.iter().any(|e| {
                matches!(e.kind.as_str(), "role_failure" | "transport_error" | "role_timeout")
            });
            if role_failed {
                Ok(ExitCode::from(EXIT_ROLE_FAILURE))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        },
        Err(err @ (ChainError::Config(_) | ChainError::Domain(_))) => {
            eprintln!("error: {err}");
            Ok(ExitCode::from(EXIT_CONFIG))
        },
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::FAILURE)
        },
    }
}

fn verify_command(ledger_dir: &PathBuf, reports_dir: &PathBuf) -> Result<ExitCode> {
    let report = Verifier::new(ledger_dir)
        .verify()
        .context("verification run failed")?;
    let path = report.write_to(reports_dir).context("cannot write report")?;

    println!(
        "verified: {} ({} entries, {} findings) -> {}",
        report.verified,
        report.entries,
        report.details.len(),
        path.display()
    );
    for detail in &report.details {
        println!("  seq {}: {:?} - {}", detail.seq, detail.error, detail.message);
    }

    if report.verified {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_INTEGRITY))
    }
}

fn keygen_command(key_dir: &PathBuf, hmac: bool) -> Result<ExitCode> {
    let config = SignerConfig {
        force_hmac: hmac,
        allow_hmac_fallback: false,
    };
    match LedgerSigner::open(key_dir, &config) {
        Ok(signer) => {
            println!("{}", signer.key_id());
            Ok(ExitCode::SUCCESS)
        },
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::from(EXIT_CONFIG))
        },
    }
}
