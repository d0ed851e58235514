//! # gavel-core
//!
//! Core library for gavel - a governance kernel that executes a fixed
//! multi-role reasoning chain over an LLM, grades each stage on a tri-axis
//! quality metric, applies directive-based hard/soft gates, and writes a
//! tamper-evident, signed, hash-chained audit ledger that an independent
//! verifier can re-check.
//!
//! ## Features
//!
//! - **Chain orchestration**: five sequential roles with typed artifact
//!   hand-offs and bounded micro-Q&A exchanges
//! - **TAES evaluation**: deterministic tri-axis scoring (logical, practical,
//!   probable) producing the Integrity Vector and Ideal-Reality Disparity
//! - **Governance coupling**: config-driven hard caps/floors and soft audit
//!   tags derived from signal detectors
//! - **Signed ledger**: append-only JSONL with an Ed25519 hash chain and a
//!   SQLite mirror for queries
//! - **Verification**: independent re-computation of hashes and signatures
//!
//! ## Example
//!
//! ```rust,no_run
//! use gavel_core::chain::{ChainOptions, Orchestrator};
//! use gavel_core::llm::MockLlm;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let llm = MockLlm::new(vec![]);
//! let orchestrator = Orchestrator::new(Box::new(llm), ChainOptions::default())?;
//! let result = orchestrator.run_chain("Book 5 local jobs in 7 days", Some("marketing"), None)?;
//! println!("config hash: {}", result.results.config_hash);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod detect;
pub mod directive;
pub mod domain;
pub mod governance;
pub mod ledger;
pub mod llm;
pub mod taes;
pub mod verify;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::artifact::{Artifact, ArtifactKind, Registry};
    pub use crate::chain::{ChainOptions, ChainResult, Orchestrator};
    pub use crate::config::ConfigSnapshot;
    pub use crate::domain::{Domain, Role};
    pub use crate::ledger::{Ledger, LedgerEntry};
    pub use crate::llm::LlmClient;
    pub use crate::verify::Verifier;
}

pub use chain::{ChainOptions, ChainResult, Orchestrator};
pub use config::ConfigSnapshot;
pub use domain::{Domain, Role};
pub use ledger::Ledger;
pub use verify::Verifier;
