//! gavel-daemon - verifier HTTP service for the gavel governance kernel.
//!
//! The daemon is read-only over the ledger directory: it verifies the hash
//! chain and signatures on demand and writes timestamped reports to its
//! own reports directory. It optionally exposes `POST /run` when an
//! orchestrator is wired in (the binary runs without one; chain execution
//! in production goes through the library or the CLI).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod server;

pub use server::{router, AppState};
