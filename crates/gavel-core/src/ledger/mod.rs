//! The signed, hash-chained audit ledger.
//!
//! One JSON object per line, append-only. The JSONL file is the
//! authoritative signing substrate; a SQLite mirror stores the same tuples
//! for fast querying and is never consulted by the verifier.
//!
//! Every entry carries a hash-chain link (`prev_hash`/`this_hash`), a
//! signature over the canonical serialization of its core fields, the
//! signer key id, and the session's config fingerprint. Entries are never
//! mutated; the file grows monotonically. A single writer per session is
//! enforced with an exclusive advisory file lock around the append
//! sequence (compute seq, compute `prev_hash`, sign, append).

mod entry;
mod mirror;
mod writer;

pub use entry::{canonical_payload_hash, EntryDraft, LedgerEntry};
pub use mirror::Mirror;
pub use writer::{Ledger, LedgerOptions};

use thiserror::Error;

/// The authoritative ledger filename.
pub const LEDGER_FILE: &str = "audit.jsonl";

/// The published key filename next to the ledger.
pub const PUBLIC_KEY_FILE: &str = "public.key";

/// Action name of rotation link entries.
pub const ROLLOVER_ACTION: &str = "rollover";

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// I/O error during ledger file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry failed to serialize or a stored line failed to parse.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Signer initialization or key publication failed.
    #[error("signer error: {0}")]
    Signer(#[from] crate::crypto::SignerError),

    /// The SQLite mirror rejected an operation.
    #[error("mirror error: {0}")]
    Mirror(#[from] rusqlite::Error),

    /// A stored entry is unusable while computing the append position.
    #[error("corrupt ledger tail in {file} at line {line}: {reason}")]
    CorruptTail {
        /// The ledger file containing the corrupt line.
        file: String,
        /// 1-based line number.
        line: usize,
        /// Parse failure detail.
        reason: String,
    },
}
