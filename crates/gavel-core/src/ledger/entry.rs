//! Ledger entry model and canonical serialization.
//!
//! The signature covers exactly eight fields - `seq, ts, session_id, role,
//! action, payload_hash, prev_hash, config_hash` - serialized with sorted
//! keys and no whitespace. The chain link is then
//! `this_hash = SHA256(canonical_fields || signature_hex)`.

use serde::{Deserialize, Serialize};

use crate::crypto::sha256_hex;

/// One append-only ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Global sequence number; the only cross-session ordering.
    pub seq: u64,
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    /// Session this entry belongs to.
    pub session_id: String,
    /// Role (or subsystem) that produced the entry.
    pub role: String,
    /// What happened (`generate_strategy`, `role_failure`, `rollover`, ...).
    pub action: String,
    /// SHA-256 of the raw payload this entry attests to.
    pub payload_hash: String,
    /// `this_hash` of the previous entry; all zeros for the genesis entry.
    pub prev_hash: String,
    /// Hash-chain link over the canonical fields and the signature.
    pub this_hash: String,
    /// Hex signature over the canonical fields.
    pub signature: String,
    /// Which key signed this entry (`ed25519:<fp>` or `hmac:<fp>`).
    pub signer_key_id: String,
    /// The session's config fingerprint, identical for all entries of a
    /// session.
    pub config_hash: String,

    /// Soft audit tags attached by governance, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soft_signals: Option<Vec<String>>,

    /// Hard directive ids enforced on this turn, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_actions: Option<Vec<String>>,

    /// Sampling temperature of the turn, recorded for reproducibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Inline payload, carried only by `rollover` entries (the next
    /// filename); `payload_hash` covers its canonical serialization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Canonical signing fields, ordered alphabetically so the default struct
/// serialization is the sorted-key, no-whitespace canonical form.
#[derive(Serialize)]
struct CanonicalFields<'a> {
    action: &'a str,
    config_hash: &'a str,
    payload_hash: &'a str,
    prev_hash: &'a str,
    role: &'a str,
    seq: u64,
    session_id: &'a str,
    ts: &'a str,
}

impl LedgerEntry {
    /// The canonical byte serialization of the signing fields.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_bytes(
            self.seq,
            &self.ts,
            &self.session_id,
            &self.role,
            &self.action,
            &self.payload_hash,
            &self.prev_hash,
            &self.config_hash,
        )
    }

    /// Recomputes the chain link for this entry.
    #[must_use]
    pub fn computed_this_hash(&self) -> String {
        let mut bytes = self.canonical_bytes();
        bytes.extend_from_slice(self.signature.as_bytes());
        sha256_hex(&bytes)
    }
}

/// Builds the canonical serialization from loose fields (used by the
/// writer before the entry struct exists).
#[allow(clippy::too_many_arguments)]
#[must_use]
pub(crate) fn canonical_bytes(
    seq: u64,
    ts: &str,
    session_id: &str,
    role: &str,
    action: &str,
    payload_hash: &str,
    prev_hash: &str,
    config_hash: &str,
) -> Vec<u8> {
    let fields = CanonicalFields {
        action,
        config_hash,
        payload_hash,
        prev_hash,
        role,
        seq,
        session_id,
        ts,
    };
    // Struct field order is alphabetical and serde_json emits compact
    // output, which is exactly the canonical form.
    serde_json::to_vec(&fields).expect("canonical fields serialize")
}

/// Hashes an inline payload value the way the writer does: SHA-256 over
/// its compact serialization.
#[must_use]
pub fn canonical_payload_hash(payload: &serde_json::Value) -> String {
    sha256_hex(
        serde_json::to_vec(payload)
            .expect("payload value serializes")
            .as_slice(),
    )
}

/// The unsigned portion of an entry handed to [`super::Ledger::append`];
/// the writer assigns `seq`, `ts`, `prev_hash`, signature, and chain link.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    /// Session id.
    pub session_id: String,
    /// Role (or subsystem) name.
    pub role: String,
    /// Action name.
    pub action: String,
    /// SHA-256 of the payload being attested.
    pub payload_hash: String,
    /// The session config fingerprint.
    pub config_hash: String,
    /// Soft audit tags, when any.
    pub soft_signals: Option<Vec<String>>,
    /// Hard directive ids, when any.
    pub hard_actions: Option<Vec<String>>,
    /// Sampling temperature of the turn.
    pub temperature: Option<f32>,
    /// Inline payload (rollover entries only).
    pub payload: Option<serde_json::Value>,
}

impl EntryDraft {
    /// Creates a draft attesting to `payload_hash`.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        role: impl Into<String>,
        action: impl Into<String>,
        payload_hash: impl Into<String>,
        config_hash: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            role: role.into(),
            action: action.into(),
            payload_hash: payload_hash.into(),
            config_hash: config_hash.into(),
            soft_signals: None,
            hard_actions: None,
            temperature: None,
            payload: None,
        }
    }

    /// Attaches governance tags (builder pattern).
    #[must_use]
    pub fn with_governance(
        mut self,
        soft_signals: Vec<String>,
        hard_actions: Vec<String>,
    ) -> Self {
        if !soft_signals.is_empty() {
            self.soft_signals = Some(soft_signals);
        }
        if !hard_actions.is_empty() {
            self.hard_actions = Some(hard_actions);
        }
        self
    }

    /// Records the sampling temperature (builder pattern).
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}
