//! Independent ledger verification.
//!
//! The verifier is read-only over the ledger directory: it re-parses every
//! JSONL line, recomputes the canonical serialization and chain link,
//! verifies each signature under the published key, and follows rollover
//! links across rotated files. It never consults the SQLite mirror and
//! never requires write access to the ledger directory; reports go to the
//! caller (the daemon writes them to its own reports directory).

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{PublishedKey, GENESIS_HASH};
use crate::ledger::{LedgerEntry, LEDGER_FILE, PUBLIC_KEY_FILE, ROLLOVER_ACTION};

/// Errors while running verification (not integrity findings - those go in
/// the report).
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The ledger directory does not exist.
    #[error("ledger directory not found: {0}")]
    LedgerDirMissing(String),

    /// I/O failure reading a ledger file or writing a report.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization failed.
    #[error("report serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Why an entry failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyReason {
    /// Signature does not verify under the published key.
    SigInvalid,
    /// Recomputed chain link differs from the stored `this_hash`.
    HashMismatch,
    /// The line is not parseable JSON; the chain is broken from here.
    InvalidJson,
    /// `prev_hash` does not match the previous entry's link, or the
    /// sequence numbering is discontinuous.
    ChainBreak,
    /// No published key was found; signatures cannot be checked.
    MissingPublicKey,
}

/// One verification finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyDetail {
    /// Sequence number of the offending entry (the expected sequence for
    /// unparseable lines).
    pub seq: u64,
    /// The mismatch reason.
    pub error: VerifyReason,
    /// Human-readable detail.
    pub message: String,
}

/// The full verification report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    /// True when every entry verified.
    pub verified: bool,
    /// Entries examined (parseable lines).
    pub entries: u64,
    /// Files walked, following rollover links.
    pub files: u64,
    /// RFC 3339 UTC timestamp of the run.
    pub ts: String,
    /// Findings, in ledger order.
    pub details: Vec<VerifyDetail>,
}

impl VerifyReport {
    /// Writes the report as `verify_YYYYMMDDTHHMMSSZ.json` under
    /// `reports_dir` and returns the path.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn write_to(&self, reports_dir: impl AsRef<Path>) -> Result<PathBuf, VerifyError> {
        let reports_dir = reports_dir.as_ref();
        std::fs::create_dir_all(reports_dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let path = reports_dir.join(format!("verify_{stamp}.json"));
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

/// The independent, read-only ledger verifier.
pub struct Verifier {
    ledger_dir: PathBuf,
}

impl Verifier {
    /// Creates a verifier over `ledger_dir`.
    #[must_use]
    pub fn new(ledger_dir: impl AsRef<Path>) -> Self {
        Self {
            ledger_dir: ledger_dir.as_ref().to_path_buf(),
        }
    }

    /// The directory under verification.
    #[must_use]
    pub fn ledger_dir(&self) -> &Path {
        &self.ledger_dir
    }

    /// Walks the full chain and verifies every entry.
    ///
    /// Verification is idempotent: re-running on an untouched ledger
    /// yields the same report with `verified: true`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the ledger directory itself is missing
    /// or unreadable; integrity findings land in the report.
    pub fn verify(&self) -> Result<VerifyReport, VerifyError> {
        if !self.ledger_dir.exists() {
            return Err(VerifyError::LedgerDirMissing(
                self.ledger_dir.display().to_string(),
            ));
        }

        let mut report = VerifyReport {
            verified: true,
            entries: 0,
            files: 0,
            ts: Utc::now().to_rfc3339(),
            details: Vec::new(),
        };

        let key = match PublishedKey::load(self.ledger_dir.join(PUBLIC_KEY_FILE)) {
            Ok(key) => Some(key),
            Err(err) => {
                report.verified = false;
                report.details.push(VerifyDetail {
                    seq: 0,
                    error: VerifyReason::MissingPublicKey,
                    message: format!("published key unavailable: {err}"),
                });
                None
            },
        };

        let mut expected_prev = GENESIS_HASH.to_string();
        let mut expected_seq = 0u64;
        let mut current = self.ledger_dir.join(LEDGER_FILE);

        while current.exists() {
            report.files += 1;
            let text = std::fs::read_to_string(&current)?;
            let mut next_file: Option<String> = None;

            for line in text.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(entry) = serde_json::from_str::<LedgerEntry>(line) else {
                    report.verified = false;
                    report.details.push(VerifyDetail {
                        seq: expected_seq,
                        error: VerifyReason::InvalidJson,
                        message: format!(
                            "unparseable line in {}; chain broken from seq {expected_seq}",
                            current.display()
                        ),
                    });
                    // The malformed line consumed a chain position; linkage
                    // can no longer be confirmed against it.
                    expected_seq += 1;
                    expected_prev.clear();
                    continue;
                };

                report.entries += 1;
                self.verify_entry(&entry, &expected_prev, expected_seq, key.as_ref(), &mut report);

                if entry.action == ROLLOVER_ACTION {
                    next_file = entry
                        .payload
                        .as_ref()
                        .and_then(|p| p.get("next_file"))
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string);
                }

                expected_seq = entry.seq + 1;
                expected_prev = entry.this_hash.clone();
            }

            match next_file {
                Some(name) => current = self.ledger_dir.join(name),
                None => break,
            }
        }

        Ok(report)
    }

    fn verify_entry(
        &self,
        entry: &LedgerEntry,
        expected_prev: &str,
        expected_seq: u64,
        key: Option<&PublishedKey>,
        report: &mut VerifyReport,
    ) {
        if entry.seq != expected_seq {
            report.verified = false;
            report.details.push(VerifyDetail {
                seq: entry.seq,
                error: VerifyReason::ChainBreak,
                message: format!("sequence jump: expected {expected_seq}, found {}", entry.seq),
            });
        } else if expected_prev.is_empty() {
            // Predecessor was unparseable; this link cannot be confirmed.
            report.verified = false;
            report.details.push(VerifyDetail {
                seq: entry.seq,
                error: VerifyReason::ChainBreak,
                message: "predecessor unparseable; prev_hash unverifiable".to_string(),
            });
        } else if entry.prev_hash != expected_prev {
            report.verified = false;
            report.details.push(VerifyDetail {
                seq: entry.seq,
                error: VerifyReason::ChainBreak,
                message: format!(
                    "prev_hash mismatch: expected {expected_prev}, found {}",
                    entry.prev_hash
                ),
            });
        }

        if let Some(key) = key {
            if !key.verify(&entry.canonical_bytes(), &entry.signature) {
                report.verified = false;
                report.details.push(VerifyDetail {
                    seq: entry.seq,
                    error: VerifyReason::SigInvalid,
                    message: "signature does not verify under the published key".to_string(),
                });
            }
        }

        if entry.computed_this_hash() != entry.this_hash {
            report.verified = false;
            report.details.push(VerifyDetail {
                seq: entry.seq,
                error: VerifyReason::HashMismatch,
                message: format!(
                    "recomputed this_hash {} != stored {}",
                    entry.computed_this_hash(),
                    entry.this_hash
                ),
            });
        }

        // Rollover payloads are covered by payload_hash; check the binding.
        if let Some(payload) = &entry.payload {
            let computed = crate::ledger::canonical_payload_hash(payload);
            if computed != entry.payload_hash {
                report.verified = false;
                report.details.push(VerifyDetail {
                    seq: entry.seq,
                    error: VerifyReason::HashMismatch,
                    message: "inline payload does not match payload_hash".to_string(),
                });
            }
        }
    }
}

/// Summary line for a stored report file, as listed by `GET /reports`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Report filename.
    pub name: String,
    /// Report timestamp.
    pub ts: String,
    /// Whether that run verified.
    pub verified: bool,
}

/// Lists the newest `limit` verification reports in `reports_dir`.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_reports(
    reports_dir: impl AsRef<Path>,
    limit: usize,
) -> Result<Vec<ReportSummary>, VerifyError> {
    let reports_dir = reports_dir.as_ref();
    if !reports_dir.exists() {
        return Ok(Vec::new());
    }

    let mut names: Vec<String> = std::fs::read_dir(reports_dir)?
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.starts_with("verify_") && n.ends_with(".json"))
        .collect();
    names.sort();
    names.reverse();
    names.truncate(limit);

    let mut summaries = Vec::with_capacity(names.len());
    for name in names {
        let Ok(text) = std::fs::read_to_string(reports_dir.join(&name)) else {
            continue;
        };
        let Ok(report) = serde_json::from_str::<VerifyReport>(&text) else {
            continue;
        };
        summaries.push(ReportSummary {
            name,
            ts: report.ts,
            verified: report.verified,
        });
    }
    Ok(summaries)
}
