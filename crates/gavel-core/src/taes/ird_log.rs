//! Append-only IRD log with size-based rotation.
//!
//! One CSV row per TAES evaluation. When the file exceeds the size limit
//! it is rotated, keeping a fixed number of generations
//! (`ird_log.csv.1` … `ird_log.csv.5`, oldest dropped).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use thiserror::Error;

use super::TaesRecord;
use crate::domain::{Domain, Role};

/// Rotation threshold.
const MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;
/// Rotated generations kept on disk.
const GENERATIONS: u32 = 5;

const HEADER: &str = "timestamp,session_id,role,domain,logical,practical,probable,iv,ird,verdict";

/// Errors appending to the IRD log.
#[derive(Debug, Error)]
pub enum IrdLogError {
    /// I/O failure writing or rotating the log.
    #[error("IRD log I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of the IRD log.
#[derive(Debug, Clone)]
pub struct IrdRow {
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// Session the evaluation belongs to.
    pub session_id: String,
    /// Evaluated role.
    pub role: Role,
    /// Session domain.
    pub domain: Domain,
    /// Logical sub-score.
    pub logical: f64,
    /// Practical sub-score.
    pub practical: f64,
    /// Probable sub-score.
    pub probable: f64,
    /// Canonical IV.
    pub iv: f64,
    /// IRD value.
    pub ird: f64,
    /// `rrp` when reconciliation is required, `ok` otherwise.
    pub verdict: &'static str,
}

impl IrdRow {
    /// Builds a row from a finished TAES record.
    #[must_use]
    pub fn from_record(
        session_id: &str,
        role: Role,
        domain: Domain,
        record: &TaesRecord,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            session_id: session_id.to_string(),
            role,
            domain,
            logical: record.logical,
            practical: record.practical,
            probable: record.probable,
            iv: record.iv,
            ird: record.ird,
            verdict: if record.requires_reconciliation { "rrp" } else { "ok" },
        }
    }

    fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{}",
            self.timestamp,
            self.session_id,
            self.role,
            self.domain,
            self.logical,
            self.practical,
            self.probable,
            self.iv,
            self.ird,
            self.verdict
        )
    }
}

/// The rotating IRD log file.
pub struct IrdLog {
    path: PathBuf,
}

impl IrdLog {
    /// Creates a log writing to `path` (conventionally
    /// `<logs_dir>/ird_log.csv`).
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Appends one row, rotating first when the file is over the limit.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn append(&self, row: &IrdRow) -> Result<(), IrdLogError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed()?;

        let write_header = !self.path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        if write_header {
            writeln!(file, "{HEADER}")?;
        }
        writeln!(file, "{}", row.to_csv())?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<(), IrdLogError> {
        let Ok(metadata) = std::fs::metadata(&self.path) else {
            return Ok(());
        };
        if metadata.len() <= MAX_SIZE_BYTES {
            return Ok(());
        }

        // Shift generations upward, dropping the oldest.
        let generation = |n: u32| PathBuf::from(format!("{}.{n}", self.path.display()));
        let oldest = generation(GENERATIONS);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        for n in (1..GENERATIONS).rev() {
            let from = generation(n);
            if from.exists() {
                std::fs::rename(&from, generation(n + 1))?;
            }
        }
        std::fs::rename(&self.path, generation(1))?;
        tracing::info!(path = %self.path.display(), "rotated IRD log");
        Ok(())
    }
}
