//! The append-only ledger writer.
//!
//! Append discipline: the in-process state mutex serializes sessions of
//! this process, and an exclusive advisory file lock (fs2) serializes
//! processes. Under the lock the writer re-reads the file tail so the
//! sequence and chain tip are correct even when another process appended
//! since the last call.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use fs2::FileExt;
use serde_json::json;

use super::entry::{canonical_bytes, canonical_payload_hash};
use super::{EntryDraft, LedgerEntry, LedgerError, Mirror, LEDGER_FILE, PUBLIC_KEY_FILE, ROLLOVER_ACTION};
use crate::crypto::{sha256_hex, LedgerSigner, GENESIS_HASH};

/// Bytes read from the end of the file to find the last entry.
const TAIL_WINDOW: u64 = 64 * 1024;

/// Ledger writer options.
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Rotate the active file once it grows past this size.
    pub rotate_at_bytes: Option<u64>,
    /// Maintain the SQLite mirror.
    pub mirror: bool,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            rotate_at_bytes: None,
            mirror: true,
        }
    }
}

struct WriterState {
    active_file: PathBuf,
    next_seq: u64,
    tip_hash: String,
}

/// The append-only signed ledger.
pub struct Ledger {
    dir: PathBuf,
    signer: LedgerSigner,
    mirror: Option<Mirror>,
    rotate_at: Option<u64>,
    state: Mutex<WriterState>,
}

impl Ledger {
    /// Opens (or creates) the ledger in `dir`, publishing the signer's key
    /// as `public.key` alongside it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, key, mirror, or an existing
    /// chain file is unusable.
    pub fn open(
        dir: impl AsRef<Path>,
        signer: LedgerSigner,
        options: &LedgerOptions,
    ) -> Result<Self, LedgerError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        signer.publish_key(dir.join(PUBLIC_KEY_FILE))?;

        let mirror = if options.mirror {
            Some(Mirror::open(dir.join("audit.db"))?)
        } else {
            None
        };

        let state = walk_chain(&dir)?;
        tracing::debug!(
            active = %state.active_file.display(),
            next_seq = state.next_seq,
            "ledger opened"
        );

        Ok(Self {
            dir,
            signer,
            mirror,
            rotate_at: options.rotate_at_bytes,
            state: Mutex::new(state),
        })
    }

    /// The ledger directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The key id every appended entry will carry.
    #[must_use]
    pub fn signer_key_id(&self) -> &str {
        self.signer.key_id()
    }

    /// Appends one signed entry and returns it.
    ///
    /// The append sequence (compute seq, compute `prev_hash`, sign,
    /// append) runs under an exclusive advisory lock on the active file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be locked, read, or written.
    pub fn append(&self, draft: EntryDraft) -> Result<LedgerEntry, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let entry = self.append_locked(&mut state, draft)?;
        self.rotate_if_needed(&mut state, &entry)?;
        Ok(entry)
    }

    fn append_locked(
        &self,
        state: &mut WriterState,
        draft: EntryDraft,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&state.active_file)?;
        file.lock_exclusive()?;

        let result = self.append_under_lock(state, &mut file, draft);
        let _ = FileExt::unlock(&file);
        result
    }

    fn append_under_lock(
        &self,
        state: &mut WriterState,
        file: &mut File,
        draft: EntryDraft,
    ) -> Result<LedgerEntry, LedgerError> {
        // Another process may have appended since our cached state; the
        // tail of the locked file is the truth for this file.
        if let Some((last_seq, last_hash)) = read_tail(file, &state.active_file)? {
            state.next_seq = last_seq + 1;
            state.tip_hash = last_hash;
        }

        let seq = state.next_seq;
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let prev_hash = state.tip_hash.clone();

        let canonical = canonical_bytes(
            seq,
            &ts,
            &draft.session_id,
            &draft.role,
            &draft.action,
            &draft.payload_hash,
            &prev_hash,
            &draft.config_hash,
        );
        let signature = self.signer.sign(&canonical);

        let mut chained = canonical;
        chained.extend_from_slice(signature.as_bytes());
        let this_hash = sha256_hex(&chained);

        let entry = LedgerEntry {
            seq,
            ts,
            session_id: draft.session_id,
            role: draft.role,
            action: draft.action,
            payload_hash: draft.payload_hash,
            prev_hash,
            this_hash: this_hash.clone(),
            signature,
            signer_key_id: self.signer.key_id().to_string(),
            config_hash: draft.config_hash,
            soft_signals: draft.soft_signals,
            hard_actions: draft.hard_actions,
            temperature: draft.temperature,
            payload: draft.payload,
        };

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        file.seek(SeekFrom::End(0))?;
        file.write_all(&line)?;
        file.sync_data()?;

        state.next_seq = seq + 1;
        state.tip_hash = this_hash;

        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.insert(&entry) {
                tracing::warn!(seq = entry.seq, error = %err, "mirror insert failed");
            }
        }
        Ok(entry)
    }

    fn rotate_if_needed(
        &self,
        state: &mut WriterState,
        last: &LedgerEntry,
    ) -> Result<(), LedgerError> {
        let Some(limit) = self.rotate_at else {
            return Ok(());
        };
        if last.action == ROLLOVER_ACTION {
            return Ok(());
        }
        let size = std::fs::metadata(&state.active_file)?.len();
        if size <= limit {
            return Ok(());
        }

        let next_name = next_chain_file(&state.active_file);
        let payload = json!({ "next_file": next_name });
        let draft = EntryDraft {
            session_id: last.session_id.clone(),
            role: "Ledger".to_string(),
            action: ROLLOVER_ACTION.to_string(),
            payload_hash: canonical_payload_hash(&payload),
            config_hash: last.config_hash.clone(),
            soft_signals: None,
            hard_actions: None,
            temperature: None,
            payload: Some(payload),
        };
        self.append_locked(state, draft)?;

        let next_path = self.dir.join(&next_name);
        File::create(&next_path)?;
        state.active_file = next_path;
        tracing::info!(file = next_name, "ledger rotated");
        Ok(())
    }

    /// Reads every entry across the rollover chain, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is unreadable or a line unparseable.
    pub fn read_all(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut entries = Vec::new();
        for path in chain_files(&self.dir)? {
            let file = File::open(&path)?;
            file.lock_shared()?;
            let mut text = String::new();
            let mut reader = &file;
            reader.read_to_string(&mut text)?;
            let _ = FileExt::unlock(&file);

            for (index, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: LedgerEntry =
                    serde_json::from_str(line).map_err(|err| LedgerError::CorruptTail {
                        file: path.display().to_string(),
                        line: index + 1,
                        reason: err.to_string(),
                    })?;
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

/// Reads the last complete entry of `file`, if any.
fn read_tail(file: &mut File, path: &Path) -> Result<Option<(u64, String)>, LedgerError> {
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(None);
    }
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start))?;
    let mut window = String::new();
    file.read_to_string(&mut window)?;

    let Some(last_line) = window.lines().rev().find(|l| !l.trim().is_empty()) else {
        return Ok(None);
    };
    let entry: LedgerEntry =
        serde_json::from_str(last_line).map_err(|err| LedgerError::CorruptTail {
            file: path.display().to_string(),
            line: 0,
            reason: err.to_string(),
        })?;
    Ok(Some((entry.seq, entry.this_hash)))
}

/// Walks the rollover chain from `audit.jsonl` and returns the writer
/// state for the final file.
fn walk_chain(dir: &Path) -> Result<WriterState, LedgerError> {
    let mut active = dir.join(LEDGER_FILE);
    let mut next_seq = 0u64;
    let mut tip_hash = GENESIS_HASH.to_string();

    loop {
        if !active.exists() {
            break;
        }
        let text = std::fs::read_to_string(&active)?;
        let mut rollover_target: Option<String> = None;

        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: LedgerEntry =
                serde_json::from_str(line).map_err(|err| LedgerError::CorruptTail {
                    file: active.display().to_string(),
                    line: index + 1,
                    reason: err.to_string(),
                })?;
            next_seq = entry.seq + 1;
            tip_hash = entry.this_hash.clone();
            rollover_target = if entry.action == ROLLOVER_ACTION {
                entry
                    .payload
                    .as_ref()
                    .and_then(|p| p.get("next_file"))
                    .and_then(|v| v.as_str())
                    .map(ToString::to_string)
            } else {
                None
            };
        }

        match rollover_target {
            Some(name) => active = dir.join(name),
            None => break,
        }
    }

    Ok(WriterState {
        active_file: active,
        next_seq,
        tip_hash,
    })
}

/// Lists the chain files in order, following rollover links.
pub(crate) fn chain_files(dir: &Path) -> Result<Vec<PathBuf>, LedgerError> {
    let mut files = Vec::new();
    let mut current = dir.join(LEDGER_FILE);

    while current.exists() {
        files.push(current.clone());
        let text = std::fs::read_to_string(&current)?;
        let next = text
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .and_then(|line| serde_json::from_str::<LedgerEntry>(line).ok())
            .filter(|entry| entry.action == ROLLOVER_ACTION)
            .and_then(|entry| {
                entry
                    .payload
                    .as_ref()
                    .and_then(|p| p.get("next_file"))
                    .and_then(|v| v.as_str())
                    .map(ToString::to_string)
            });
        match next {
            Some(name) => current = dir.join(name),
            None => break,
        }
    }
    Ok(files)
}

/// Derives the next rollover filename (`audit.jsonl` -> `audit-0001.jsonl`
/// -> `audit-0002.jsonl` ...).
fn next_chain_file(current: &Path) -> String {
    let stem = current
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(LEDGER_FILE);
    let index = stem
        .strip_prefix("audit-")
        .and_then(|rest| rest.strip_suffix(".jsonl"))
        .and_then(|digits| digits.parse::<u32>().ok())
        .unwrap_or(0);
    format!("audit-{:04}.jsonl", index + 1)
}

#[cfg(test)]
mod unit_tests {
    use tempfile::TempDir;

    use super::*;
    use crate::crypto::SignerConfig;

    fn open_ledger(dir: &Path, options: &LedgerOptions) -> Ledger {
        let signer = LedgerSigner::open(dir.join("keys"), &SignerConfig::default()).unwrap();
        Ledger::open(dir.join("ledger"), signer, options).unwrap()
    }

    fn draft(session: &str, action: &str) -> EntryDraft {
        EntryDraft::new(session, "Strategist", action, "ab".repeat(32), "sha256:cfg")
    }

    #[test]
    fn test_append_builds_chain() {
        let dir = TempDir::new().unwrap();
        let ledger = open_ledger(dir.path(), &LedgerOptions::default());

        let first = ledger.append(draft("s-1", "generate_strategy")).unwrap();
        let second = ledger.append(draft("s-1", "validate_strategy")).unwrap();

        assert_eq!(first.seq, 0);
        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.seq, 1);
        assert_eq!(second.prev_hash, first.this_hash);
        assert_eq!(first.computed_this_hash(), first.this_hash);
    }

    #[test]
    fn test_reopen_resumes_chain() {
        let dir = TempDir::new().unwrap();
        let first = {
            let ledger = open_ledger(dir.path(), &LedgerOptions::default());
            ledger.append(draft("s-1", "generate_strategy")).unwrap()
        };

        let ledger = open_ledger(dir.path(), &LedgerOptions::default());
        let second = ledger.append(draft("s-1", "validate_strategy")).unwrap();
        assert_eq!(second.seq, 1);
        assert_eq!(second.prev_hash, first.this_hash);
    }

    #[test]
    fn test_public_key_published() {
        let dir = TempDir::new().unwrap();
        let _ledger = open_ledger(dir.path(), &LedgerOptions::default());
        assert!(dir.path().join("ledger").join(PUBLIC_KEY_FILE).exists());
    }

    #[test]
    fn test_mirror_tracks_appends() {
        let dir = TempDir::new().unwrap();
        let ledger = open_ledger(dir.path(), &LedgerOptions::default());
        ledger.append(draft("s-1", "generate_strategy")).unwrap();
        ledger.append(draft("s-2", "generate_strategy")).unwrap();

        let mirror = ledger.mirror.as_ref().unwrap();
        assert_eq!(mirror.count().unwrap(), 2);
        assert_eq!(mirror.session_actions("s-2").unwrap().len(), 1);
    }

    #[test]
    fn test_rotation_writes_rollover_link() {
        let dir = TempDir::new().unwrap();
        let options = LedgerOptions {
            rotate_at_bytes: Some(512),
            mirror: false,
        };
        let ledger = open_ledger(dir.path(), &options);
        for _ in 0..4 {
            ledger.append(draft("s-1", "generate_strategy")).unwrap();
        }

        let files = chain_files(&dir.path().join("ledger")).unwrap();
        assert!(files.len() >= 2, "expected a rotated chain, got {files:?}");

        // The chain stays continuous across files.
        let entries = ledger.read_all().unwrap();
        for pair in entries.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].this_hash);
            assert_eq!(pair[1].seq, pair[0].seq + 1);
        }
        assert!(entries.iter().any(|e| e.action == ROLLOVER_ACTION));
    }

    #[test]
    fn test_read_all_in_order() {
        let dir = TempDir::new().unwrap();
        let ledger = open_ledger(dir.path(), &LedgerOptions::default());
        for action in ["a", "b", "c"] {
            ledger.append(draft("s-1", action)).unwrap();
        }
        let entries = ledger.read_all().unwrap();
        let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["a", "b", "c"]);
    }
}
