//! Config fingerprint: a deterministic SHA-256 over the fixed list of
//! protocol and governance files.
//!
//! The fingerprint is captured once per session and written into every
//! ledger entry so drift between the config a chain ran under and the
//! config on disk is detectable after the fact.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Sentinel hashed in place of a file that does not exist.
const MISSING_SENTINEL: &str = "[MISSING]";

/// The fixed, canonically sorted list of files covered by the fingerprint.
///
/// Only these files participate; anything else on disk is invisible to the
/// fingerprint by design.
const FINGERPRINT_FILES: [&str; 9] = [
    "config/governance_coupling.json",
    "config/role_shapes.json",
    "config/taes_weights.json",
    "protocol/00_change_control.md",
    "protocol/01_core_directives.md",
    "protocol/02_execution_addendum.md",
    "protocol/03_authority_layer.md",
    "protocol/04_taes_evaluation.md",
    "protocol/05_redteam_layer.md",
];

/// Returns the canonical sorted list of fingerprinted file paths.
#[must_use]
pub fn fingerprint_files() -> Vec<&'static str> {
    let mut files = FINGERPRINT_FILES.to_vec();
    files.sort_unstable();
    files
}

/// Computes the config fingerprint for `base_dir`.
///
/// Format: `"sha256:" + hex(SHA256(concat(path || "\0" || content)))` over
/// the canonical sorted file list, where `content` is the normalized file
/// content or `[MISSING]`. JSON files are normalized by canonical
/// key-sorted re-serialization so formatting-only edits do not change the
/// fingerprint.
#[must_use]
pub fn compute_config_hash(base_dir: &Path) -> String {
    let mut hasher = Sha256::new();
    for rel_path in fingerprint_files() {
        hasher.update(rel_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(normalized_content(&base_dir.join(rel_path), rel_path).as_bytes());
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

fn normalized_content(path: &Path, rel_path: &str) -> String {
    let Ok(content) = std::fs::read_to_string(path) else {
        if path.exists() {
            tracing::warn!(path = rel_path, "fingerprint file unreadable; hashing as missing");
        }
        return MISSING_SENTINEL.to_string();
    };

    if path.extension().is_some_and(|ext| ext == "json") {
        match serde_json::from_str::<serde_json::Value>(&content) {
            // serde_json maps preserve insertion order by default; re-parse
            // into a sorted representation for canonical output.
            Ok(value) => canonical_json(&value),
            Err(_) => content,
        }
    } else {
        content
    }
}

/// Serializes a JSON value with object keys sorted and no whitespace.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        },
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod unit_tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            compute_config_hash(dir.path()),
            compute_config_hash(dir.path())
        );
    }

    #[test]
    fn test_fingerprint_changes_when_file_appears() {
        let dir = TempDir::new().unwrap();
        let before = compute_config_hash(dir.path());

        std::fs::create_dir_all(dir.path().join("protocol")).unwrap();
        std::fs::write(dir.path().join("protocol/01_core_directives.md"), "D1: truth").unwrap();

        assert_ne!(before, compute_config_hash(dir.path()));
    }

    #[test]
    fn test_json_formatting_does_not_change_fingerprint() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        for dir in [&dir_a, &dir_b] {
            std::fs::create_dir_all(dir.path().join("config")).unwrap();
        }
        std::fs::write(
            dir_a.path().join("config/role_shapes.json"),
            r#"{"b": 1, "a": 2}"#,
        )
        .unwrap();
        std::fs::write(
            dir_b.path().join("config/role_shapes.json"),
            "{\n  \"a\": 2,\n  \"b\": 1\n}",
        )
        .unwrap();

        assert_eq!(
            compute_config_hash(dir_a.path()),
            compute_config_hash(dir_b.path())
        );
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"z": {"b": 1, "a": [3, {"y": 1, "x": 2}]}}"#).unwrap();
        assert_eq!(
            canonical_json(&value),
            r#"{"z":{"a":[3,{"x":2,"y":1}],"b":1}}"#
        );
    }

    #[test]
    fn test_file_list_is_sorted() {
        let files = fingerprint_files();
        let mut sorted = files.clone();
        sorted.sort_unstable();
        assert_eq!(files, sorted);
    }
}
