//! Role shape policy: banned phrases and patterns per role.
//!
//! Each role carries a shape policy describing output it must never emit
//! (a Producer emitting a schedule, a Courier emitting assets). A match
//! triggers a strict re-prompt; a second match is a role failure.

use std::collections::BTreeMap;
use std::path::Path;

use regex::RegexBuilder;
use serde::Deserialize;

use super::ConfigError;
use crate::domain::Role;

/// Evidence of a banned-shape match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeViolation {
    /// The role whose policy matched.
    pub role: Role,
    /// The banned phrase or pattern that matched, verbatim.
    pub matched: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawShape {
    #[serde(default)]
    banned: Vec<String>,
    #[serde(default)]
    banned_regex: Vec<String>,
}

/// The per-role banned phrase/pattern sets.
#[derive(Debug, Clone, Default)]
pub struct RoleShapes {
    shapes: BTreeMap<String, RawShape>,
}

impl RoleShapes {
    /// Loads role shapes from `path`. A missing file yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but is unreadable or invalid
    /// JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let shapes: BTreeMap<String, RawShape> =
            serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self { shapes })
    }

    /// Checks `text` against the role's banned phrases and patterns.
    ///
    /// Phrase matching is case-insensitive substring; pattern matching is
    /// case-insensitive regex. Invalid patterns are skipped with a warning
    /// rather than failing the turn.
    #[must_use]
    pub fn violation(&self, role: Role, text: &str) -> Option<ShapeViolation> {
        let spec = self
            .shapes
            .get(role.as_str())
            .or_else(|| self.shapes.get(role.file_stem()))?;

        let haystack = text.to_lowercase();
        for phrase in &spec.banned {
            if !phrase.is_empty() && haystack.contains(&phrase.to_lowercase()) {
                return Some(ShapeViolation {
                    role,
                    matched: phrase.clone(),
                });
            }
        }

        for pattern in &spec.banned_regex {
            let regex = match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(regex) => regex,
                Err(err) => {
                    tracing::warn!(role = %role, pattern, error = %err, "invalid banned_regex; skipping");
                    continue;
                },
            };
            if regex.is_match(text) {
                return Some(ShapeViolation {
                    role,
                    matched: pattern.clone(),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod unit_tests {
    use tempfile::TempDir;

    use super::*;

    fn shapes_from(json: &str) -> RoleShapes {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("role_shapes.json");
        std::fs::write(&path, json).unwrap();
        RoleShapes::load(&path).unwrap()
    }

    #[test]
    fn test_banned_phrase_case_insensitive() {
        let shapes = shapes_from(r#"{"Producer": {"banned": ["posting schedule"]}}"#);
        let hit = shapes.violation(Role::Producer, "Here is the POSTING SCHEDULE for D1-D7");
        assert_eq!(hit.unwrap().matched, "posting schedule");
    }

    #[test]
    fn test_banned_regex() {
        let shapes = shapes_from(r#"{"Courier": {"banned_regex": ["\\bnew asset\\b"]}}"#);
        assert!(shapes.violation(Role::Courier, "I drafted a new asset here").is_some());
        assert!(shapes.violation(Role::Courier, "reusing P-1 only").is_none());
    }

    #[test]
    fn test_lowercase_role_key_accepted() {
        let shapes = shapes_from(r#"{"courier": {"banned": ["fresh copy"]}}"#);
        assert!(shapes.violation(Role::Courier, "wrote fresh copy").is_some());
    }

    #[test]
    fn test_invalid_regex_skipped() {
        let shapes = shapes_from(r#"{"Critic": {"banned_regex": ["([unclosed"]}}"#);
        assert!(shapes.violation(Role::Critic, "anything at all").is_none());
    }

    #[test]
    fn test_no_policy_no_violation() {
        let shapes = RoleShapes::default();
        assert!(shapes.violation(Role::Strategist, "any text").is_none());
    }
}
