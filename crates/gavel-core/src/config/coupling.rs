//! Governance coupling configuration.
//!
//! The coupling JSON is the single source of truth for whether a directive
//! signal is a hard gate (with an IV cap and/or IRD floor) or a soft audit
//! tag. Malformed specs are normalized with a warning rather than rejected
//! wholesale; a completely unreadable file is reported to the caller, which
//! then fails closed to soft-only behavior.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use super::ConfigError;

/// Hard gates change scores; soft signals are audit-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveMode {
    /// Clamp IV down to `iv_max` and floor IRD up to `ird_min`.
    Hard,
    /// Record the directive id under `soft_signals`; no score change.
    Soft,
}

/// Enforcement spec for one directive id.
#[derive(Debug, Clone)]
pub struct DirectiveSpec {
    /// Hard or soft classification.
    pub mode: DirectiveMode,
    /// Maximum IV permitted while this directive is triggered.
    pub iv_max: Option<f64>,
    /// Minimum IRD enforced while this directive is triggered.
    pub ird_min: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSpec {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    iv_max: Option<f64>,
    #[serde(default)]
    ird_min: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawCoupling {
    #[serde(default)]
    signals: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    write_governance_to_ledger: bool,
}

/// The normalized governance coupling configuration.
#[derive(Debug, Clone, Default)]
pub struct CouplingConfig {
    signals: BTreeMap<String, DirectiveSpec>,
    /// Whether the chain writes an aggregate governance summary entry.
    pub write_governance_to_ledger: bool,
}

impl CouplingConfig {
    /// Loads and normalizes the coupling config from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is absent, unreadable, or not JSON;
    /// the caller treats that as "coupling unavailable" and fails closed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawCoupling =
            serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                path: path.display().to_string(),
                source,
            })?;

        let mut signals = BTreeMap::new();
        for (id, value) in raw.signals {
            let Ok(spec) = serde_json::from_value::<RawSpec>(value) else {
                tracing::warn!(directive = %id, "coupling spec is not an object; skipping");
                continue;
            };
            signals.insert(id.clone(), normalize(&id, spec));
        }

        Ok(Self {
            signals,
            write_governance_to_ledger: raw.write_governance_to_ledger,
        })
    }

    /// Builds a coupling config directly from directive specs (tests,
    /// embedded defaults).
    #[must_use]
    pub fn from_specs(specs: BTreeMap<String, DirectiveSpec>) -> Self {
        Self {
            signals: specs,
            write_governance_to_ledger: false,
        }
    }

    /// Looks up the spec for a directive id.
    #[must_use]
    pub fn directive(&self, id: &str) -> Option<&DirectiveSpec> {
        self.signals.get(id)
    }

    /// True when the directive id appears in the config at all.
    #[must_use]
    pub fn knows(&self, id: &str) -> bool {
        self.signals.contains_key(id)
    }

    /// Number of configured directives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// True when no directives are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

fn normalize(id: &str, raw: RawSpec) -> DirectiveSpec {
    let mode = match raw.mode.as_deref() {
        Some("hard") | None => DirectiveMode::Hard,
        Some("soft") => DirectiveMode::Soft,
        Some(other) => {
            tracing::warn!(directive = id, mode = other, "invalid mode; defaulting to hard");
            DirectiveMode::Hard
        },
    };
    DirectiveSpec {
        mode,
        iv_max: validated_unit(id, "iv_max", raw.iv_max),
        ird_min: validated_unit(id, "ird_min", raw.ird_min),
    }
}

fn validated_unit(id: &str, field: &str, value: Option<f64>) -> Option<f64> {
    match value {
        Some(v) if (0.0..=1.0).contains(&v) => Some(v),
        Some(v) => {
            tracing::warn!(directive = id, field, value = v, "out of [0,1]; ignoring");
            None
        },
        None => None,
    }
}

#[cfg(test)]
mod unit_tests {
    use tempfile::TempDir;

    use super::*;

    fn write_coupling(contents: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("governance_coupling.json");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_hard_and_soft() {
        let (_dir, path) = write_coupling(
            r#"{
                "signals": {
                    "D3": {"mode": "hard", "iv_max": 0.68, "ird_min": 0.55},
                    "SECRETS": {"mode": "soft"}
                },
                "write_governance_to_ledger": true
            }"#,
        );
        let cfg = CouplingConfig::load(&path).unwrap();

        assert_eq!(cfg.directive("D3").unwrap().mode, DirectiveMode::Hard);
        assert_eq!(cfg.directive("SECRETS").unwrap().mode, DirectiveMode::Soft);
        assert!(cfg.write_governance_to_ledger);
        assert!(!cfg.knows("D99"));
    }

    #[test]
    fn test_invalid_mode_defaults_to_hard() {
        let (_dir, path) =
            write_coupling(r#"{"signals": {"D7": {"mode": "loud", "iv_max": 0.5}}}"#);
        let cfg = CouplingConfig::load(&path).unwrap();
        assert_eq!(cfg.directive("D7").unwrap().mode, DirectiveMode::Hard);
    }

    #[test]
    fn test_out_of_range_caps_ignored() {
        let (_dir, path) =
            write_coupling(r#"{"signals": {"D3": {"mode": "hard", "iv_max": 1.4, "ird_min": -0.2}}}"#);
        let cfg = CouplingConfig::load(&path).unwrap();
        let spec = cfg.directive("D3").unwrap();
        assert_eq!(spec.iv_max, None);
        assert_eq!(spec.ird_min, None);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let result = CouplingConfig::load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_invalid_json_is_error() {
        let (_dir, path) = write_coupling("{not json");
        assert!(matches!(
            CouplingConfig::load(&path),
            Err(ConfigError::Json { .. })
        ));
    }
}
