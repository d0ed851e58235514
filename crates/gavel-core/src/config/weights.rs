//! TAES axis weights.
//!
//! The canonical IV weights are fixed; domain weights shape the
//! additionally reported domain-quality aggregate and may be overridden
//! per-install via `config/taes_weights.json`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::domain::Domain;

/// Weights over the three TAES axes; expected to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisWeights {
    /// Internal consistency, premises to conclusion.
    pub logical: f64,
    /// Feasibility, constraints acknowledged.
    pub practical: f64,
    /// Human-behavior realism.
    pub probable: f64,
}

/// The canonical IV weights used for the ledger's IV field.
pub const CANONICAL_IV_WEIGHTS: AxisWeights = AxisWeights {
    logical: 0.5,
    practical: 0.35,
    probable: 0.15,
};

/// Weights for the Reality Reconciliation Pass, shifted toward `probable`.
pub const RRP_WEIGHTS: AxisWeights = AxisWeights {
    logical: 0.3,
    practical: 0.3,
    probable: 0.4,
};

impl AxisWeights {
    /// Applies the weights to the three sub-scores.
    #[must_use]
    pub fn apply(&self, logical: f64, practical: f64, probable: f64) -> f64 {
        self.logical * logical + self.practical * practical + self.probable * probable
    }

    /// True when the weights sum to 1 within floating tolerance.
    #[must_use]
    pub fn sums_to_one(&self) -> bool {
        (self.logical + self.practical + self.probable - 1.0).abs() < 1e-6
    }
}

/// Per-domain axis weights with the built-in table as default.
#[derive(Debug, Clone)]
pub struct DomainWeights {
    table: BTreeMap<Domain, AxisWeights>,
}

impl Default for DomainWeights {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(Domain::Technical, AxisWeights { logical: 0.60, practical: 0.35, probable: 0.05 });
        table.insert(Domain::Ops, AxisWeights { logical: 0.40, practical: 0.45, probable: 0.15 });
        table.insert(Domain::Marketing, AxisWeights { logical: 0.30, practical: 0.20, probable: 0.50 });
        table.insert(Domain::Creative, AxisWeights { logical: 0.35, practical: 0.25, probable: 0.40 });
        table.insert(Domain::Education, AxisWeights { logical: 0.45, practical: 0.35, probable: 0.20 });
        table.insert(Domain::Product, AxisWeights { logical: 0.40, practical: 0.40, probable: 0.20 });
        table.insert(Domain::Strategy, AxisWeights { logical: 0.45, practical: 0.35, probable: 0.20 });
        table.insert(Domain::Research, AxisWeights { logical: 0.55, practical: 0.30, probable: 0.15 });
        table.insert(Domain::Finance, AxisWeights { logical: 0.50, practical: 0.35, probable: 0.15 });
        Self { table }
    }
}

impl DomainWeights {
    /// Loads overrides from `path` on top of the built-in table.
    ///
    /// Entries that do not sum to 1 are rejected with a warning and the
    /// built-in weights kept for that domain.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but is unreadable or invalid
    /// JSON. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut weights = Self::default();
        if !path.exists() {
            return Ok(weights);
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let overrides: BTreeMap<String, AxisWeights> =
            serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                path: path.display().to_string(),
                source,
            })?;

        for (label, axis) in overrides {
            let Ok(domain) = label.parse::<Domain>() else {
                tracing::warn!(domain = %label, "unknown domain in taes weights; skipping");
                continue;
            };
            if !axis.sums_to_one() {
                tracing::warn!(domain = %label, "weights do not sum to 1; keeping built-in");
                continue;
            }
            weights.table.insert(domain, axis);
        }
        Ok(weights)
    }

    /// Returns the weights for `domain`.
    #[must_use]
    pub fn for_domain(&self, domain: Domain) -> AxisWeights {
        // The default table covers every domain, so the lookup always hits.
        self.table
            .get(&domain)
            .copied()
            .unwrap_or(CANONICAL_IV_WEIGHTS)
    }
}

#[cfg(test)]
mod unit_tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_builtin_table_sums_to_one() {
        let weights = DomainWeights::default();
        for domain in Domain::ALL {
            assert!(
                weights.for_domain(domain).sums_to_one(),
                "weights for {domain} do not sum to 1"
            );
        }
    }

    #[test]
    fn test_canonical_weights() {
        assert!(CANONICAL_IV_WEIGHTS.sums_to_one());
        let iv = CANONICAL_IV_WEIGHTS.apply(1.0, 1.0, 1.0);
        assert!((iv - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_override_applies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taes_weights.json");
        std::fs::write(
            &path,
            r#"{"finance": {"logical": 0.7, "practical": 0.2, "probable": 0.1}}"#,
        )
        .unwrap();

        let weights = DomainWeights::load(&path).unwrap();
        assert!((weights.for_domain(Domain::Finance).logical - 0.7).abs() < 1e-9);
        // Untouched domains keep the built-in values.
        assert!((weights.for_domain(Domain::Technical).logical - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_bad_sum_keeps_builtin() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taes_weights.json");
        std::fs::write(
            &path,
            r#"{"ops": {"logical": 0.9, "practical": 0.9, "probable": 0.9}}"#,
        )
        .unwrap();

        let weights = DomainWeights::load(&path).unwrap();
        assert!((weights.for_domain(Domain::Ops).practical - 0.45).abs() < 1e-9);
    }
}
