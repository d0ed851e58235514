//! Session configuration: per-session frozen snapshots of the governance
//! config files plus their fingerprint.
//!
//! Config files are read exactly once at session start and the fingerprint
//! is captured for the session; mid-session edits never affect an in-flight
//! session. The coupling config fails *closed*: when it cannot be loaded,
//! all governance signals degrade to soft and the failure is recorded.

mod coupling;
mod fingerprint;
mod shapes;
mod weights;

pub use coupling::{CouplingConfig, DirectiveMode, DirectiveSpec};
pub use fingerprint::{compute_config_hash, fingerprint_files};
pub use shapes::{RoleShapes, ShapeViolation};
pub use weights::{AxisWeights, DomainWeights, CANONICAL_IV_WEIGHTS, RRP_WEIGHTS};

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while loading session configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading a config file.
    #[error("I/O error reading {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A config file contains invalid JSON.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// Path of the offending file.
        path: String,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// No role prompt file exists for the role, neither in the requested
    /// domain nor in the default domain.
    #[error("missing role prompt for {role} (domain {domain}, default {default_domain})")]
    MissingRolePrompt {
        /// The role whose prompt is missing.
        role: String,
        /// The requested domain.
        domain: String,
        /// The default domain that was tried as fallback.
        default_domain: String,
    },
}

/// A per-session frozen snapshot of all governance configuration.
pub struct ConfigSnapshot {
    /// Base directory the config was loaded from.
    pub base_dir: PathBuf,

    /// The governance coupling config, when it loaded cleanly.
    pub coupling: Option<CouplingConfig>,

    /// Why the coupling config failed to load, when it did.
    pub coupling_error: Option<String>,

    /// Banned phrase/pattern sets per role.
    pub shapes: RoleShapes,

    /// Per-domain TAES axis weights.
    pub weights: DomainWeights,

    /// The config fingerprint (`sha256:<hex>`) frozen for this session.
    pub config_hash: String,

    /// Non-fatal load problems (unreadable shapes or weights); the chain
    /// records each as a `config_error` ledger event.
    pub warnings: Vec<String>,
}

impl ConfigSnapshot {
    /// Loads the snapshot from `base_dir` and freezes the fingerprint.
    ///
    /// Shapes and weights fall back to empty/built-in defaults when their
    /// files are absent. The coupling config is recorded as unavailable
    /// (rather than erroring) so the chain can run fail-closed.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures other than file-not-found.
    pub fn load(base_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let config_hash = compute_config_hash(&base_dir);

        let coupling_path = base_dir.join("config/governance_coupling.json");
        let (coupling, coupling_error) = match CouplingConfig::load(&coupling_path) {
            Ok(cfg) => (Some(cfg), None),
            Err(err) => {
                tracing::warn!(
                    path = %coupling_path.display(),
                    error = %err,
                    "governance coupling unavailable; treating all signals as soft"
                );
                (None, Some(err.to_string()))
            },
        };

        let mut warnings = Vec::new();
        let shapes = RoleShapes::load(base_dir.join("config/role_shapes.json")).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "role shapes unavailable; no banned-shape checks");
            warnings.push(format!("role shapes unavailable: {err}"));
            RoleShapes::default()
        });

        let weights = DomainWeights::load(base_dir.join("config/taes_weights.json"))
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "taes weights unavailable; using built-in table");
                warnings.push(format!("taes weights unavailable: {err}"));
                DomainWeights::default()
            });

        Ok(Self {
            base_dir,
            coupling,
            coupling_error,
            shapes,
            weights,
            config_hash,
            warnings,
        })
    }

    /// Path of the directory holding role prompt files.
    #[must_use]
    pub fn roles_dir(&self) -> PathBuf {
        self.base_dir.join("roles")
    }

    /// Path of the versioned one-shot example file for a role.
    #[must_use]
    pub fn role_example_path(&self, role_stem: &str) -> PathBuf {
        self.base_dir
            .join("config/role_examples")
            .join(format!("{role_stem}.md"))
    }
}
