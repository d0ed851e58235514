//! Directive texts and role system prompt composition.
//!
//! Directive markdown files live under `protocol/`; each role's system
//! prompt is composed from its role prompt file, a set of one-line
//! directive briefings, one full directive text, and the collaboration
//! contract. Role prompt files follow the `<domain>/<role>_stable.txt`
//! convention with a declared default domain as fallback; a missing
//! default is fatal at session start.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::ConfigError;
use crate::domain::{Domain, Role};

/// The directive groups, keyed by briefing id.
const DIRECTIVE_FILES: [(&str, &str); 6] = [
    ("change_control", "protocol/00_change_control.md"),
    ("core", "protocol/01_core_directives.md"),
    ("execution", "protocol/02_execution_addendum.md"),
    ("authority", "protocol/03_authority_layer.md"),
    ("taes", "protocol/04_taes_evaluation.md"),
    ("redteam", "protocol/05_redteam_layer.md"),
];

/// One-line briefings injected into every composed prompt.
fn briefing(key: &str) -> Option<&'static str> {
    match key {
        "change_control" => Some(
            "Observe change control: record kernel modifications, keep directive parity, rollback authority stays with the operator.",
        ),
        "core" => Some(
            "Enforce the core directives: truth discipline, logic integrity, contradiction detection.",
        ),
        "execution" => Some(
            "Apply the execution addendum: objective grounding, measurable targets, clean hand-offs.",
        ),
        "authority" => Some(
            "Respect the authority layer: operator supremacy, bounded autonomy, immutable ledger.",
        ),
        "taes" => Some(
            "Use TAES: weigh logical, practical, and probable; high disparity triggers a reconciliation pass.",
        ),
        "redteam" => Some(
            "Red-team your own output: falsifications, residual risk, structured dissent.",
        ),
        _ => None,
    }
}

/// Collaboration contract appended to every role system prompt so roles
/// produce complementary artifacts with cross-role traceability.
const COLLAB_CONTRACT: &str = "\nCollaboration Contract:\n\
    - Build on prior roles; do not restate their sections.\n\
    - Introduce new artifacts and assign stable IDs (S-1, A-1, P-1, C-1).\n\
    - Cross-reference upstream IDs wherever applicable.\n\
    - Prefer depth and specificity over general prose.\n";

/// Which briefings each role receives, plus the one directive it gets in
/// full, plus its sampling temperature. Strategist/Analyst/Critic run low
/// (favor structure); Producer/Courier run medium.
const fn role_config(role: Role) -> (&'static [&'static str], &'static str, f32) {
    match role {
        Role::Strategist => (
            &["change_control", "core", "execution"],
            "core",
            0.30,
        ),
        Role::Analyst => (&["change_control", "core", "taes"], "taes", 0.20),
        Role::Producer => (
            &["change_control", "execution", "core"],
            "execution",
            0.65,
        ),
        Role::Courier => (
            &["change_control", "execution", "authority"],
            "authority",
            0.35,
        ),
        Role::Critic => (
            &["change_control", "core", "redteam", "taes", "authority"],
            "redteam",
            0.25,
        ),
    }
}

/// The sampling temperature for a role's main turn.
#[must_use]
pub fn role_temperature(role: Role) -> f32 {
    role_config(role).2
}

/// Temperature used for strict re-prompts regardless of role.
pub const STRICT_TEMPERATURE: f32 = 0.2;

/// Loaded directive texts keyed by briefing id. Missing files load as a
/// visible sentinel so composed prompts show exactly what was absent.
#[derive(Debug, Clone)]
pub struct DirectiveSet {
    texts: BTreeMap<&'static str, String>,
}

impl DirectiveSet {
    /// Loads the directive files under `base_dir`.
    #[must_use]
    pub fn load(base_dir: &Path) -> Self {
        let mut texts = BTreeMap::new();
        for (key, rel_path) in DIRECTIVE_FILES {
            let path = base_dir.join(rel_path);
            let text = std::fs::read_to_string(&path)
                .unwrap_or_else(|_| format!("[missing: {rel_path}]"));
            texts.insert(key, text);
        }
        Self { texts }
    }

    /// The full text for one directive group.
    #[must_use]
    pub fn full_text(&self, key: &str) -> Option<&str> {
        self.texts.get(key).map(String::as_str)
    }
}

/// Composes the system prompt for one role: role prompt, briefings, one
/// full directive, collaboration contract.
#[must_use]
pub fn system_for(role: Role, role_prompt: &str, directives: &DirectiveSet) -> String {
    let (briefings, full_key, _) = role_config(role);
    let mut sections = Vec::with_capacity(briefings.len() + 3);

    let trimmed = role_prompt.trim();
    if !trimmed.is_empty() {
        sections.push(trimmed.to_string());
    }
    for key in briefings {
        if let Some(line) = briefing(key) {
            sections.push(line.to_string());
        }
    }
    if let Some(full) = directives.full_text(full_key) {
        sections.push(format!(
            "{0}\nFULL DIRECTIVE: {1}\n{0}\n{2}",
            "=".repeat(72),
            full_key.to_uppercase(),
            full
        ));
    }
    sections.push(COLLAB_CONTRACT.to_string());
    sections.join("\n\n")
}

/// The five role prompts resolved for a session's domain.
#[derive(Debug, Clone)]
pub struct RolePrompts {
    prompts: BTreeMap<Role, String>,
    /// The domain each prompt actually came from (fallback visibility).
    pub resolved_domain: BTreeMap<Role, Domain>,
}

impl RolePrompts {
    /// Loads `<roles_dir>/<domain>/<role>_stable.txt` for every role,
    /// falling back to `default_domain` per role. A role missing from both
    /// is fatal at session start.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRolePrompt`] naming the first role
    /// that cannot be resolved.
    pub fn load(
        roles_dir: &Path,
        domain: Domain,
        default_domain: Domain,
    ) -> Result<Self, ConfigError> {
        let mut prompts = BTreeMap::new();
        let mut resolved_domain = BTreeMap::new();

        for role in Role::ALL {
            let file_name = format!("{}_stable.txt", role.file_stem());
            let primary = roles_dir.join(domain.as_str()).join(&file_name);
            let (text, from) = if let Ok(text) = std::fs::read_to_string(&primary) {
                (text, domain)
            } else {
                let fallback = roles_dir.join(default_domain.as_str()).join(&file_name);
                match std::fs::read_to_string(&fallback) {
                    Ok(text) => {
                        if domain != default_domain {
                            tracing::debug!(
                                role = %role,
                                domain = %domain,
                                "role prompt missing; using default domain"
                            );
                        }
                        (text, default_domain)
                    },
                    Err(_) => {
                        return Err(ConfigError::MissingRolePrompt {
                            role: role.to_string(),
                            domain: domain.to_string(),
                            default_domain: default_domain.to_string(),
                        });
                    },
                }
            };
            prompts.insert(role, text);
            resolved_domain.insert(role, from);
        }

        Ok(Self {
            prompts,
            resolved_domain,
        })
    }

    /// The prompt text for `role`.
    #[must_use]
    pub fn prompt(&self, role: Role) -> &str {
        self.prompts.get(&role).map_or("", String::as_str)
    }
}
