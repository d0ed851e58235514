//! The chain orchestrator.
//!
//! Drives the five roles sequentially - Strategist, Analyst, Producer,
//! Courier, Critic - with two bounded micro-Q&A exchanges, curated input
//! slices per role, TAES grading and governance coupling after every turn,
//! and one signed ledger entry per turn plus the composer entry.
//!
//! Sessions are single-threaded pipelines; a process may run many
//! sessions in parallel and they serialize only at the ledger append.
//! Cancellation is cooperative: the token is checked between role steps.

pub mod composer;
pub mod executor;
pub mod qa;
pub mod redundancy;

pub use composer::compose_final_report;
pub use executor::{extract_role_payload, ExecState, RoleExecutor, RoleFailure, TurnOutcome};
pub use qa::{run_micro_qa, QA_CHAR_LIMIT};
pub use redundancy::{redundancy_score, REDUNDANCY_THRESHOLD};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::artifact::{
    validate_analyses, validate_courier, validate_critiques, validate_productions,
    validate_strategies, Registry,
};
use crate::config::{ConfigError, ConfigSnapshot, CouplingConfig};
use crate::crypto::{sha256_hex, SignerConfig};
use crate::detect::{
    detect_ambiguity, detect_contradiction, detect_domain_misrouting, detect_fabrication,
    detect_observability_gap, detect_overconfidence, detect_secrets, detect_sycophancy, Signal,
    SignalKind,
};
use crate::directive::{system_for, DirectiveSet, RolePrompts};
use crate::domain::{Domain, DomainError, Role};
use crate::governance::{apply_coupling, GovernanceOutcome};
use crate::ledger::{EntryDraft, Ledger, LedgerError, LedgerOptions};
use crate::llm::LlmClient;
use crate::taes::{IrdLog, TaesEvaluator, TaesRecord, RECONCILIATION_THRESHOLD};

/// Temperature used for Reality Reconciliation Pass re-invocations.
const RRP_TEMPERATURE: f32 = 0.3;

/// Fatal chain errors. Role-level failures are not fatal; they land in
/// the result's `errors` list with a ledger entry.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Session configuration could not be established (missing role
    /// prompts, unreadable base dir).
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The ledger could not be opened or written.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The requested domain is not in the closed set.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Cooperative cancellation flag shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates an un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the chain stops at the next role boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Root holding `config/`, `protocol/`, and `roles/`.
    pub base_dir: PathBuf,
    /// Ledger directory (`audit.jsonl`, `public.key`, mirror).
    pub ledger_dir: PathBuf,
    /// Logs directory (`ird_log.csv`, `sessions/`).
    pub logs_dir: PathBuf,
    /// Signing key directory.
    pub key_dir: PathBuf,
    /// Domain used when none is declared, and the role-prompt fallback.
    pub default_domain: Domain,
    /// Ledger signer configuration.
    pub signer: SignerConfig,
    /// Optional ledger rotation threshold in bytes.
    pub rotate_ledger_at: Option<u64>,
    /// Soft per-role time budget.
    pub role_timeout: Duration,
    /// Run a Reality Reconciliation Pass when a turn's IRD exceeds the
    /// threshold.
    pub enable_reconciliation: bool,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self::rooted(PathBuf::from("."))
    }
}

impl ChainOptions {
    /// Derives the conventional directory layout under `base_dir`.
    #[must_use]
    pub fn rooted(base_dir: PathBuf) -> Self {
        Self {
            ledger_dir: base_dir.join("logs/ledger"),
            logs_dir: base_dir.join("logs"),
            key_dir: base_dir.join("keys"),
            base_dir,
            default_domain: Domain::Marketing,
            signer: SignerConfig::default(),
            rotate_ledger_at: None,
            role_timeout: Duration::from_secs(180),
            enable_reconciliation: false,
        }
    }
}

/// A non-fatal failure recorded on the chain result.
#[derive(Debug, Clone, Serialize)]
pub struct ChainErrorRecord {
    /// The role (or subsystem) that failed.
    pub role: String,
    /// Failure kind, matching the ledger action
    /// (`role_failure`, `transport_error`, `role_timeout`,
    /// `config_error`, `session_cancelled`).
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

/// Aggregate governance view over the whole session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GovernanceSummary {
    /// Union of hard directive ids across roles.
    pub signals: Vec<String>,
    /// Union of soft tags across roles.
    pub soft_signals: Vec<String>,
    /// True when any hard gate fired.
    pub no_go: bool,
    /// Per-role redundancy scores.
    pub redundancy: BTreeMap<String, f64>,
}

/// Everything the chain produced beyond the five raw outputs.
#[derive(Debug, Serialize)]
pub struct ChainOutcome {
    /// The session id (generated when not supplied).
    pub session_id: String,
    /// The session domain.
    pub domain: Domain,
    /// The frozen config fingerprint.
    pub config_hash: String,
    /// The artifact registry snapshot.
    pub registry: Registry,
    /// Per-role TAES records, keyed by role name.
    pub taes: BTreeMap<String, TaesRecord>,
    /// Per-role governance outcomes, keyed by role name.
    pub governance: BTreeMap<String, GovernanceOutcome>,
    /// Aggregate governance summary.
    pub governance_summary: GovernanceSummary,
    /// Per-role redundancy scores.
    pub redundancy: BTreeMap<String, f64>,
    /// The composed final report.
    pub composer: String,
    /// Non-fatal failures, in occurrence order.
    pub errors: Vec<ChainErrorRecord>,
}

/// The chain result: raw role outputs plus the structured outcome.
#[derive(Debug, Serialize)]
pub struct ChainResult {
    /// Strategist raw output (empty when the role failed).
    pub strategist: String,
    /// Analyst raw output.
    pub analyst: String,
    /// Producer raw output.
    pub producer: String,
    /// Courier raw output.
    pub courier: String,
    /// Critic raw output.
    pub critic: String,
    /// The structured outcome.
    pub results: ChainOutcome,
}

/// Mutable per-session state.
#[derive(Default)]
struct SessionState {
    registry: Registry,
    outputs: BTreeMap<Role, String>,
    prev_texts: Vec<String>,
    taes: BTreeMap<String, TaesRecord>,
    governance: BTreeMap<String, GovernanceOutcome>,
    redundancy: BTreeMap<String, f64>,
    errors: Vec<ChainErrorRecord>,
}

/// Immutable per-session grading context.
struct GradeCtx<'a> {
    evaluator: &'a TaesEvaluator,
    coupling: Option<&'a CouplingConfig>,
    domain: Domain,
    session_id: &'a str,
    config_hash: &'a str,
}

/// Runs the per-turn detectors over a role output.
fn scan_signals(
    ctx: &GradeCtx<'_>,
    state: &SessionState,
    role: Role,
    text: &str,
    redundancy: f64,
) -> Vec<Signal> {
    let mut signals = Vec::new();

    // Acceptance tests / falsifications live in the S and A slices; their
    // presence suppresses the overconfidence detector.
    let has_tests = match role {
        Role::Strategist => state
            .registry
            .strategies
            .iter()
            .any(|s| !s.acceptance_tests.is_empty()),
        Role::Analyst => state
            .registry
            .analyses
            .iter()
            .any(|a| !a.falsifications.is_empty()),
        _ => false,
    };

    signals.extend(detect_sycophancy(text));
    signals.extend(detect_contradiction(text));
    signals.extend(detect_ambiguity(text));
    signals.extend(detect_overconfidence(text, has_tests));
    signals.extend(detect_fabrication(text, ctx.domain));
    signals.extend(detect_secrets(text));
    signals.extend(detect_domain_misrouting(text, ctx.domain));
    if role == Role::Critic {
        signals.extend(detect_observability_gap(&state.registry.critiques));
    }
    if redundancy > REDUNDANCY_THRESHOLD {
        signals.push(Signal {
            kind: SignalKind::Redundancy,
            directive: SignalKind::Redundancy.directive_id(),
            evidence: format!("trigram overlap {redundancy:.3} with upstream outputs"),
        });
    }
    signals
}

/// The chain orchestrator; one instance serves many sessions.
pub struct Orchestrator {
    llm: Box<dyn LlmClient>,
    options: ChainOptions,
    ledger: Ledger,
}

impl Orchestrator {
    /// Opens the ledger and signer and readies the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error when the signing key or ledger directory is
    /// unusable.
    pub fn new(llm: Box<dyn LlmClient>, options: ChainOptions) -> Result<Self, ChainError> {
        let signer = crate::crypto::LedgerSigner::open(&options.key_dir, &options.signer)
            .map_err(LedgerError::Signer)?;
        let ledger = Ledger::open(
            &options.ledger_dir,
            signer,
            &LedgerOptions {
                rotate_at_bytes: options.rotate_ledger_at,
                mirror: true,
            },
        )?;
        Ok(Self {
            llm,
            options,
            ledger,
        })
    }

    /// The orchestrator's ledger.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The orchestrator options.
    #[must_use]
    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    /// Runs one full chain session.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal session setup problems (config,
    /// ledger); role failures are recorded in `results.errors`.
    pub fn run_chain(
        &self,
        objective: &str,
        domain: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<ChainResult, ChainError> {
        self.run_chain_cancellable(objective, domain, session_id, &CancelToken::new())
    }

    /// Runs one full chain session with a cooperative cancel token.
    ///
    /// # Errors
    ///
    /// As [`Self::run_chain`].
    #[allow(clippy::too_many_lines)]
    pub fn run_chain_cancellable(
        &self,
        objective: &str,
        domain: Option<&str>,
        session_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<ChainResult, ChainError> {
        let domain = match domain {
            Some(label) => label.parse::<Domain>()?,
            None => self.options.default_domain,
        };
        let session_id = session_id.map_or_else(
            || uuid::Uuid::new_v4().to_string(),
            ToString::to_string,
        );
        tracing::info!(%session_id, %domain, "chain session start");

        // Config is read once and the fingerprint frozen for the session.
        let snapshot = ConfigSnapshot::load(&self.options.base_dir)?;
        let prompts =
            RolePrompts::load(&snapshot.roles_dir(), domain, self.options.default_domain)?;
        let directives = DirectiveSet::load(&self.options.base_dir);
        let evaluator = TaesEvaluator::new(snapshot.weights.clone())
            .with_ird_log(IrdLog::new(self.options.logs_dir.join("ird_log.csv")));
        let executor = RoleExecutor::new(
            self.llm.as_ref(),
            &snapshot.shapes,
            snapshot.base_dir.join("config/role_examples"),
            self.options.role_timeout,
        );

        let mut state = SessionState::default();
        let ctx = GradeCtx {
            evaluator: &evaluator,
            coupling: snapshot.coupling.as_ref(),
            domain,
            session_id: &session_id,
            config_hash: &snapshot.config_hash,
        };

        if let Some(reason) = &snapshot.coupling_error {
            self.log_event(&ctx, "Config", "config_error", reason)?;
            state.errors.push(ChainErrorRecord {
                role: "Config".to_string(),
                kind: "config_error".to_string(),
                message: reason.clone(),
            });
        }
        for warning in &snapshot.warnings {
            self.log_event(&ctx, "Config", "config_error", warning)?;
            state.errors.push(ChainErrorRecord {
                role: "Config".to_string(),
                kind: "config_error".to_string(),
                message: warning.clone(),
            });
        }

        // [1/5] Strategist.
        let strategist_ok = if self.cancelled(cancel, &ctx, &mut state)? {
            false
        } else {
            let system =
                system_for(Role::Strategist, prompts.prompt(Role::Strategist), &directives);
            let user = format!(
                "ObjectiveSpec:\n{objective}\n\
                 Return ONLY a fenced JSON array tagged S with objects: \
                 {{\"s_id\", \"title\", \"audience\", \"hooks\", \"three_step_plan\", \"acceptance_tests\"}}."
            );
            let turn = executor.run_turn(Role::Strategist, &system, &user, |v| {
                validate_strategies(v).map_err(|e| e.to_string())
            });
            match turn {
                Ok(outcome) => {
                    state
                        .registry
                        .record_strategies(outcome.artifacts)
                        .expect("strategist slice is recorded once per session");
                    self.grade_turn(&ctx, &mut state, Role::Strategist, &outcome.text, outcome.temperature, &system, &user)?;
                    state.outputs.insert(Role::Strategist, outcome.text);
                    true
                },
                Err(failure) => {
                    self.record_failure(&ctx, &mut state, Role::Strategist, &failure)?;
                    false
                },
            }
        };

        // [2/5] Analyst. An upstream failure ends the pipeline; there is
        // nothing to analyze.
        let analyst_ok = strategist_ok
            && if self.cancelled(cancel, &ctx, &mut state)? {
                false
            } else {
                let system = system_for(Role::Analyst, prompts.prompt(Role::Analyst), &directives);
                let user = format!(
                    "ObjectiveSpec:\n{objective}\n\
                     S objects:\n{}\n\
                     Return ONLY a fenced JSON array tagged A with objects: \
                     {{\"a_id\", \"s_refs\", \"kpi_table\", \"falsifications\", \"risks\"}}.",
                    serde_json::to_string_pretty(&state.registry.strategies).unwrap_or_default()
                );
                let s_ids = state.registry.s_ids();
                let turn = executor.run_turn(Role::Analyst, &system, &user, |v| {
                    validate_analyses(v, &s_ids).map_err(|e| e.to_string())
                });
                match turn {
                    Ok(outcome) => {
                        state
                            .registry
                            .record_analyses(outcome.artifacts)
                            .expect("analyst slice is recorded once per session");
                        self.grade_turn(&ctx, &mut state, Role::Analyst, &outcome.text, outcome.temperature, &system, &user)?;
                        state.outputs.insert(Role::Analyst, outcome.text);
                        true
                    },
                    Err(failure) => {
                        self.record_failure(&ctx, &mut state, Role::Analyst, &failure)?;
                        false
                    },
                }
            };

        // Micro Q&A-1: Producer asks Analyst. Single turn, bounded.
        if analyst_ok && !cancel.is_cancelled() {
            let context = format!(
                "Strategy objects:\n{}\nAnalysis objects:\n{}",
                serde_json::to_string_pretty(&state.registry.strategies).unwrap_or_default(),
                serde_json::to_string_pretty(&state.registry.analyses).unwrap_or_default(),
            );
            if let Some(note) =
                run_micro_qa(self.llm.as_ref(), Role::Producer, Role::Analyst, &context)
            {
                state.registry.record_qa(note);
            }
        }

        // [3/5] Producer.
        let producer_ok = analyst_ok
            && if self.cancelled(cancel, &ctx, &mut state)? {
                false
            } else {
                let system =
                    system_for(Role::Producer, prompts.prompt(Role::Producer), &directives);
                let qa_section = state
                    .registry
                    .qa_notes
                    .iter()
                    .rev()
                    .find(|n| n.asker == "Producer")
                    .map(|note| {
                        format!(
                            "\nClarifications from {}:\nQ: {}\nA: {}\n",
                            note.responder, note.question, note.answer
                        )
                    })
                    .unwrap_or_default();
                let user = format!(
                    "ObjectiveSpec:\n{objective}\n\
                     S objects:\n{}\n\
                     A objects:\n{}\n{qa_section}\
                     Return ONLY a fenced JSON array tagged P with objects: \
                     {{\"p_id\", \"a_refs\", \"spec_type\", \"body\"}}.",
                    serde_json::to_string_pretty(&state.registry.strategies).unwrap_or_default(),
                    serde_json::to_string_pretty(&state.registry.analyses).unwrap_or_default(),
                );
                let a_ids = state.registry.a_ids();
                let turn = executor.run_turn(Role::Producer, &system, &user, |v| {
                    validate_productions(v, &a_ids).map_err(|e| e.to_string())
                });
                match turn {
                    Ok(outcome) => {
                        state
                            .registry
                            .record_productions(outcome.artifacts)
                            .expect("producer slice is recorded once per session");
                        self.grade_turn(&ctx, &mut state, Role::Producer, &outcome.text, outcome.temperature, &system, &user)?;
                        state.outputs.insert(Role::Producer, outcome.text);
                        true
                    },
                    Err(failure) => {
                        self.record_failure(&ctx, &mut state, Role::Producer, &failure)?;
                        false
                    },
                }
            };

        // Micro Q&A-2: Courier asks Producer.
        if producer_ok && !cancel.is_cancelled() {
            let context = format!(
                "Production assets:\n{}",
                serde_json::to_string_pretty(&state.registry.productions).unwrap_or_default()
            );
            if let Some(note) =
                run_micro_qa(self.llm.as_ref(), Role::Courier, Role::Producer, &context)
            {
                state.registry.record_qa(note);
            }
        }

        // [4/5] Courier: receives the explicit producer asset list, never
        // the whole registry. A courier failure does not stop the Critic.
        if producer_ok && !self.cancelled(cancel, &ctx, &mut state)? {
            let system = system_for(Role::Courier, prompts.prompt(Role::Courier), &directives);
            let assets_json =
                serde_json::to_string_pretty(&state.registry.productions).unwrap_or_default();
            let qa_section = state
                .registry
                .qa_notes
                .iter()
                .rev()
                .find(|n| n.asker == "Courier")
                .map(|note| {
                    format!(
                        "\nClarifications from {}:\nQ: {}\nA: {}\n",
                        note.responder, note.question, note.answer
                    )
                })
                .unwrap_or_default();
            let user = format!(
                "ObjectiveSpec:\n{objective}\n\
                 ASSETS TO DEPLOY (DO NOT RECREATE):\n{assets_json}\n{qa_section}\
                 Build a D1-D7 schedule using ONLY these assets. Return ONLY a fenced JSON \
                 array tagged C with objects: {{\"day\", \"time\", \"channel\", \"p_id\", \
                 \"kpi_target\", \"owner_action\"}}. Each row must reference a p_id from the \
                 assets above."
            );
            let producer_assets = state.registry.p_ids();
            let turn = executor.run_turn(Role::Courier, &system, &user, |v| {
                validate_courier(v, &producer_assets).map_err(|e| e.to_string())
            });
            match turn {
                Ok(outcome) => {
                    state
                        .registry
                        .record_courier_rows(outcome.artifacts)
                        .expect("courier slice is recorded once per session");
                    self.grade_turn(&ctx, &mut state, Role::Courier, &outcome.text, outcome.temperature, &system, &user)?;
                    state.outputs.insert(Role::Courier, outcome.text);
                },
                Err(failure) => {
                    self.record_failure(&ctx, &mut state, Role::Courier, &failure)?;
                },
            }
        }

        // [5/5] Critic: sees the full registry and must span >= 3 kinds.
        // Runs on whatever exists, including after a Courier failure.
        if producer_ok && !self.cancelled(cancel, &ctx, &mut state)? {
            let system = system_for(Role::Critic, prompts.prompt(Role::Critic), &directives);
            let user = format!(
                "ObjectiveSpec:\n{objective}\n\
                 S objects:\n{}\n\
                 A objects:\n{}\n\
                 P assets:\n{}\n\
                 C schedule:\n{}\n\
                 Return ONLY a fenced JSON array tagged X with objects: \
                 {{\"x_id\", \"refs\", \"issue\", \"fix\", \"severity\", \"proof_scores\"}}.",
                serde_json::to_string_pretty(&state.registry.strategies).unwrap_or_default(),
                serde_json::to_string_pretty(&state.registry.analyses).unwrap_or_default(),
                serde_json::to_string_pretty(&state.registry.productions).unwrap_or_default(),
                serde_json::to_string_pretty(&state.registry.courier_rows).unwrap_or_default(),
            );
            let s_ids = state.registry.s_ids();
            let a_ids = state.registry.a_ids();
            let p_ids = state.registry.p_ids();
            let c_ids = state.registry.c_ids();
            let turn = executor.run_turn(Role::Critic, &system, &user, |v| {
                validate_critiques(v, &s_ids, &a_ids, &p_ids, &c_ids).map_err(|e| e.to_string())
            });
            match turn {
                Ok(outcome) => {
                    state
                        .registry
                        .record_critiques(outcome.artifacts)
                        .expect("critic slice is recorded once per session");
                    self.grade_turn(&ctx, &mut state, Role::Critic, &outcome.text, outcome.temperature, &system, &user)?;
                    state.outputs.insert(Role::Critic, outcome.text);
                },
                Err(failure) => {
                    self.record_failure(&ctx, &mut state, Role::Critic, &failure)?;
                },
            }
        }

        // Composer: stitch the final report and close the session.
        let report = compose_final_report(objective, &state.registry);
        self.ledger.append(EntryDraft::new(
            &session_id,
            "Composer",
            "compose_report",
            sha256_hex(report.as_bytes()),
            &snapshot.config_hash,
        ))?;

        let summary = summarize_governance(&state);
        if snapshot
            .coupling
            .as_ref()
            .is_some_and(|c| c.write_governance_to_ledger)
        {
            let payload = serde_json::to_vec(&summary).unwrap_or_default();
            self.ledger.append(EntryDraft::new(
                &session_id,
                "Governance",
                "governance_summary",
                sha256_hex(&payload),
                &snapshot.config_hash,
            ))?;
        }

        let outcome = ChainOutcome {
            session_id: session_id.clone(),
            domain,
            config_hash: snapshot.config_hash.clone(),
            registry: state.registry,
            taes: state.taes,
            governance: state.governance,
            governance_summary: summary,
            redundancy: state.redundancy,
            composer: report,
            errors: state.errors,
        };
        self.write_session_artifact(&outcome);
        tracing::info!(%session_id, errors = outcome.errors.len(), "chain session complete");

        Ok(ChainResult {
            strategist: state.outputs.remove(&Role::Strategist).unwrap_or_default(),
            analyst: state.outputs.remove(&Role::Analyst).unwrap_or_default(),
            producer: state.outputs.remove(&Role::Producer).unwrap_or_default(),
            courier: state.outputs.remove(&Role::Courier).unwrap_or_default(),
            critic: state.outputs.remove(&Role::Critic).unwrap_or_default(),
            results: outcome,
        })
    }

    /// Checks the cancel token; records the cancellation once.
    fn cancelled(
        &self,
        cancel: &CancelToken,
        ctx: &GradeCtx<'_>,
        state: &mut SessionState,
    ) -> Result<bool, ChainError> {
        if !cancel.is_cancelled() {
            return Ok(false);
        }
        if !state.errors.iter().any(|e| e.kind == "session_cancelled") {
            self.log_event(ctx, "Chain", "session_cancelled", "cancel requested")?;
            state.errors.push(ChainErrorRecord {
                role: "Chain".to_string(),
                kind: "session_cancelled".to_string(),
                message: "cancel requested; chain stopped at role boundary".to_string(),
            });
        }
        Ok(true)
    }

    /// Grades a successful turn: redundancy, detectors, TAES (with an
    /// optional Reality Reconciliation Pass), governance, ledger entry.
    #[allow(clippy::too_many_arguments)]
    fn grade_turn(
        &self,
        ctx: &GradeCtx<'_>,
        state: &mut SessionState,
        role: Role,
        text: &str,
        temperature: f32,
        system: &str,
        user: &str,
    ) -> Result<(), ChainError> {
        let score = redundancy_score(text, &state.prev_texts);
        state.redundancy.insert(role.to_string(), score);
        state.prev_texts.push(text.to_string());

        let mut record = ctx
            .evaluator
            .evaluate(text, ctx.domain, ctx.session_id, role);

        // Reality Reconciliation Pass: one re-invocation with the prompt
        // grounded in human behavior, re-scored with probable-heavy
        // weights. Still-high disparity is surfaced, not blocked.
        if self.options.enable_reconciliation && record.requires_reconciliation {
            tracing::info!(role = %role, ird = record.ird, "reality reconciliation pass");
            let rrp_user = format!(
                "{user}\n\nReality check: restate with concrete human behavior, \
                 acknowledged constraints, and a fallback path."
            );
            match self.llm.complete(system, &rrp_user, RRP_TEMPERATURE) {
                Ok(revised) => {
                    let rescored = ctx.evaluator.evaluate_reconciliation(
                        &revised,
                        ctx.domain,
                        ctx.session_id,
                        role,
                    );
                    if rescored.ird > RECONCILIATION_THRESHOLD {
                        tracing::warn!(
                            role = %role,
                            ird = rescored.ird,
                            "disparity persists after reconciliation"
                        );
                    }
                    record = rescored;
                },
                Err(err) => {
                    tracing::warn!(role = %role, error = %err, "reconciliation call failed");
                },
            }
        }

        let signals = scan_signals(ctx, state, role, text, score);
        let outcome = apply_coupling(ctx.coupling, signals, &mut record);
        tracing::info!(
            role = %role,
            iv = record.iv,
            ird = record.ird,
            hard = outcome.hard_actions.len(),
            soft = outcome.soft_signals.len(),
            "turn graded"
        );

        let draft = EntryDraft::new(
            ctx.session_id,
            role.as_str(),
            role.action(),
            sha256_hex(text.as_bytes()),
            ctx.config_hash,
        )
        .with_governance(outcome.soft_signals.clone(), outcome.hard_actions.clone())
        .with_temperature(temperature);
        self.ledger.append(draft)?;

        state.taes.insert(role.to_string(), record);
        state.governance.insert(role.to_string(), outcome);
        Ok(())
    }

    /// Records a role failure: ledger entry plus result error.
    fn record_failure(
        &self,
        ctx: &GradeCtx<'_>,
        state: &mut SessionState,
        role: Role,
        failure: &RoleFailure,
    ) -> Result<(), ChainError> {
        let (kind, payload) = match failure {
            RoleFailure::Transport { message } => ("transport_error", message.clone()),
            RoleFailure::Timeout { .. } => ("role_timeout", failure.to_string()),
            RoleFailure::Rejected { raw, .. } => ("role_failure", raw.clone()),
        };
        tracing::warn!(role = %role, kind, "role failed: {failure}");

        self.ledger.append(EntryDraft::new(
            ctx.session_id,
            role.as_str(),
            kind,
            sha256_hex(payload.as_bytes()),
            ctx.config_hash,
        ))?;
        state.errors.push(ChainErrorRecord {
            role: role.to_string(),
            kind: kind.to_string(),
            message: failure.to_string(),
        });
        Ok(())
    }

    /// Writes a non-role ledger event (config error, cancellation).
    fn log_event(
        &self,
        ctx: &GradeCtx<'_>,
        role: &str,
        action: &str,
        detail: &str,
    ) -> Result<(), ChainError> {
        self.ledger.append(EntryDraft::new(
            ctx.session_id,
            role,
            action,
            sha256_hex(detail.as_bytes()),
            ctx.config_hash,
        ))?;
        Ok(())
    }

    /// Persists the opaque session artifact file; never fatal.
    fn write_session_artifact(&self, outcome: &ChainOutcome) {
        let dir = self.options.logs_dir.join("sessions");
        if let Err(err) = std::fs::create_dir_all(&dir) {
            tracing::warn!(error = %err, "cannot create sessions dir");
            return;
        }
        let path = dir.join(format!("{}.json", outcome.session_id));
        match serde_json::to_vec_pretty(outcome) {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(&path, bytes) {
                    tracing::warn!(error = %err, "cannot write session artifact");
                }
            },
            Err(err) => tracing::warn!(error = %err, "cannot serialize session artifact"),
        }
    }
}

fn summarize_governance(state: &SessionState) -> GovernanceSummary {
    let mut summary = GovernanceSummary {
        redundancy: state.redundancy.clone(),
        ..GovernanceSummary::default()
    };
    for outcome in state.governance.values() {
        summary.signals.extend(outcome.hard_actions.iter().cloned());
        summary
            .soft_signals
            .extend(outcome.soft_signals.iter().cloned());
    }
    summary.signals.sort();
    summary.signals.dedup();
    summary.soft_signals.sort();
    summary.soft_signals.dedup();
    summary.no_go = !summary.signals.is_empty();
    summary
}
