//! TAES: tri-axis evaluation of role outputs.
//!
//! Each role output is graded on three axes in `[0,1]` - logical (internal
//! consistency), practical (feasibility), probable (human-behavior realism).
//! The graders are heuristic and fully deterministic: the same text and
//! weights always produce the same scores, which the replay tests rely on.
//!
//! Two aggregates are derived:
//!
//! - the canonical Integrity Vector,
//!   `IV = 0.5*logical + 0.35*practical + 0.15*probable`, which is what the
//!   ledger and governance clamps operate on, and
//! - a domain-weighted quality using the per-domain axis table, reported
//!   alongside.
//!
//! `IRD = max(0, 0.65 - IV) + 0.05*contradictions + 0.02*hedges` measures
//! the ideal-reality gap; above 0.5 the record is marked for one Reality
//! Reconciliation Pass.

mod ird_log;

pub use ird_log::{IrdLog, IrdLogError, IrdRow};

use serde::Serialize;

use crate::config::{AxisWeights, DomainWeights, CANONICAL_IV_WEIGHTS, RRP_WEIGHTS};
use crate::detect::{find_contradictions, hedge_count};
use crate::domain::{Domain, Role};

/// Outputs longer than this are summarized before scoring.
const SUMMARIZE_OVER_CHARS: usize = 2500;
/// Head kept by summarization, preserving framing.
const SUMMARY_HEAD_CHARS: usize = 1500;
/// Tail kept by summarization, preserving the conclusion.
const SUMMARY_TAIL_CHARS: usize = 1000;

/// IRD above this marks a record for reconciliation.
pub const RECONCILIATION_THRESHOLD: f64 = 0.5;

/// A TAES evaluation for one role turn.
#[derive(Debug, Clone, Serialize)]
pub struct TaesRecord {
    /// Logical sub-score in [0,1].
    pub logical: f64,
    /// Practical sub-score in [0,1].
    pub practical: f64,
    /// Probable sub-score in [0,1].
    pub probable: f64,
    /// Canonical Integrity Vector.
    pub iv: f64,
    /// Domain-weighted quality aggregate.
    pub domain_quality: f64,
    /// Ideal-Reality Disparity; lower is better.
    pub ird: f64,
    /// Contradictions found while scoring.
    pub contradiction_count: usize,
    /// Hedge occurrences found while scoring.
    pub hedge_count: usize,
    /// True when IRD exceeds the reconciliation threshold.
    pub requires_reconciliation: bool,
    /// The axis weights used for `domain_quality`.
    pub weights: AxisWeights,
    /// True when this record came from a Reality Reconciliation Pass.
    pub reconciled: bool,
}

/// The TAES evaluator: domain weight table plus an optional IRD log sink.
pub struct TaesEvaluator {
    weights: DomainWeights,
    ird_log: Option<IrdLog>,
}

impl TaesEvaluator {
    /// Creates an evaluator with the given weight table and no IRD log.
    #[must_use]
    pub fn new(weights: DomainWeights) -> Self {
        Self {
            weights,
            ird_log: None,
        }
    }

    /// Attaches an IRD log; every evaluation appends one row.
    #[must_use]
    pub fn with_ird_log(mut self, log: IrdLog) -> Self {
        self.ird_log = Some(log);
        self
    }

    /// Evaluates a role output for `domain`.
    pub fn evaluate(
        &self,
        text: &str,
        domain: Domain,
        session_id: &str,
        role: Role,
    ) -> TaesRecord {
        self.evaluate_inner(text, domain, session_id, role, self.weights.for_domain(domain), false)
    }

    /// Re-scores a reconciliation-pass output with weights shifted toward
    /// `probable`.
    pub fn evaluate_reconciliation(
        &self,
        text: &str,
        domain: Domain,
        session_id: &str,
        role: Role,
    ) -> TaesRecord {
        self.evaluate_inner(text, domain, session_id, role, RRP_WEIGHTS, true)
    }

    fn evaluate_inner(
        &self,
        text: &str,
        domain: Domain,
        session_id: &str,
        role: Role,
        quality_weights: AxisWeights,
        reconciled: bool,
    ) -> TaesRecord {
        let scored_text = summarize(text);
        let contradictions = find_contradictions(&scored_text);
        let hedges = hedge_count(&scored_text);

        let logical = score_logical(&scored_text, contradictions.len());
        let practical = score_practical(&scored_text);
        let probable = score_probable(&scored_text, hedges);

        let iv = round3(CANONICAL_IV_WEIGHTS.apply(logical, practical, probable));
        let domain_quality = round3(quality_weights.apply(logical, practical, probable));

        #[allow(clippy::cast_precision_loss)]
        let ird = round3(
            (0.65 - iv).max(0.0)
                + 0.05 * contradictions.len() as f64
                + 0.02 * hedges as f64,
        );

        let record = TaesRecord {
            logical,
            practical,
            probable,
            iv,
            domain_quality,
            ird,
            contradiction_count: contradictions.len(),
            hedge_count: hedges,
            requires_reconciliation: ird > RECONCILIATION_THRESHOLD,
            weights: quality_weights,
            reconciled,
        };

        if let Some(log) = &self.ird_log {
            let row = IrdRow::from_record(session_id, role, domain, &record);
            if let Err(err) = log.append(&row) {
                tracing::warn!(error = %err, "failed to append IRD log row");
            }
        }
        record
    }
}

/// Summarizes long outputs to head + tail so framing and conclusion both
/// survive scoring.
#[must_use]
pub fn summarize(text: &str) -> String {
    let total = text.chars().count();
    if total <= SUMMARIZE_OVER_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(SUMMARY_HEAD_CHARS).collect();
    let tail: String = text
        .chars()
        .skip(total - SUMMARY_TAIL_CHARS)
        .collect();
    format!("{head}\n…\n{tail}")
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn clamp_unit(value: f64) -> f64 {
    round3(value.clamp(0.0, 1.0))
}

fn contains_any(lower: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| lower.contains(n))
}

const CONNECTIVES: [&str; 6] = ["because", "therefore", "thus", "so that", "hence", "which means"];
const ENUMERATION: [&str; 6] = ["1.", "2.", "step", "first", "second", "three_step"];
const CONSTRAINT_ANCHORS: [&str; 8] = [
    "budget", "deadline", "cost", "time", "capacity", "constraint", "resource", "owner",
];
const ACTION_VERBS: [&str; 9] = [
    "post", "call", "ship", "build", "schedule", "measure", "track", "test", "book",
];
const HUMAN_ANCHORS: [&str; 8] = [
    "customer", "user", "people", "audience", "neighbor", "client", "team", "reader",
];
const CONTINGENCY: [&str; 4] = ["fallback", "otherwise", "plan b", "if leads"];

fn score_logical(text: &str, contradiction_count: usize) -> f64 {
    let lower = text.to_lowercase();
    let mut score = 0.55;
    if contains_any(&lower, &CONNECTIVES) {
        score += 0.1;
    }
    if contains_any(&lower, &ENUMERATION) {
        score += 0.1;
    }
    // Multi-sentence structure reads as premises leading to a conclusion.
    if lower.split(['.', '!', '?']).filter(|s| !s.trim().is_empty()).count() >= 3 {
        score += 0.15;
    }
    #[allow(clippy::cast_precision_loss)]
    {
        score -= 0.15 * contradiction_count as f64;
    }
    clamp_unit(score)
}

fn score_practical(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let mut score = 0.5;
    if contains_any(&lower, &CONSTRAINT_ANCHORS) {
        score += 0.15;
    }
    if lower.chars().any(|c| c.is_ascii_digit()) {
        score += 0.15;
    }
    if contains_any(&lower, &ACTION_VERBS) {
        score += 0.1;
    }
    clamp_unit(score)
}

fn score_probable(text: &str, hedges: usize) -> f64 {
    let lower = text.to_lowercase();
    let mut score = 0.55;
    if contains_any(&lower, &HUMAN_ANCHORS) {
        score += 0.15;
    }
    if contains_any(&lower, &CONTINGENCY) {
        score += 0.1;
    }
    #[allow(clippy::cast_precision_loss)]
    {
        score -= 0.02 * hedges as f64;
    }
    clamp_unit(score)
}
