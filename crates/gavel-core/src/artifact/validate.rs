//! Schema and reference-integrity validators for role outputs.
//!
//! Validators convert the parsed JSON array from a role turn into typed
//! artifacts, or return a [`ValidationError`] whose message cites the
//! offending ids verbatim. Reference-integrity errors always carry the
//! exact unknown id set so the strict re-prompt can name them.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::{
    Analysis, ArtifactKind, CourierRow, Critique, Production, Severity, Strategy,
};

/// Why a role output failed validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The payload was not a JSON array.
    #[error("{kind} payload must be a JSON array of objects")]
    NotAnArray {
        /// The expected artifact kind.
        kind: ArtifactKind,
    },

    /// The payload array was empty.
    #[error("{kind} must be a non-empty array")]
    Empty {
        /// The expected artifact kind.
        kind: ArtifactKind,
    },

    /// An element did not deserialize into the typed artifact.
    #[error("{kind}[{index}] malformed: {reason}")]
    Malformed {
        /// The expected artifact kind.
        kind: ArtifactKind,
        /// Index of the offending element.
        index: usize,
        /// Deserialization failure detail.
        reason: String,
    },

    /// An id did not match the kind's pattern.
    #[error("{kind} id does not match pattern {pattern}: {id}")]
    BadId {
        /// The artifact kind.
        kind: ArtifactKind,
        /// The expected pattern.
        pattern: &'static str,
        /// The offending id, verbatim.
        id: String,
    },

    /// Two artifacts in the slice share an id.
    #[error("duplicate {kind} id: {id}")]
    DuplicateId {
        /// The artifact kind.
        kind: ArtifactKind,
        /// The duplicated id.
        id: String,
    },

    /// A required field was empty.
    #[error("{kind} {id} has empty required field: {field}")]
    EmptyField {
        /// The artifact kind.
        kind: ArtifactKind,
        /// The artifact id.
        id: String,
        /// The empty field name.
        field: &'static str,
    },

    /// References point at ids that do not exist upstream.
    #[error("{kind} {id} has unknown {ref_kind} refs: {}", .offenders.join(", "))]
    UnknownRefs {
        /// The referring artifact kind.
        kind: ArtifactKind,
        /// The referring artifact id.
        id: String,
        /// The referenced kind.
        ref_kind: ArtifactKind,
        /// The unresolvable ids, verbatim.
        offenders: Vec<String>,
    },

    /// Courier rows used producer ids outside the declared asset list.
    #[error("Courier used undeclared assets: {{{}}}", .missing.join(", "))]
    UndeclaredAssets {
        /// The set-difference of used minus declared ids.
        missing: Vec<String>,
    },

    /// A KPI row was structurally unusable.
    #[error("A {id} kpi_table row {index} invalid: {reason}")]
    BadKpiRow {
        /// The analysis id.
        id: String,
        /// Row index.
        index: usize,
        /// What was wrong.
        reason: String,
    },

    /// Critic references collectively span too few kinds.
    #[error("X refs span only {spanned} artifact kinds; at least {required} required")]
    InsufficientRefSpan {
        /// How many kinds were spanned.
        spanned: usize,
        /// The minimum required.
        required: usize,
    },

    /// `proof_scores` did not carry exactly five numeric dimensions.
    #[error("X {id} proof_scores must have exactly 5 numeric dimensions, found {found}")]
    BadProofScores {
        /// The critique id.
        id: String,
        /// How many dimensions were found.
        found: usize,
    },
}

fn id_regex(pattern: &'static str, slot: &'static OnceLock<Regex>) -> &'static Regex {
    slot.get_or_init(|| Regex::new(pattern).expect("id pattern is valid"))
}

fn s_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    id_regex(r"^S-\d+$", &RE)
}

fn a_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    id_regex(r"^A-\d+$", &RE)
}

fn p_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    id_regex(r"^P-\d+$", &RE)
}

fn x_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    id_regex(r"^X-\d+$", &RE)
}

fn as_array(value: &Value, kind: ArtifactKind) -> Result<&Vec<Value>, ValidationError> {
    let items = value
        .as_array()
        .ok_or(ValidationError::NotAnArray { kind })?;
    if items.is_empty() {
        return Err(ValidationError::Empty { kind });
    }
    Ok(items)
}

fn typed<T: serde::de::DeserializeOwned>(
    item: &Value,
    kind: ArtifactKind,
    index: usize,
) -> Result<T, ValidationError> {
    serde_json::from_value(item.clone()).map_err(|err| ValidationError::Malformed {
        kind,
        index,
        reason: err.to_string(),
    })
}

fn unknown_refs(refs: &[String], known: &BTreeSet<String>) -> Vec<String> {
    refs.iter()
        .filter(|r| !known.contains(*r))
        .cloned()
        .collect()
}

/// Validates a Strategist payload into typed strategies.
///
/// # Errors
///
/// Returns a [`ValidationError`] citing the first structural defect.
pub fn validate_strategies(value: &Value) -> Result<Vec<Strategy>, ValidationError> {
    let kind = ArtifactKind::Strategy;
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    for (index, item) in as_array(value, kind)?.iter().enumerate() {
        let strategy: Strategy = typed(item, kind, index)?;
        if !s_id_regex().is_match(&strategy.s_id) {
            return Err(ValidationError::BadId {
                kind,
                pattern: r"S-\d+",
                id: strategy.s_id,
            });
        }
        if !seen.insert(strategy.s_id.clone()) {
            return Err(ValidationError::DuplicateId {
                kind,
                id: strategy.s_id,
            });
        }
        for (field, empty) in [
            ("title", strategy.title.trim().is_empty()),
            ("audience", strategy.audience.trim().is_empty()),
            ("hooks", strategy.hooks.is_empty()),
            ("three_step_plan", strategy.three_step_plan.is_empty()),
            ("acceptance_tests", strategy.acceptance_tests.is_empty()),
        ] {
            if empty {
                return Err(ValidationError::EmptyField {
                    kind,
                    id: strategy.s_id,
                    field,
                });
            }
        }
        out.push(strategy);
    }
    Ok(out)
}

/// Validates an Analyst payload against the existing strategy ids.
///
/// # Errors
///
/// Returns a [`ValidationError`]; unknown `s_refs` are cited verbatim.
pub fn validate_analyses(
    value: &Value,
    s_ids: &BTreeSet<String>,
) -> Result<Vec<Analysis>, ValidationError> {
    let kind = ArtifactKind::Analysis;
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    for (index, item) in as_array(value, kind)?.iter().enumerate() {
        let analysis: Analysis = typed(item, kind, index)?;
        if !a_id_regex().is_match(&analysis.a_id) {
            return Err(ValidationError::BadId {
                kind,
                pattern: r"A-\d+",
                id: analysis.a_id,
            });
        }
        if !seen.insert(analysis.a_id.clone()) {
            return Err(ValidationError::DuplicateId {
                kind,
                id: analysis.a_id,
            });
        }
        let offenders = unknown_refs(&analysis.s_refs, s_ids);
        if !offenders.is_empty() {
            return Err(ValidationError::UnknownRefs {
                kind,
                id: analysis.a_id,
                ref_kind: ArtifactKind::Strategy,
                offenders,
            });
        }
        if analysis.kpi_table.is_empty() {
            return Err(ValidationError::EmptyField {
                kind,
                id: analysis.a_id,
                field: "kpi_table",
            });
        }
        for (row_index, row) in analysis.kpi_table.iter().enumerate() {
            if row.metric.trim().is_empty() {
                return Err(ValidationError::BadKpiRow {
                    id: analysis.a_id,
                    index: row_index,
                    reason: "metric is empty".to_string(),
                });
            }
            if !row.target.is_finite() {
                return Err(ValidationError::BadKpiRow {
                    id: analysis.a_id,
                    index: row_index,
                    reason: format!("target is not a finite number: {}", row.target),
                });
            }
            if row.unit.trim().is_empty() {
                return Err(ValidationError::BadKpiRow {
                    id: analysis.a_id,
                    index: row_index,
                    reason: "unit is empty".to_string(),
                });
            }
        }
        if analysis.falsifications.is_empty() {
            return Err(ValidationError::EmptyField {
                kind,
                id: analysis.a_id,
                field: "falsifications",
            });
        }
        out.push(analysis);
    }
    Ok(out)
}

/// Validates a Producer payload against the existing analysis ids.
///
/// # Errors
///
/// Returns a [`ValidationError`]; unknown `a_refs` are cited verbatim.
pub fn validate_productions(
    value: &Value,
    a_ids: &BTreeSet<String>,
) -> Result<Vec<Production>, ValidationError> {
    let kind = ArtifactKind::Production;
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    for (index, item) in as_array(value, kind)?.iter().enumerate() {
        let production: Production = typed(item, kind, index)?;
        if !p_id_regex().is_match(&production.p_id) {
            return Err(ValidationError::BadId {
                kind,
                pattern: r"P-\d+",
                id: production.p_id,
            });
        }
        if !seen.insert(production.p_id.clone()) {
            return Err(ValidationError::DuplicateId {
                kind,
                id: production.p_id,
            });
        }
        let offenders = unknown_refs(&production.a_refs, a_ids);
        if !offenders.is_empty() {
            return Err(ValidationError::UnknownRefs {
                kind,
                id: production.p_id,
                ref_kind: ArtifactKind::Analysis,
                offenders,
            });
        }
        if production.body.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                kind,
                id: production.p_id,
                field: "body",
            });
        }
        out.push(production);
    }
    Ok(out)
}

/// Validates a Courier payload against the explicit producer asset list.
///
/// The courier sees only `producer_assets`, never the whole registry; any
/// row deploying an id outside that set fails with the exact set-difference
/// in the error.
///
/// # Errors
///
/// Returns a [`ValidationError`]; undeclared asset ids are cited verbatim.
pub fn validate_courier(
    value: &Value,
    producer_assets: &BTreeSet<String>,
) -> Result<Vec<CourierRow>, ValidationError> {
    let kind = ArtifactKind::Courier;
    let mut out = Vec::new();

    for (index, item) in as_array(value, kind)?.iter().enumerate() {
        let row: CourierRow = typed(item, kind, index)?;
        for (field, empty) in [
            ("day", row.day.trim().is_empty()),
            ("time", row.time.trim().is_empty()),
            ("channel", row.channel.trim().is_empty()),
            ("kpi_target", row.kpi_target.trim().is_empty()),
            ("owner_action", row.owner_action.trim().is_empty()),
        ] {
            if empty {
                return Err(ValidationError::EmptyField {
                    kind,
                    id: row.p_id,
                    field,
                });
            }
        }
        out.push(row);
    }

    let used: BTreeSet<String> = out.iter().map(|row| row.p_id.clone()).collect();
    let missing: Vec<String> = used.difference(producer_assets).cloned().collect();
    if !missing.is_empty() {
        return Err(ValidationError::UndeclaredAssets { missing });
    }
    Ok(out)
}

/// Minimum distinct reference kinds a critic payload must span.
pub const CRITIC_MIN_REF_SPAN: usize = 3;

/// Validates a Critic payload against every upstream id set.
///
/// # Errors
///
/// Returns a [`ValidationError`]; unknown references are cited verbatim and
/// the collective reference span must cover at least
/// [`CRITIC_MIN_REF_SPAN`] kinds.
pub fn validate_critiques(
    value: &Value,
    s_ids: &BTreeSet<String>,
    a_ids: &BTreeSet<String>,
    p_ids: &BTreeSet<String>,
    c_ids: &BTreeSet<String>,
) -> Result<Vec<Critique>, ValidationError> {
    let kind = ArtifactKind::Critique;
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut spanned: BTreeSet<ArtifactKind> = BTreeSet::new();

    for (index, item) in as_array(value, kind)?.iter().enumerate() {
        let critique: Critique = typed(item, kind, index)?;
        if !x_id_regex().is_match(&critique.x_id) {
            return Err(ValidationError::BadId {
                kind,
                pattern: r"X-\d+",
                id: critique.x_id,
            });
        }
        if !seen.insert(critique.x_id.clone()) {
            return Err(ValidationError::DuplicateId {
                kind,
                id: critique.x_id,
            });
        }
        for (ref_kind, refs, known) in [
            (ArtifactKind::Strategy, &critique.refs.s, s_ids),
            (ArtifactKind::Analysis, &critique.refs.a, a_ids),
            (ArtifactKind::Production, &critique.refs.p, p_ids),
            (ArtifactKind::Courier, &critique.refs.c, c_ids),
        ] {
            let offenders = unknown_refs(refs, known);
            if !offenders.is_empty() {
                return Err(ValidationError::UnknownRefs {
                    kind,
                    id: critique.x_id,
                    ref_kind,
                    offenders,
                });
            }
            if !refs.is_empty() {
                spanned.insert(ref_kind);
            }
        }
        if critique.proof_scores.len() != 5
            || critique.proof_scores.values().any(|v| !v.is_finite())
        {
            return Err(ValidationError::BadProofScores {
                id: critique.x_id,
                found: critique.proof_scores.len(),
            });
        }
        out.push(critique);
    }

    if spanned.len() < CRITIC_MIN_REF_SPAN {
        return Err(ValidationError::InsufficientRefSpan {
            spanned: spanned.len(),
            required: CRITIC_MIN_REF_SPAN,
        });
    }
    Ok(out)
}

/// Severity parse helper used by tests and report code.
#[must_use]
pub fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "low",
        Severity::Med => "med",
        Severity::High => "high",
    }
}

#[cfg(test)]
mod unit_tests {
    use serde_json::json;

    use super::*;

    fn s_ids() -> BTreeSet<String> {
        ["S-1", "S-2"].iter().map(ToString::to_string).collect()
    }

    fn strategy_value(id: &str) -> Value {
        json!({
            "s_id": id,
            "title": "Local proof",
            "audience": "homeowners within 10 miles",
            "hooks": ["storm season prep"],
            "three_step_plan": ["post", "respond", "book"],
            "acceptance_tests": ["5 booked jobs in 7 days"]
        })
    }

    #[test]
    fn test_validate_strategies_ok() {
        let value = json!([strategy_value("S-1"), strategy_value("S-2")]);
        let parsed = validate_strategies(&value).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_strategies_reject_empty_array() {
        assert!(matches!(
            validate_strategies(&json!([])),
            Err(ValidationError::Empty { .. })
        ));
    }

    #[test]
    fn test_strategies_reject_bad_id() {
        let value = json!([strategy_value("STRAT-1")]);
        let err = validate_strategies(&value).unwrap_err();
        assert!(err.to_string().contains("STRAT-1"));
    }

    #[test]
    fn test_strategies_reject_duplicate_id() {
        let value = json!([strategy_value("S-1"), strategy_value("S-1")]);
        assert!(matches!(
            validate_strategies(&value),
            Err(ValidationError::DuplicateId { .. })
        ));
    }

    #[test]
    fn test_analyses_unknown_ref_cited_verbatim() {
        let value = json!([{
            "a_id": "A-1",
            "s_refs": ["S-1", "S-9"],
            "kpi_table": [{"metric": "leads", "target": 25.0, "unit": "count"}],
            "falsifications": ["no response in 48h"],
            "risks": []
        }]);
        let err = validate_analyses(&value, &s_ids()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("S-9"), "message must cite the id: {message}");
        assert!(!message.contains("S-1,"));
    }

    #[test]
    fn test_analyses_kpi_row_needs_unit() {
        let value = json!([{
            "a_id": "A-1",
            "s_refs": ["S-1"],
            "kpi_table": [{"metric": "NPV", "target": 1.0, "unit": "  "}],
            "falsifications": ["IRR below 8%"]
        }]);
        assert!(matches!(
            validate_analyses(&value, &s_ids()),
            Err(ValidationError::BadKpiRow { .. })
        ));
    }

    #[test]
    fn test_productions_spec_type_enum() {
        let a_ids: BTreeSet<String> = ["A-1".to_string()].into_iter().collect();
        let value = json!([{
            "p_id": "P-1",
            "a_refs": ["A-1"],
            "spec_type": "interpretive_dance",
            "body": "x"
        }]);
        assert!(matches!(
            validate_productions(&value, &a_ids),
            Err(ValidationError::Malformed { .. })
        ));
    }

    #[test]
    fn test_courier_undeclared_assets_set_difference() {
        let declared: BTreeSet<String> =
            ["P-1", "P-2", "P-3"].iter().map(ToString::to_string).collect();
        let value = json!([
            {"day": "D1", "time": "09:00", "channel": "nextdoor", "p_id": "P-1",
             "kpi_target": "3 leads", "owner_action": "post"},
            {"day": "D2", "time": "09:00", "channel": "facebook", "p_id": "P-4",
             "kpi_target": "3 leads", "owner_action": "post"}
        ]);
        let err = validate_courier(&value, &declared).unwrap_err();
        assert_eq!(err.to_string(), "Courier used undeclared assets: {P-4}");
    }

    #[test]
    fn test_critiques_require_three_kind_span() {
        let ids: BTreeSet<String> = ["S-1".to_string()].into_iter().collect();
        let a_ids: BTreeSet<String> = ["A-1".to_string()].into_iter().collect();
        let empty = BTreeSet::new();
        let value = json!([{
            "x_id": "X-1",
            "refs": {"s": ["S-1"], "a": ["A-1"]},
            "issue": "no proof",
            "fix": "add testimonial",
            "severity": "med",
            "proof_scores": {"compliance": 80.0, "clarity": 85.0, "proof": 60.0,
                              "cta": 75.0, "tone": 90.0}
        }]);
        let err = validate_critiques(&value, &ids, &a_ids, &empty, &empty).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InsufficientRefSpan { spanned: 2, required: 3 }
        ));
    }

    #[test]
    fn test_critiques_proof_scores_need_five_dims() {
        let s: BTreeSet<String> = ["S-1".to_string()].into_iter().collect();
        let a: BTreeSet<String> = ["A-1".to_string()].into_iter().collect();
        let p: BTreeSet<String> = ["P-1".to_string()].into_iter().collect();
        let empty = BTreeSet::new();
        let value = json!([{
            "x_id": "X-1",
            "refs": {"s": ["S-1"], "a": ["A-1"], "p": ["P-1"]},
            "issue": "thin",
            "fix": "expand",
            "severity": "low",
            "proof_scores": {"clarity": 80.0}
        }]);
        let err = validate_critiques(&value, &s, &a, &p, &empty).unwrap_err();
        assert!(matches!(err, ValidationError::BadProofScores { found: 1, .. }));
    }
}
