//! Governance coupling: converting detected signals into enforcement.
//!
//! The coupling config classifies each directive id as a hard gate or a
//! soft audit tag. Hard gates clamp the canonical IV down and floor the
//! IRD up - they can never move scores the other way. When the coupling
//! config is unavailable the kernel fails closed: every signal degrades to
//! a soft tag and `COUPLING_UNAVAILABLE` is recorded.

use serde::Serialize;

use crate::config::{CouplingConfig, DirectiveMode};
use crate::detect::Signal;
use crate::taes::TaesRecord;

/// Soft tag recorded when the coupling config could not be loaded.
pub const COUPLING_UNAVAILABLE_TAG: &str = "COUPLING_UNAVAILABLE";

/// The governance outcome for one role turn.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GovernanceOutcome {
    /// Directive ids whose hard gates triggered, sorted and deduplicated.
    pub hard_actions: Vec<String>,
    /// Directive ids recorded as soft audit tags, sorted and deduplicated.
    pub soft_signals: Vec<String>,
    /// The full fired signals with evidence, in detector order.
    pub signals: Vec<Signal>,
    /// IV before any clamps.
    pub iv_before: f64,
    /// IV after clamps; never above `iv_before`.
    pub iv_after: f64,
    /// IRD before any floors.
    pub ird_before: f64,
    /// IRD after floors; never below `ird_before`.
    pub ird_after: f64,
    /// True when the coupling config was unavailable and the turn ran
    /// fail-closed soft-only.
    pub coupling_unavailable: bool,
}

/// Applies the coupling config to a turn's fired signals, mutating the
/// TAES record in place.
///
/// Precedence: when multiple hard directives apply, the strictest cap and
/// the strictest floor win. Directive ids absent from the config are
/// treated as soft.
#[must_use]
pub fn apply_coupling(
    coupling: Option<&CouplingConfig>,
    signals: Vec<Signal>,
    taes: &mut TaesRecord,
) -> GovernanceOutcome {
    let mut outcome = GovernanceOutcome {
        iv_before: taes.iv,
        iv_after: taes.iv,
        ird_before: taes.ird,
        ird_after: taes.ird,
        coupling_unavailable: coupling.is_none(),
        ..GovernanceOutcome::default()
    };

    let mut iv_caps: Vec<f64> = Vec::new();
    let mut ird_floors: Vec<f64> = Vec::new();

    for signal in &signals {
        let directive = signal.directive.to_string();
        match coupling.and_then(|cfg| cfg.directive(signal.directive)) {
            Some(spec) if spec.mode == DirectiveMode::Hard => {
                if let Some(cap) = spec.iv_max {
                    iv_caps.push(cap);
                }
                if let Some(floor) = spec.ird_min {
                    ird_floors.push(floor);
                }
                outcome.hard_actions.push(directive);
            },
            // Soft by config, or unknown to the config, or no config at all.
            _ => outcome.soft_signals.push(directive),
        }
    }

    if outcome.coupling_unavailable {
        outcome
            .soft_signals
            .push(COUPLING_UNAVAILABLE_TAG.to_string());
    }

    outcome.hard_actions.sort();
    outcome.hard_actions.dedup();
    outcome.soft_signals.sort();
    outcome.soft_signals.dedup();

    if !outcome.hard_actions.is_empty() {
        let capped = iv_caps
            .iter()
            .fold(taes.iv, |current, cap| current.min(*cap));
        let floored = ird_floors
            .iter()
            .fold(taes.ird, |current, floor| current.max(*floor));
        taes.iv = capped;
        taes.ird = floored;
        taes.requires_reconciliation = true;
        outcome.iv_after = capped;
        outcome.ird_after = floored;
        tracing::info!(
            hard = ?outcome.hard_actions,
            iv = capped,
            ird = floored,
            "hard governance gates applied"
        );
    }

    outcome.signals = signals;
    outcome
}
