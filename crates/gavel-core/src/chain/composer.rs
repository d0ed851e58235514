//! Final execution report composition.

use crate::artifact::validate::severity_label;
use crate::artifact::Registry;

/// Composes the markdown execution summary stitched from the registry.
#[must_use]
pub fn compose_final_report(objective: &str, registry: &Registry) -> String {
    let mut lines = Vec::new();
    lines.push("# Execution Summary".to_string());
    lines.push(format!("Objective: {objective}"));

    if !registry.strategies.is_empty() {
        lines.push("\n## Strategy (S)".to_string());
        for item in &registry.strategies {
            lines.push(format!("- {}: {}", item.s_id, item.title));
        }
    }
    if !registry.analyses.is_empty() {
        lines.push("\n## Analysis (A)".to_string());
        for item in &registry.analyses {
            lines.push(format!("- {} -> refs {:?}", item.a_id, item.s_refs));
        }
    }
    if !registry.productions.is_empty() {
        lines.push("\n## Production Assets (P)".to_string());
        for item in &registry.productions {
            lines.push(format!(
                "- {} [{}], refs {:?}",
                item.p_id,
                serde_json::to_string(&item.spec_type).unwrap_or_default().trim_matches('"'),
                item.a_refs
            ));
        }
    }
    if !registry.courier_rows.is_empty() {
        lines.push("\n## Schedule (C)".to_string());
        for item in &registry.courier_rows {
            lines.push(format!(
                "- {} {} via {} -> {} (target {})",
                item.day, item.time, item.channel, item.p_id, item.kpi_target
            ));
        }
    }
    if !registry.critiques.is_empty() {
        lines.push("\n## Critic Findings (X)".to_string());
        for item in &registry.critiques {
            lines.push(format!(
                "- {} severity={} issue: {}",
                item.x_id,
                severity_label(item.severity),
                item.issue
            ));
        }
    }
    if !registry.qa_notes.is_empty() {
        lines.push("\n## Clarifications".to_string());
        for note in &registry.qa_notes {
            lines.push(format!(
                "- {} -> {}: Q: {} | A: {}",
                note.asker, note.responder, note.question, note.answer
            ));
        }
    }
    lines.join("\n")
}
