//! Redundancy guard: trigram Jaccard similarity against upstream outputs.
//!
//! A role restating upstream prose instead of adding its own artifacts
//! scores high here; above the threshold a soft `REDUNDANCY` signal is
//! attached to the turn.

use std::collections::BTreeSet;

/// Similarity above this attaches the soft signal.
pub const REDUNDANCY_THRESHOLD: f64 = 0.55;

/// Shingle size.
const NGRAM: usize = 3;

fn shingles(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < NGRAM {
        return BTreeSet::new();
    }
    tokens.windows(NGRAM).map(|w| w.join(" ")).collect()
}

/// Trigram Jaccard similarity of `current` against the union of all
/// `prior` texts. 0.0 means no overlap, 1.0 complete overlap.
#[must_use]
pub fn redundancy_score(current: &str, prior: &[String]) -> f64 {
    if current.is_empty() || prior.is_empty() {
        return 0.0;
    }
    let current_set = shingles(current);
    if current_set.is_empty() {
        return 0.0;
    }
    let mut prior_union = BTreeSet::new();
    for text in prior {
        prior_union.extend(shingles(text));
    }
    if prior_union.is_empty() {
        return 0.0;
    }

    let intersection = current_set.intersection(&prior_union).count();
    let union = current_set.union(&prior_union).count();
    #[allow(clippy::cast_precision_loss)]
    {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_identical_text_scores_high() {
        let text = "post the before and after photos on the neighborhood board each morning";
        let score = redundancy_score(text, &[text.to_string()]);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_text_scores_zero() {
        let score = redundancy_score(
            "schedule rows with channels and kpi targets for the week",
            &["database schema with primary keys and foreign constraints".to_string()],
        );
        assert!(score < 0.1);
    }

    #[test]
    fn test_empty_inputs_score_zero() {
        assert!(redundancy_score("", &["x".to_string()]) < f64::EPSILON);
        assert!(redundancy_score("x y z", &[]) < f64::EPSILON);
    }

    #[test]
    fn test_partial_overlap_between_bounds() {
        let upstream = "post the before and after photos on the neighborhood board each morning \
                        and track replies in the shared sheet";
        let downstream = "post the before and after photos on the community page, then draft \
                          three new headline variants and one proof bullet for each";
        let score = redundancy_score(downstream, &[upstream.to_string()]);
        assert!(score > 0.0 && score < REDUNDANCY_THRESHOLD);
    }
}
