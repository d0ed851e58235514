//! Bounded micro-Q&A exchanges between adjacent roles.
//!
//! Exactly one question and one answer per exchange, both truncated to the
//! character bound. An asker that replies `NONE` skips the exchange. A
//! transport failure skips the exchange rather than failing the chain.

use crate::artifact::QaNote;
use crate::domain::Role;
use crate::llm::LlmClient;

/// Character bound on each side of the exchange.
pub const QA_CHAR_LIMIT: usize = 800;

const QUESTION_TEMPERATURE: f32 = 0.35;
const ANSWER_TEMPERATURE: f32 = 0.2;

fn truncate(text: &str) -> String {
    text.trim().chars().take(QA_CHAR_LIMIT).collect()
}

/// Runs one micro-Q&A exchange. Returns `None` when the asker needs
/// nothing or the provider fails; the chain continues either way.
#[must_use]
pub fn run_micro_qa(
    llm: &dyn LlmClient,
    asker: Role,
    responder: Role,
    context: &str,
) -> Option<QaNote> {
    let ask_system = format!("Micro-QA ({asker} asking {responder})");
    let ask_user = format!(
        "{context}\nAsk ONE clarifying question for the {responder}. \
         If none needed, reply with NONE."
    );
    let question = match llm.complete(&ask_system, &ask_user, QUESTION_TEMPERATURE) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(asker = %asker, error = %err, "micro-QA question failed; skipping");
            return None;
        },
    };
    if question.trim().to_uppercase().starts_with("NONE") {
        return None;
    }
    let question = truncate(&question);

    let answer_system = format!("Micro-QA ({responder} answering {asker})");
    let answer_user = format!("{context}\nQuestion: {question}\nProvide a short, direct answer.");
    let answer = match llm.complete(&answer_system, &answer_user, ANSWER_TEMPERATURE) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(responder = %responder, error = %err, "micro-QA answer failed; skipping");
            return None;
        },
    };

    Some(QaNote {
        asker: asker.to_string(),
        responder: responder.to_string(),
        question,
        answer: truncate(&answer),
    })
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::llm::MockLlm;

    #[test]
    fn test_exchange_records_question_and_answer() {
        let llm = MockLlm::from_responses([
            "Which asset carries the strongest proof point?",
            "P-2; it has the before/after photos.",
        ]);
        let note = run_micro_qa(&llm, Role::Courier, Role::Producer, "Assets: P-1, P-2").unwrap();
        assert_eq!(note.asker, "Courier");
        assert!(note.answer.contains("P-2"));
    }

    #[test]
    fn test_none_skips_exchange() {
        let llm = MockLlm::from_responses(["NONE"]);
        assert!(run_micro_qa(&llm, Role::Producer, Role::Analyst, "ctx").is_none());
        // The answer call never happens.
        assert_eq!(llm.remaining(), 0);
    }

    #[test]
    fn test_question_truncated_to_bound() {
        let long_question = "why ".repeat(600);
        let llm = MockLlm::from_responses([long_question, "short answer".to_string()]);
        let note = run_micro_qa(&llm, Role::Producer, Role::Analyst, "ctx").unwrap();
        assert!(note.question.chars().count() <= QA_CHAR_LIMIT);
    }

    #[test]
    fn test_transport_failure_skips() {
        let llm = MockLlm::new(vec![Err("unreachable".to_string())]);
        assert!(run_micro_qa(&llm, Role::Producer, Role::Analyst, "ctx").is_none());
    }
}
