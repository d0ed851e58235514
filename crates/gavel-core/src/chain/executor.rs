//! One role turn: compose prompt, call the LLM, parse the fenced JSON
//! payload, check banned shapes, validate, and retry once in strict mode.
//!
//! The turn is a bounded state machine
//! `{initial, awaiting_llm, parsed, validated, strict_retry, failed}`;
//! there is exactly one transport retry and one strict re-prompt, never
//! more.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

use crate::config::RoleShapes;
use crate::directive::{role_temperature, STRICT_TEMPERATURE};
use crate::domain::Role;
use crate::llm::{LlmClient, LlmError};

/// States of the role turn machine, recorded for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecState {
    /// Turn created, nothing sent yet.
    Initial,
    /// Waiting on the model.
    AwaitingLlm,
    /// Raw text parsed into a JSON payload.
    Parsed,
    /// Payload validated into typed artifacts.
    Validated,
    /// First attempt rejected; strict re-prompt issued.
    StrictRetry,
    /// Both attempts rejected.
    Failed,
}

/// Terminal failure of a role turn.
#[derive(Debug, Error)]
pub enum RoleFailure {
    /// The provider failed twice.
    #[error("transport error after retry: {message}")]
    Transport {
        /// Provider failure detail.
        message: String,
    },

    /// Output failed parse/shape/validation twice; carries the reason of
    /// the final attempt and the raw text for the failure ledger entry.
    #[error("role output rejected after strict retry: {reason}")]
    Rejected {
        /// Why the final attempt was rejected.
        reason: String,
        /// The final raw response text.
        raw: String,
    },

    /// The role exceeded its soft time budget.
    #[error("role timed out after {elapsed_ms} ms (budget {budget_ms} ms)")]
    Timeout {
        /// Elapsed milliseconds.
        elapsed_ms: u64,
        /// Budget milliseconds.
        budget_ms: u64,
    },
}

/// A successful role turn.
#[derive(Debug)]
pub struct TurnOutcome<T> {
    /// The accepted raw response text.
    pub text: String,
    /// The parsed JSON payload.
    pub value: Value,
    /// The typed artifacts produced by the validator.
    pub artifacts: T,
    /// Whether the strict re-prompt was needed.
    pub strict_retried: bool,
    /// Temperature of the accepted attempt.
    pub temperature: f32,
}

/// Maximum one-shot example bytes appended to a strict re-prompt.
const EXAMPLE_LIMIT_CHARS: usize = 800;

/// Executes single role turns with the bounded retry policy.
pub struct RoleExecutor<'a> {
    llm: &'a dyn LlmClient,
    shapes: &'a RoleShapes,
    example_dir: PathBuf,
    role_budget: Duration,
}

impl<'a> RoleExecutor<'a> {
    /// Creates an executor over the given client and shape policy.
    /// `example_dir` holds the versioned one-shot example files
    /// (`<role>.md`).
    #[must_use]
    pub fn new(
        llm: &'a dyn LlmClient,
        shapes: &'a RoleShapes,
        example_dir: PathBuf,
        role_budget: Duration,
    ) -> Self {
        Self {
            llm,
            shapes,
            example_dir,
            role_budget,
        }
    }

    /// Runs one role turn.
    ///
    /// `validate` converts the parsed payload into typed artifacts or
    /// returns the rejection reason used in the strict re-prompt.
    ///
    /// # Errors
    ///
    /// Returns a [`RoleFailure`] after the bounded retries are exhausted.
    pub fn run_turn<T, F>(
        &self,
        role: Role,
        system: &str,
        user: &str,
        validate: F,
    ) -> Result<TurnOutcome<T>, RoleFailure>
    where
        F: Fn(&Value) -> Result<T, String>,
    {
        let started = Instant::now();
        let mut state = ExecState::Initial;
        tracing::debug!(role = %role, ?state, "role turn start");

        let temperature = role_temperature(role);
        state = ExecState::AwaitingLlm;
        tracing::trace!(role = %role, ?state, "calling model");
        let text = self.call_with_retry(system, user, temperature)?;
        self.check_budget(started)?;

        match self.accept(role, &text, &validate) {
            Ok((value, artifacts)) => {
                state = ExecState::Validated;
                tracing::debug!(role = %role, ?state, "role turn accepted");
                return Ok(TurnOutcome {
                    text,
                    value,
                    artifacts,
                    strict_retried: false,
                    temperature,
                });
            },
            Err(reason) => {
                state = ExecState::StrictRetry;
                tracing::info!(role = %role, ?state, %reason, "strict re-prompt");
            },
        }

        // One strict re-prompt with a shape instruction and a miniature
        // one-shot example.
        let strict_user = self.strict_prompt(role, user);
        let text = self.call_with_retry(system, &strict_user, STRICT_TEMPERATURE)?;
        self.check_budget(started)?;

        match self.accept(role, &text, &validate) {
            Ok((value, artifacts)) => Ok(TurnOutcome {
                text,
                value,
                artifacts,
                strict_retried: true,
                temperature: STRICT_TEMPERATURE,
            }),
            Err(reason) => {
                state = ExecState::Failed;
                tracing::warn!(role = %role, ?state, %reason, "role turn failed");
                Err(RoleFailure::Rejected { reason, raw: text })
            },
        }
    }

    /// One transport retry, then surface the error.
    fn call_with_retry(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<String, RoleFailure> {
        match self.llm.complete(system, user, temperature) {
            Ok(text) => Ok(text),
            Err(LlmError::Transport(first)) => {
                tracing::warn!(error = %first, "transport error; retrying once");
                self.llm
                    .complete(system, user, temperature)
                    .map_err(|err| RoleFailure::Transport {
                        message: format!("{err} (first: {first})"),
                    })
            },
            Err(other) => Err(RoleFailure::Transport {
                message: other.to_string(),
            }),
        }
    }

    fn check_budget(&self, started: Instant) -> Result<(), RoleFailure> {
        let elapsed = started.elapsed();
        if elapsed > self.role_budget {
            return Err(RoleFailure::Timeout {
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                budget_ms: u64::try_from(self.role_budget.as_millis()).unwrap_or(u64::MAX),
            });
        }
        Ok(())
    }

    /// Shape check, parse, validate; returns the rejection reason on any
    /// miss.
    fn accept<T, F>(&self, role: Role, text: &str, validate: &F) -> Result<(Value, T), String>
    where
        F: Fn(&Value) -> Result<T, String>,
    {
        if let Some(violation) = self.shapes.violation(role, text) {
            return Err(format!("banned shape matched: {}", violation.matched));
        }
        let value = extract_role_payload(text, role.letter())?;
        let artifacts = validate(&value)?;
        Ok((value, artifacts))
    }

    fn strict_prompt(&self, role: Role, base_user: &str) -> String {
        let mut prompt = format!(
            "{base_user}\n\nSTRICT MODE: Return ONLY a JSON array in a single fenced block \
             tagged {letter} (```{letter} ... ```). No prose before, inside, or after the fence.",
            letter = role.letter()
        );
        let example_path = self.example_dir.join(format!("{}.md", role.file_stem()));
        if let Ok(example) = std::fs::read_to_string(&example_path) {
            let snippet: String = example.chars().take(EXAMPLE_LIMIT_CHARS).collect();
            prompt.push_str("\n\nExample:\n");
            prompt.push_str(&snippet);
        }
        prompt
    }
}

/// Extracts the role's JSON array payload from raw response text.
///
/// Rule: take the *first* fenced block whose tag matches the role letter;
/// if absent, fall back to the first JSON array in the text; otherwise
/// fail. Trailing narrative inside the fenced block is rejected.
///
/// # Errors
///
/// Returns the rejection reason as a string for the strict re-prompt.
pub fn extract_role_payload(text: &str, letter: char) -> Result<Value, String> {
    if let Some(inner) = first_fenced_block(text, letter) {
        return parse_exact_array(inner)
            .map_err(|reason| format!("fenced {letter} block rejected: {reason}"));
    }

    // Fallback: the first JSON array anywhere in the text.
    let Some(start) = text.find('[') else {
        return Err(format!("no fenced {letter} block and no JSON array found"));
    };
    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) if value.is_array() => Ok(value),
        Some(Ok(_)) => Err("first JSON value is not an array".to_string()),
        Some(Err(err)) => Err(format!("JSON array does not parse: {err}")),
        None => Err(format!("no fenced {letter} block and no JSON array found")),
    }
}

/// Returns the contents of the first fence tagged with `letter` (or
/// `json`, which some models substitute).
fn first_fenced_block(text: &str, letter: char) -> Option<&str> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find("```") {
        let tag_start = search_from + rel + 3;
        let rest = &text[tag_start..];
        let newline = rest.find('\n')?;
        let tag = rest[..newline].trim();
        let body_start = tag_start + newline + 1;
        let Some(body_len) = text[body_start..].find("```") else {
            return None;
        };
        if tag.eq_ignore_ascii_case(&letter.to_string()) || tag.eq_ignore_ascii_case("json") {
            return Some(&text[body_start..body_start + body_len]);
        }
        search_from = body_start + body_len + 3;
    }
    None
}

/// Parses a fence body as exactly one JSON array with nothing but
/// whitespace after it.
fn parse_exact_array(body: &str) -> Result<Value, String> {
    let trimmed = body.trim();
    let mut stream = serde_json::Deserializer::from_str(trimmed).into_iter::<Value>();
    let value = match stream.next() {
        Some(Ok(value)) => value,
        Some(Err(err)) => return Err(format!("does not parse: {err}")),
        None => return Err("fence is empty".to_string()),
    };
    if !value.is_array() {
        return Err("payload is not a JSON array".to_string());
    }
    let consumed = stream.byte_offset();
    if !trimmed[consumed..].trim().is_empty() {
        return Err("trailing narrative inside the fenced block".to_string());
    }
    Ok(value)
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::llm::MockLlm;

    fn executor<'a>(llm: &'a MockLlm, shapes: &'a RoleShapes) -> RoleExecutor<'a> {
        RoleExecutor::new(llm, shapes, PathBuf::from("/nonexistent"), Duration::from_secs(180))
    }

    fn count_validator(value: &Value) -> Result<usize, String> {
        value
            .as_array()
            .map(Vec::len)
            .ok_or_else(|| "not an array".to_string())
    }

    #[test]
    fn test_extract_tagged_fence() {
        let text = "Here you go:\n```S\n[{\"s_id\": \"S-1\"}]\n```\nThanks!";
        let value = extract_role_payload(text, 'S').unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_extract_takes_first_matching_fence() {
        let text = "```A\n[1]\n```\n```S\n[2, 3]\n```";
        let value = extract_role_payload(text, 'S').unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_trailing_narrative_rejected() {
        let text = "```S\n[{\"s_id\": \"S-1\"}]\nAs you can see this is solid.\n```";
        let err = extract_role_payload(text, 'S').unwrap_err();
        assert!(err.contains("trailing narrative"));
    }

    #[test]
    fn test_fallback_bare_array() {
        let text = "No fence, but here: [1, 2, 3] trailing prose is fine outside fences";
        let value = extract_role_payload(text, 'S').unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_no_payload_fails() {
        assert!(extract_role_payload("pure prose, no data", 'S').is_err());
    }

    #[test]
    fn test_turn_accepts_first_attempt() {
        let llm = MockLlm::from_responses(["```S\n[{}]\n```"]);
        let shapes = RoleShapes::default();
        let outcome = executor(&llm, &shapes)
            .run_turn(Role::Strategist, "sys", "user", count_validator)
            .unwrap();
        assert_eq!(outcome.artifacts, 1);
        assert!(!outcome.strict_retried);
    }

    #[test]
    fn test_strict_retry_recovers() {
        let llm = MockLlm::from_responses(["no json here at all", "```S\n[{}, {}]\n```"]);
        let shapes = RoleShapes::default();
        let outcome = executor(&llm, &shapes)
            .run_turn(Role::Strategist, "sys", "user", count_validator)
            .unwrap();
        assert_eq!(outcome.artifacts, 2);
        assert!(outcome.strict_retried);
        assert!((outcome.temperature - STRICT_TEMPERATURE).abs() < 1e-6);
    }

    #[test]
    fn test_second_rejection_is_role_failure() {
        let llm = MockLlm::from_responses(["prose", "more prose"]);
        let shapes = RoleShapes::default();
        let err = executor(&llm, &shapes)
            .run_turn(Role::Strategist, "sys", "user", count_validator)
            .unwrap_err();
        assert!(matches!(err, RoleFailure::Rejected { .. }));
    }

    #[test]
    fn test_transport_retry_then_success() {
        let llm = MockLlm::new(vec![
            Err("connection reset".to_string()),
            Ok("```S\n[{}]\n```".to_string()),
        ]);
        let shapes = RoleShapes::default();
        let outcome = executor(&llm, &shapes)
            .run_turn(Role::Strategist, "sys", "user", count_validator)
            .unwrap();
        assert_eq!(outcome.artifacts, 1);
    }

    #[test]
    fn test_double_transport_error_surfaces() {
        let llm = MockLlm::new(vec![
            Err("reset".to_string()),
            Err("reset again".to_string()),
        ]);
        let shapes = RoleShapes::default();
        let err = executor(&llm, &shapes)
            .run_turn(Role::Strategist, "sys", "user", count_validator)
            .unwrap_err();
        assert!(matches!(err, RoleFailure::Transport { .. }));
    }

    #[test]
    fn test_banned_shape_triggers_strict_retry() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("role_shapes.json");
        std::fs::write(&path, r#"{"Producer": {"banned": ["day-by-day schedule"]}}"#).unwrap();
        let shapes = RoleShapes::load(&path).unwrap();

        let llm = MockLlm::from_responses([
            "```P\n[{}]\n```\nAlso here is a day-by-day schedule.",
            "```P\n[{}, {}]\n```",
        ]);
        let outcome = executor(&llm, &shapes)
            .run_turn(Role::Producer, "sys", "user", count_validator)
            .unwrap();
        assert!(outcome.strict_retried);
        assert_eq!(outcome.artifacts, 2);
    }
}
