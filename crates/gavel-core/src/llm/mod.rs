//! LLM client abstraction.
//!
//! The kernel needs exactly one capability from a model provider: a
//! synchronous text-in/text-out completion. Retry and rate-limit policy
//! beyond the orchestrator's single per-role retry lives outside this
//! crate. Chain tests run against [`MockLlm`].

use std::collections::VecDeque;
use std::sync::Mutex;

use thiserror::Error;

/// Errors surfaced by an LLM client.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider was unreachable or returned a transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider returned an empty or unusable completion.
    #[error("empty completion from provider")]
    EmptyCompletion,

    /// The mock client ran out of scripted responses.
    #[error("mock script exhausted after {served} responses")]
    ScriptExhausted {
        /// How many responses were served before exhaustion.
        served: usize,
    },
}

/// A synchronous text-in/text-out completion client.
///
/// Implementations must be safe to share across sessions; each session
/// issues calls strictly sequentially.
pub trait LlmClient: Send + Sync {
    /// Requests a completion for the composed system and user prompts.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Transport`] for provider failures; the role
    /// executor retries once before surfacing `transport_error`.
    fn complete(&self, system: &str, user: &str, temperature: f32) -> Result<String, LlmError>;
}

/// A scripted client for tests: returns queued responses in order.
///
/// Each call pops the front of the script. An entry of `Err(msg)` raises a
/// transport error for that call, letting tests exercise retry paths.
pub struct MockLlm {
    script: Mutex<VecDeque<Result<String, String>>>,
    served: Mutex<usize>,
}

impl MockLlm {
    /// Creates a mock with the given response script.
    #[must_use]
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            served: Mutex::new(0),
        }
    }

    /// Convenience constructor: every entry is a successful response.
    #[must_use]
    pub fn from_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(responses.into_iter().map(|s| Ok(s.into())).collect())
    }

    /// Number of responses served so far.
    #[must_use]
    pub fn served(&self) -> usize {
        *self.served.lock().unwrap()
    }

    /// Number of scripted responses not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl LlmClient for MockLlm {
    fn complete(&self, _system: &str, _user: &str, _temperature: f32) -> Result<String, LlmError> {
        let next = self.script.lock().unwrap().pop_front();
        let served = {
            let mut served = self.served.lock().unwrap();
            *served += 1;
            *served
        };
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(LlmError::Transport(message)),
            None => Err(LlmError::ScriptExhausted { served: served - 1 }),
        }
    }
}
