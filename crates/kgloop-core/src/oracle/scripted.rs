//! Deterministic oracle returning queued responses

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::QualityOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleCallKind {
    Analyze,
    Synthesize,
}

/// A request received by a [`ScriptedOracle`]
#[derive(Debug, Clone)]
pub struct OracleCall {
    pub kind: OracleCallKind,
    pub system_prompt: String,
    pub user_payload: String,
}

/// In-memory oracle for tests and offline replays
///
/// `analyze` and `synthesize` each pop from their own queue; an empty queue
/// is an [`Error::OracleError`].
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    analyses: Mutex<VecDeque<String>>,
    syntheses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<OracleCall>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_analysis(self, response: impl Into<String>) -> Self {
        self.push_analysis(response);
        self
    }

    pub fn with_synthesis(self, response: impl Into<String>) -> Self {
        self.push_synthesis(response);
        self
    }

    pub fn push_analysis(&self, response: impl Into<String>) {
        lock(&self.analyses).push_back(response.into());
    }

    pub fn push_synthesis(&self, response: impl Into<String>) {
        lock(&self.syntheses).push_back(response.into());
    }

    /// Every request received so far, in order
    pub fn calls(&self) -> Vec<OracleCall> {
        lock(&self.calls).clone()
    }

    fn respond(
        &self,
        kind: OracleCallKind,
        queue: &Mutex<VecDeque<String>>,
        system_prompt: &str,
        user_payload: &str,
    ) -> Result<String> {
        lock(&self.calls).push(OracleCall {
            kind,
            system_prompt: system_prompt.to_string(),
            user_payload: user_payload.to_string(),
        });

        lock(queue)
            .pop_front()
            .ok_or_else(|| Error::OracleError(format!("No scripted response left for {:?}", kind)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl QualityOracle for ScriptedOracle {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn analyze(&self, system_prompt: &str, user_payload: &str) -> Result<String> {
        self.respond(OracleCallKind::Analyze, &self.analyses, system_prompt, user_payload)
    }

    async fn synthesize(&self, system_prompt: &str, user_payload: &str) -> Result<String> {
        self.respond(OracleCallKind::Synthesize, &self.syntheses, system_prompt, user_payload)
    }
}
