//! Quality oracle capability
//!
//! The oracle is the external reasoning service behind the reflector and the
//! curator. It is reached through the narrow [`QualityOracle`] trait so the
//! loop can run against [`LlmOracle`] in production and [`ScriptedOracle`]
//! in tests and offline replays.

mod llm;
mod response;
mod scripted;

pub use llm::LlmOracle;
pub use response::{ParseErrorKind, ParseFailure, extract_json_from_response, parse_oracle_json, truncate_chars};
pub use scripted::{OracleCall, OracleCallKind, ScriptedOracle};

use async_trait::async_trait;

use crate::error::Result;

/// External reasoning service used for analysis and change synthesis
///
/// Responses are untrusted text; see `parse_oracle_json`.
#[async_trait]
pub trait QualityOracle: Send + Sync {
    /// Identifier recorded in report and changeset metadata
    fn model(&self) -> &str;

    /// Analytical request (quality analysis)
    async fn analyze(&self, system_prompt: &str, user_payload: &str) -> Result<String>;

    /// Generative request (changeset synthesis)
    async fn synthesize(&self, system_prompt: &str, user_payload: &str) -> Result<String>;
}
