//! Oracle backed by a chat-completions endpoint

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::OracleConfig;
use crate::error::Result;
use crate::llm::{FinishReason, LlmClient, Message};

use super::QualityOracle;

/// Quality oracle over [`LlmClient`]
///
/// Analysis runs cooler than synthesis; both temperatures come from
/// [`OracleConfig`].
#[derive(Debug, Clone)]
pub struct LlmOracle {
    client: LlmClient,
    analysis_temperature: f32,
    synthesis_temperature: f32,
}

impl LlmOracle {
    /// Build from configuration, resolving the credential eagerly
    ///
    /// Fails with [`crate::Error::MissingCredential`] when no key is set, so a
    /// misconfigured run stops before any loop iteration.
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = config.require_api_key()?;
        let client = LlmClient::new(config.clone(), api_key)?;
        info!(model = %client.model(), "Quality oracle ready");
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: LlmClient, config: &OracleConfig) -> Self {
        Self {
            client,
            analysis_temperature: config.analysis_temperature,
            synthesis_temperature: config.synthesis_temperature,
        }
    }

    async fn request(&self, system_prompt: &str, user_payload: &str, temperature: f32) -> Result<String> {
        let messages = vec![Message::system(system_prompt), Message::user(user_payload)];
        let response = self.client.complete(messages, temperature).await?;

        if response.finish_reason == FinishReason::Length {
            warn!(
                tokens = response.tokens_used,
                "Oracle response hit the token limit and may be truncated"
            );
        }

        Ok(response.content)
    }
}

#[async_trait]
impl QualityOracle for LlmOracle {
    fn model(&self) -> &str {
        self.client.model()
    }

    async fn analyze(&self, system_prompt: &str, user_payload: &str) -> Result<String> {
        self.request(system_prompt, user_payload, self.analysis_temperature)
            .await
    }

    async fn synthesize(&self, system_prompt: &str, user_payload: &str) -> Result<String> {
        self.request(system_prompt, user_payload, self.synthesis_temperature)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_with_client_uses_config_temperatures() {
        let config = OracleConfig {
            model: "test/model".to_string(),
            analysis_temperature: 0.1,
            synthesis_temperature: 0.7,
            ..OracleConfig::default()
        };
        let client = LlmClient::new(config.clone(), "key").unwrap();
        let oracle = LlmOracle::with_client(client, &config);

        assert_eq!(oracle.model(), "test/model");
        assert_eq!(oracle.analysis_temperature, 0.1);
        assert_eq!(oracle.synthesis_temperature, 0.7);
    }

    #[test]
    fn test_key_in_config_is_refused() {
        let config = OracleConfig {
            api_key: Some("sk-in-file".to_string()),
            ..OracleConfig::default()
        };
        let result = LlmOracle::from_config(&config);
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
