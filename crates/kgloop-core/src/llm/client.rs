//! Chat completion client for the quality oracle
//!
//! Provides an async HTTP client for an OpenAI-compatible endpoint with:
//! - Per-request timeout
//! - Bounded retry with exponential backoff on transient failures
//!   (rate limits, 5xx responses, connect/timeout errors)

use std::time::Duration;

use reqwest::Client as HttpClient;
use tracing::{debug, warn};

use crate::config::OracleConfig;
use crate::error::{Error, Result};

use super::types::{ChatRequest, ChatResponse, LlmResponse, Message};

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 1000;

/// Upper bound for a single backoff sleep (in milliseconds)
const BACKOFF_MAX_MS: u64 = 60_000;

/// Chat completion client
///
/// Cheap to clone; the underlying HTTP client shares its connection pool.
#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: OracleConfig,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("model", &self.config.model)
            .field("max_retries", &self.config.max_retries)
            .finish()
    }
}

/// Builder for creating an LlmClient
#[derive(Default)]
pub struct LlmClientBuilder {
    config: Option<OracleConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: OracleConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the configured base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Build the LlmClient
    ///
    /// Fails with [`Error::MissingCredential`] when no API key was supplied.
    pub fn build(self) -> Result<LlmClient> {
        let mut config = self.config.unwrap_or_default();
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(Error::MissingCredential)?;

        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = secs;
        }

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| config.base_url.clone())
            .trim_end_matches('/')
            .to_string();

        Ok(LlmClient {
            http_client,
            config,
            api_key,
            base_url,
        })
    }
}

impl LlmClient {
    pub fn new(config: OracleConfig, api_key: impl Into<String>) -> Result<Self> {
        LlmClientBuilder::new().config(config).api_key(api_key).build()
    }

    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Make a chat completion request at the given temperature
    pub async fn complete(&self, messages: Vec<Message>, temperature: f32) -> Result<LlmResponse> {
        let request = ChatRequest::new(&self.config.model, messages)
            .with_temperature(temperature)
            .with_max_tokens(self.config.max_tokens);

        self.execute_request(&request).await
    }

    /// Execute a chat request with retry logic
    async fn execute_request(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send_request(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempts < max_attempts => {
                    let suggested = match &e {
                        Error::RateLimited(secs) => *secs,
                        _ => 0,
                    };
                    let backoff = calculate_backoff(attempts, suggested);
                    warn!(
                        attempt = attempts,
                        max_attempts,
                        wait_ms = backoff,
                        error = %e,
                        "Transient oracle failure, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a single request to the API
    async fn send_request(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "kgloop")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::OracleTimeout(self.config.timeout_secs)
                } else {
                    Error::NetworkError(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error_response(status.as_u16(), &body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::OracleError(format!("Failed to parse response: {}", e)))?;

        let llm = LlmResponse::from_chat_response(chat_response)
            .ok_or_else(|| Error::OracleError("Empty response from API".to_string()))?;

        debug!(
            model = %llm.model,
            tokens = llm.tokens_used,
            finish_reason = %llm.finish_reason,
            "Chat completion received"
        );

        Ok(llm)
    }
}

/// Map a non-success HTTP status to an error
fn classify_error_response(status: u16, body: &str) -> Error {
    match status {
        401 => Error::OracleError(
            "Unauthorized: Invalid API key. Set KGLOOP_API_KEY or ANTHROPIC_API_KEY.".to_string(),
        ),
        429 => Error::RateLimited(extract_retry_after(body).unwrap_or(60)),
        400 => Error::OracleError(format!("Bad request: {}", body)),
        402 => Error::OracleError("Payment required: insufficient credits".to_string()),
        403 => Error::OracleError(format!("Forbidden: {}", body)),
        404 => Error::OracleError(format!("Model not found or endpoint unavailable: {}", body)),
        408 | 500..=599 => Error::OracleUnavailable(status, body.to_string()),
        _ => Error::OracleError(format!("HTTP error {}: {}", status, body)),
    }
}

/// Calculate backoff delay with jitter
fn calculate_backoff(attempt: u32, suggested_wait: u64) -> u64 {
    let base = BACKOFF_BASE_MS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let suggested_ms = suggested_wait.saturating_mul(1000);

    let delay = base.max(suggested_ms).min(BACKOFF_MAX_MS);

    // 10% jitter
    let jitter = delay / 10;
    delay + (rand_jitter() % jitter.max(1))
}

/// Generate a pseudo-random jitter value
fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64 % 1000)
        .unwrap_or(0)
}

/// Extract retry-after value from error response
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("retry_after")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            json.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|v| v.as_u64())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OracleConfig {
        OracleConfig {
            model: "test/model".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            ..OracleConfig::default()
        }
    }

    #[test]
    fn test_client_builder() {
        let client = LlmClient::builder()
            .config(test_config())
            .api_key("test-key")
            .base_url("https://example.com/")
            .timeout_secs(60)
            .build()
            .unwrap();

        assert_eq!(client.model(), "test/model");
        assert_eq!(client.base_url, "https://example.com");
        assert_eq!(client.config.timeout_secs, 60);
    }

    #[test]
    fn test_client_builder_requires_api_key() {
        let result = LlmClient::builder().config(test_config()).build();
        assert!(matches!(result, Err(Error::MissingCredential)));

        let blank = LlmClient::new(test_config(), "   ");
        assert!(matches!(blank, Err(Error::MissingCredential)));
    }

    #[test]
    fn test_client_debug_hides_key() {
        let client = LlmClient::new(test_config(), "sk-very-secret").unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("LlmClient"));
        assert!(debug.contains("test/model"));
        assert!(!debug.contains("sk-very-secret"));
    }

    #[test]
    fn test_client_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LlmClient>();
    }

    #[test]
    fn test_classify_error_response() {
        assert!(matches!(classify_error_response(429, r#"{"retry_after": 7}"#), Error::RateLimited(7)));
        assert!(matches!(classify_error_response(429, "nope"), Error::RateLimited(60)));
        assert!(classify_error_response(503, "busy").is_transient());
        assert!(classify_error_response(500, "boom").is_transient());
        assert!(!classify_error_response(401, "").is_transient());
        assert!(!classify_error_response(400, "bad").is_transient());
    }

    #[test]
    fn test_calculate_backoff() {
        let backoff1 = calculate_backoff(1, 0);
        assert!(backoff1 >= BACKOFF_BASE_MS);

        let backoff2 = calculate_backoff(2, 0);
        assert!(backoff2 >= BACKOFF_BASE_MS * 2);

        let backoff_with_wait = calculate_backoff(1, 5);
        assert!(backoff_with_wait >= 5000);

        let capped = calculate_backoff(30, 0);
        assert!(capped <= BACKOFF_MAX_MS + BACKOFF_MAX_MS / 10);
    }

    #[test]
    fn test_extract_retry_after() {
        assert_eq!(extract_retry_after(r#"{"retry_after": 30}"#), Some(30));
        assert_eq!(extract_retry_after(r#"{"error": {"retry_after": 60}}"#), Some(60));
        assert_eq!(extract_retry_after(r#"{"message": "rate limited"}"#), None);
        assert_eq!(extract_retry_after("not json"), None);
    }
}
