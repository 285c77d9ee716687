//! AI bridge for Hearth.
//!
//! Forwards free-text prompts to an OpenAI-compatible chat completions
//! endpoint. The bridge never raises into the chat flow: an unconfigured
//! deployment returns a fixed placeholder after a short simulated delay,
//! and any network or parse failure degrades to an error placeholder.

use std::time::Duration;

use reqwest::Client;
use serde_json::json;

use crate::config::AiConfig;
use crate::error::{HearthError, Result};

/// Connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Total request timeout in seconds.
const TOTAL_TIMEOUT_SECS: u64 = 30;

/// Simulated response delay when no API key is configured.
const SIMULATED_DELAY_MS: u64 = 500;

/// Prompt characters echoed back in the simulated placeholder.
const PLACEHOLDER_PROMPT_CHARS: usize = 100;

/// Bridge to an external prompt-completion service.
pub struct AiBridge {
    client: Client,
    config: AiConfig,
}

impl AiBridge {
    /// Create a new bridge with the given configuration.
    pub fn new(config: AiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(TOTAL_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                HearthError::ExternalService(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Whether an API key is configured.
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    /// Complete a prompt.
    ///
    /// Always resolves to a string: a real completion, a simulated
    /// placeholder when unconfigured, or an error placeholder on failure.
    pub async fn complete(&self, prompt: &str) -> String {
        if !self.is_configured() {
            tokio::time::sleep(Duration::from_millis(SIMULATED_DELAY_MS)).await;
            let snippet: String = prompt.chars().take(PLACEHOLDER_PROMPT_CHARS).collect();
            return format!(
                "[Simulated AI response for '{}'] You asked: '{snippet}'",
                self.config.model
            );
        }

        match self.request_completion(prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("AI completion failed: {}", e);
                format!("[AI service error] {e}")
            }
        }
    }

    /// Perform the actual HTTP round trip.
    async fn request_completion(&self, prompt: &str) -> Result<String> {
        let payload = json!({
            "messages": [{"role": "user", "content": prompt}],
            "model": self.config.model,
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| HearthError::ExternalService(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(HearthError::ExternalService(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HearthError::ExternalService(format!("failed to read response: {e}")))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                HearthError::ExternalService("unexpected response shape".to_string())
            })
    }
}
