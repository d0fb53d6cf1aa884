//! Generator provider abstraction.
//!
//! The engine never runs inference itself; it talks to an external local
//! model process through the narrow [`Generator`] contract. Two providers:
//!
//! - **[`DisabledGenerator`]** — returns errors; used when no model is
//!   configured. Ingestion and search work fully without a generator.
//! - **[`LocalGenerator`]** — calls an OpenAI-compatible
//!   `POST /v1/chat/completions` endpoint (llama.cpp server, Ollama, and
//!   similar local runtimes speak this shape). Model files live under the
//!   configured models directory and are referenced by name only.
//!
//! Every call carries the configured timeout; a timed-out call surfaces as
//! [`EngineError::Timeout`] so the scribe can keep its previous state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GeneratorConfig;
use crate::error::{EngineError, EngineResult};

/// Narrow contract to the external model.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Identifier for logs and the stats surface.
    fn name(&self) -> &str;

    /// Run one completion over an assembled prompt.
    async fn generate(&self, prompt: &str) -> EngineResult<String>;
}

/// Build the provider selected by configuration.
pub fn create_generator(config: &GeneratorConfig) -> EngineResult<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "local" => Ok(Box::new(LocalGenerator::new(config)?)),
        other => Err(EngineError::BadRequest(format!(
            "unknown generator provider: {other}"
        ))),
    }
}

// ============ Disabled provider ============

/// No-op provider used when `generator.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> EngineResult<String> {
        Err(EngineError::Generator(
            "generator provider is disabled".to_string(),
        ))
    }
}

// ============ Local OpenAI-compatible provider ============

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Provider for a local OpenAI-compatible completion server.
pub struct LocalGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl LocalGenerator {
    pub fn new(config: &GeneratorConfig) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Generator(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone().unwrap_or_else(|| "default".to_string()),
        })
    }
}

#[async_trait]
impl Generator for LocalGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> EngineResult<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(format!("generator call exceeded deadline: {e}"))
                } else {
                    EngineError::Generator(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(EngineError::Generator(format!(
                "generator returned HTTP {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Generator(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::Generator("empty generator response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_provider_always_errors() {
        let provider = DisabledGenerator;
        let err = provider.generate("anything").await.unwrap_err();
        assert!(matches!(err, EngineError::Generator(_)));
    }

    #[test]
    fn create_rejects_unknown_provider() {
        let config = GeneratorConfig {
            provider: "cloud".to_string(),
            ..GeneratorConfig::default()
        };
        assert!(create_generator(&config).is_err());
    }
}
