// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Gemini API client for hosted model inference

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::{Result, RiskscanError};

const MAX_BACKOFF_SECS: u64 = 60;

/// Anything that turns a prompt into analysis text
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Name shown in logs
    fn name(&self) -> &str;

    /// Run one prompt to completion
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Gemini `generateContent` client
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_output_tokens: u32,
    retries: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(engine: &EngineConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(engine.timeout_secs))
            .build()?;

        // Normalize URL
        let base_url = engine.url
            .trim_end_matches('/')
            .trim_end_matches("/v1beta")
            .to_string();

        Ok(Self {
            client,
            base_url,
            api_key,
            model: engine.model.clone(),
            max_output_tokens: engine.max_output_tokens,
            retries: engine.retries,
        })
    }

    /// Model this client talks to
    pub fn model(&self) -> &str {
        &self.model
    }

    /// List models visible to this API key
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/v1beta/models", self.base_url);

        let response = self.client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let models: ModelsResponse = response.json().await?;
        Ok(models.models
            .into_iter()
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }

    /// Generate text for a single prompt
    pub async fn generate_once(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.max_output_tokens,
            },
        };

        debug!("Sending request to Gemini: model={}, prompt_chars={}", self.model, prompt.len());

        let response = self.client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let result: GenerateResponse = response.json().await?;
        extract_text(result)
    }

    /// Generate with retry logic
    pub async fn generate_with_retry(&self, prompt: &str, retries: u32) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..=retries {
            if attempt > 0 {
                let delay = backoff(attempt);
                warn!("Retrying Gemini request in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.generate_once(prompt).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RiskscanError::EmptyResponse("no attempt was made".to_string())
        }))
    }
}

#[async_trait]
impl ModelBackend for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_retry(prompt, self.retries).await
    }
}

/// Wait before retry `attempt` (1-based): 1s, 2s, 4s ... capped at a minute
fn backoff(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt.saturating_sub(1)).min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

/// Turn a non-success response into `RiskscanError::Api`
async fn api_error(response: reqwest::Response) -> RiskscanError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body
            }
        });

    RiskscanError::Api { status: status.as_u16(), message }
}

fn extract_text(response: GenerateResponse) -> Result<String> {
    let block_reason = response.prompt_feedback.and_then(|f| f.block_reason);

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(RiskscanError::EmptyResponse(
            block_reason.map(|r| format!("prompt blocked: {}", r))
                .unwrap_or_else(|| "no candidates".to_string()),
        ));
    };

    let text: String = candidate.content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(RiskscanError::EmptyResponse(format!(
            "finish reason: {}",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(text)
}

/// Load `.env` and read the API key from the configured variable
pub fn resolve_api_key(var_name: &str) -> Result<String> {
    if let Err(e) = dotenv::dotenv() {
        debug!("No .env loaded: {}", e);
    }

    match std::env::var(var_name) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(RiskscanError::MissingApiKey(var_name.to_string())),
    }
}
