use crate::llm_provider::*;
use async_trait::async_trait;
use cellscribe_core::{
    BackendErrorKind, BackendSelector, CellScribeError, Credential, PromptRequest, RawResponse,
    Result,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Configuration for the hosted generation API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedClientConfig {
    /// API base URL
    pub api_base: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HostedClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_secs: 300,
        }
    }
}

/// Client for a remote `generateContent` endpoint
pub struct HostedClient {
    config: HostedClientConfig,
    client: Client,
}

impl HostedClient {
    /// Create a new hosted client
    pub fn new(config: HostedClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CellScribeError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model
        )
    }

    /// Try a single request to the hosted API
    async fn try_request(&self, request: &PromptRequest, credential: &Credential) -> RawResponse {
        let body = build_request(request);
        let url = self.endpoint(&request.config.model_id);

        debug!(
            "Sending {} prompt chars to hosted model {}",
            request.text.len(),
            request.config.model_id
        );

        let response = match self
            .client
            .post(&url)
            .header(API_KEY_HEADER, credential.expose())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let kind = classify_transport_error(&e);
                return RawResponse::backend_error(
                    kind,
                    format!("hosted backend request to {} failed: {}", url, e.without_url()),
                );
            }
        };

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return RawResponse::backend_error(
                BackendErrorKind::HttpStatus(status.as_u16()),
                format!("hosted API error ({}): {}", status, truncate_body(&error_text)),
            );
        }

        match response.json::<GenerateContentResponse>().await {
            Ok(parsed) => {
                if let Some(usage) = &parsed.usage_metadata {
                    debug!(
                        "Hosted usage: prompt {:?} tokens, completion {:?} tokens",
                        usage.prompt_token_count, usage.candidates_token_count
                    );
                }
                extract_candidate_text(&parsed)
            }
            Err(e) => RawResponse::backend_error(
                BackendErrorKind::EmptyResponse,
                format!("hosted API returned an unreadable payload: {}", e),
            ),
        }
    }
}

#[async_trait]
impl BackendClient for HostedClient {
    async fn send(
        &self,
        request: &PromptRequest,
        credential: Option<&Credential>,
    ) -> RawResponse {
        let Some(credential) = credential else {
            return RawResponse::backend_error(
                BackendErrorKind::HttpStatus(401),
                "hosted backend requires a credential",
            );
        };

        let start = Instant::now();
        let response = self.try_request(request, credential).await;

        if response.is_success() {
            info!(
                "Hosted call to {} completed in {}ms",
                request.config.model_id,
                start.elapsed().as_millis()
            );
        } else {
            warn!(
                "Hosted call to {} failed after {}ms",
                request.config.model_id,
                start.elapsed().as_millis()
            );
        }

        response
    }

    async fn is_available(&self, credential: Option<&Credential>) -> bool {
        let Some(credential) = credential else {
            return false;
        };

        let result = self
            .client
            .get(format!("{}/models", self.config.api_base.trim_end_matches('/')))
            .header(API_KEY_HEADER, credential.expose())
            .send()
            .await;

        matches!(result, Ok(response) if response.status().is_success())
    }

    fn backend(&self) -> BackendSelector {
        BackendSelector::Hosted
    }

    fn provider_name(&self) -> &str {
        "hosted"
    }
}

/// Build the wire request; seed and temperature are copied verbatim.
pub fn build_request(request: &PromptRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: Some(request.text.clone()),
            }],
        }],
        generation_config: WireGenerationConfig {
            temperature: request.config.temperature,
            max_output_tokens: request.config.max_output_tokens,
            seed: request.config.seed,
        },
    }
}

/// Concatenate the text parts of the first candidate.
pub fn extract_candidate_text(response: &GenerateContentResponse) -> RawResponse {
    let text = response
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = response
            .candidates
            .first()
            .and_then(|c| c.finish_reason.clone())
            .unwrap_or_else(|| "no candidates".to_string());
        return RawResponse::backend_error(
            BackendErrorKind::EmptyResponse,
            format!("hosted API returned no candidate text ({})", reason),
        );
    }

    RawResponse::success(text)
}

// Hosted API request/response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: WireGenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    seed: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<usize>,
    #[serde(default)]
    candidates_token_count: Option<usize>,
}
