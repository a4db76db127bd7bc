use crate::llm_provider::*;
use async_trait::async_trait;
use cellscribe_core::{BackendErrorKind, BackendSelector, Credential, PromptRequest, RawResponse};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Settings for a locally served Ollama model
#[derive(Debug, Clone)]
pub struct LocalClientConfig {
    pub base_url: String,
    pub context_window: usize,
    /// Layers to offload to the GPU; `None` lets the server decide
    pub gpu_layers: Option<u32>,
    pub timeout: Duration,
}

impl Default for LocalClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            context_window: 8192,
            gpu_layers: None,
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    seed: i64,
    temperature: f32,
    num_predict: u32,
    num_ctx: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_gpu: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    eval_count: Option<usize>,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
}

pub struct LocalClient {
    client: Client,
    config: LocalClientConfig,
}

impl LocalClient {
    pub fn new(config: LocalClientConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn build_request(&self, request: &PromptRequest) -> ChatRequest {
        ChatRequest {
            model: request.config.model_id.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(request.text.clone()),
            }],
            stream: false,
            options: ChatOptions {
                seed: request.config.seed,
                temperature: request.config.temperature,
                num_predict: request.config.max_output_tokens,
                num_ctx: self.config.context_window,
                num_gpu: self.config.gpu_layers,
            },
        }
    }
}

/// Pull the message content out of a chat response.
pub fn extract_message_content(response: &ChatResponse) -> RawResponse {
    match response
        .message
        .as_ref()
        .and_then(|m| m.content.as_deref())
    {
        Some(content) if !content.trim().is_empty() => RawResponse::success(content),
        _ => RawResponse::backend_error(
            BackendErrorKind::EmptyResponse,
            "local model returned an empty message",
        ),
    }
}

impl LocalClient {
    /// One request/response exchange, including the body read
    async fn exchange(&self, url: &str, body: &ChatRequest, start_time: Instant) -> RawResponse {
        let response = match self.client.post(url).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                return RawResponse::backend_error(
                    classify_transport_error(&e),
                    format!(
                        "cannot reach local model server at {}: {}",
                        self.config.base_url,
                        e.without_url()
                    ),
                );
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return RawResponse::backend_error(
                BackendErrorKind::HttpStatus(status.as_u16()),
                format!("local model error ({}): {}", status, truncate_body(&error_text)),
            );
        }

        let response_data: ChatResponse = match response.json().await {
            Ok(data) => data,
            Err(e) => {
                return RawResponse::backend_error(
                    BackendErrorKind::EmptyResponse,
                    format!("failed to parse local model response: {}", e),
                )
            }
        };

        info!(
            "Local call completed: {}ms, context: {} tokens, completion: {} tokens",
            start_time.elapsed().as_millis(),
            response_data.prompt_eval_count.unwrap_or(0),
            response_data.eval_count.unwrap_or(0)
        );

        extract_message_content(&response_data)
    }
}

#[async_trait]
impl BackendClient for LocalClient {
    async fn send(
        &self,
        request: &PromptRequest,
        _credential: Option<&Credential>,
    ) -> RawResponse {
        let start_time = Instant::now();
        let body = self.build_request(request);
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));

        debug!(
            "Sending {} prompt chars to local model {} at {}",
            request.text.len(),
            request.config.model_id,
            url
        );

        // The deadline covers the body read as well as the request
        match timeout(self.config.timeout, self.exchange(&url, &body, start_time)).await {
            Ok(raw) => raw,
            Err(_) => {
                warn!("Local request timeout after {:?}", self.config.timeout);
                RawResponse::backend_error(
                    BackendErrorKind::Timeout,
                    format!("local model request timeout after {:?}", self.config.timeout),
                )
            }
        }
    }

    async fn is_available(&self, _credential: Option<&Credential>) -> bool {
        debug!("Checking local model availability at {}", self.config.base_url);

        let result = timeout(
            Duration::from_secs(5),
            self.client
                .get(format!("{}/api/tags", self.config.base_url.trim_end_matches('/')))
                .send(),
        )
        .await;

        matches!(result, Ok(Ok(response)) if response.status().is_success())
    }

    fn backend(&self) -> BackendSelector {
        BackendSelector::Local
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}
