use async_trait::async_trait;
use cellscribe_core::{BackendErrorKind, BackendSelector, Credential, PromptRequest, RawResponse};

/// One LLM backend.
///
/// Implementations never return transport failures as `Err`: every failure is
/// classified into a `RawResponse` carrying a backend error so the dispatcher
/// can hand it back to the caller unchanged.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Send a single prompt
    async fn send(&self, request: &PromptRequest, credential: Option<&Credential>)
        -> RawResponse;

    /// Check if the backend is reachable and ready
    async fn is_available(&self, credential: Option<&Credential>) -> bool;

    /// Which selector this client serves
    fn backend(&self) -> BackendSelector;

    /// Get the name of this provider
    fn provider_name(&self) -> &str;

    /// Whether `send` needs a credential
    fn requires_credential(&self) -> bool {
        self.backend().requires_credential()
    }
}

/// Map a transport failure to a backend error kind.
pub fn classify_transport_error(err: &reqwest::Error) -> BackendErrorKind {
    if err.is_timeout() {
        BackendErrorKind::Timeout
    } else if let Some(status) = err.status() {
        BackendErrorKind::HttpStatus(status.as_u16())
    } else {
        BackendErrorKind::Connection
    }
}

/// Trim an error body so a misbehaving backend cannot flood the logs.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX_CHARS: usize = 500;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(MAX_CHARS).collect();
        format!("{}...", head)
    }
}
