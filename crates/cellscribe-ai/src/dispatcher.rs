use crate::llm_factory::{BackendFactory, BackendSet};
use crate::prompts::{PromptBuilder, PromptFields, TemplateKind};
use cellscribe_core::{
    BackendSelector, CellScribeError, Credential, GenerationConfig, LLMConfig, PromptRequest,
    RawResponse, ResponseStatus, Result,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Routes one prompt to one backend.
///
/// Every call is a single attempt. A backend error comes back unchanged inside
/// the `RawResponse`; only problems detected before sending (bad selector,
/// bad configuration, missing template field, unreadable credential) are `Err`.
#[derive(Clone)]
pub struct Dispatcher {
    backends: BackendSet,
    prompt_builder: PromptBuilder,
    credential_path: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(backends: BackendSet) -> Self {
        Self {
            backends,
            prompt_builder: PromptBuilder::new(),
            credential_path: None,
        }
    }

    /// Build a dispatcher with real clients for both backends
    pub fn from_config(config: &LLMConfig) -> Result<Self> {
        let backends = BackendFactory::create_all(config)?;
        let mut dispatcher = Self::new(backends);
        dispatcher.credential_path = config.hosted.credential_path.clone();
        Ok(dispatcher)
    }

    pub fn with_credential_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_path = Some(path.into());
        self
    }

    pub fn with_prompt_builder(mut self, prompt_builder: PromptBuilder) -> Self {
        self.prompt_builder = prompt_builder;
        self
    }

    pub fn prompt_builder(&self) -> &PromptBuilder {
        &self.prompt_builder
    }

    pub fn credential_path(&self) -> Option<&Path> {
        self.credential_path.as_deref()
    }

    /// Parse a backend name, then dispatch. Unknown names fail before any send.
    pub async fn dispatch_named(
        &self,
        kind: TemplateKind,
        fields: &PromptFields,
        backend: &str,
        config: &GenerationConfig,
    ) -> Result<RawResponse> {
        let backend: BackendSelector = backend.parse()?;
        self.dispatch(kind, fields, backend, config).await
    }

    /// Render `kind` with `fields` and send it to `backend`
    pub async fn dispatch(
        &self,
        kind: TemplateKind,
        fields: &PromptFields,
        backend: BackendSelector,
        config: &GenerationConfig,
    ) -> Result<RawResponse> {
        config.validate()?;
        let text = self.prompt_builder.build(kind, fields)?;

        let request = PromptRequest {
            text,
            config: config.clone(),
        };

        debug!("Dispatching {} prompt to {} backend", kind, backend);
        self.send(&request, backend).await
    }

    /// Send an already-built request
    pub async fn send(&self, request: &PromptRequest, backend: BackendSelector) -> Result<RawResponse> {
        request.config.validate()?;

        let client = self.backends.get(backend);
        let credential = if client.requires_credential() {
            Some(self.load_credential(backend)?)
        } else {
            None
        };

        let start = Instant::now();
        let response = client.send(request, credential.as_ref()).await;

        match &response.status {
            ResponseStatus::Success => info!(
                "{} backend ({}) answered in {}ms",
                backend,
                client.provider_name(),
                start.elapsed().as_millis()
            ),
            ResponseStatus::BackendError { kind, message } => warn!(
                "{} backend ({}) failed with {}: {}",
                backend,
                client.provider_name(),
                kind,
                message
            ),
        }

        Ok(response)
    }

    /// Probe whether `backend` is reachable
    pub async fn check_backend(&self, backend: BackendSelector) -> Result<bool> {
        let client = self.backends.get(backend);
        let credential = if client.requires_credential() {
            Some(self.load_credential(backend)?)
        } else {
            None
        };
        Ok(client.is_available(credential.as_ref()).await)
    }

    // Re-read on every call; the key is never cached
    fn load_credential(&self, backend: BackendSelector) -> Result<Credential> {
        let path = self.credential_path.as_deref().ok_or_else(|| {
            CellScribeError::Credential(format!(
                "{} backend requires a credential file; set llm.hosted.credential_path \
                 or CELLSCRIBE_CREDENTIAL_PATH",
                backend
            ))
        })?;
        Credential::from_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_provider::BackendClient;
    use async_trait::async_trait;
    use cellscribe_core::BackendErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Echoes a digest of the request so identical requests give identical text
    struct EchoBackend {
        backend: BackendSelector,
        calls: AtomicUsize,
        seen_keys: Mutex<Vec<Option<String>>>,
    }

    impl EchoBackend {
        fn new(backend: BackendSelector) -> Arc<Self> {
            Arc::new(Self {
                backend,
                calls: AtomicUsize::new(0),
                seen_keys: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BackendClient for EchoBackend {
        async fn send(&self, request: &PromptRequest, credential: Option<&Credential>) -> RawResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_keys
                .lock()
                .unwrap()
                .push(credential.map(|c| c.expose().to_string()));
            RawResponse::success(format!(
                "{}|{}|{}|{}",
                request.config.seed,
                request.config.temperature,
                request.config.max_output_tokens,
                request.text.len()
            ))
        }

        async fn is_available(&self, _credential: Option<&Credential>) -> bool {
            true
        }

        fn backend(&self) -> BackendSelector {
            self.backend
        }

        fn provider_name(&self) -> &str {
            "echo"
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl BackendClient for FailingBackend {
        async fn send(&self, _request: &PromptRequest, _credential: Option<&Credential>) -> RawResponse {
            RawResponse::backend_error(BackendErrorKind::HttpStatus(503), "overloaded")
        }

        async fn is_available(&self, _credential: Option<&Credential>) -> bool {
            false
        }

        fn backend(&self) -> BackendSelector {
            BackendSelector::Local
        }

        fn provider_name(&self) -> &str {
            "failing"
        }
    }

    fn fields() -> PromptFields {
        PromptFields::new()
            .with("gene_set_description", "cluster 2 markers")
            .with("terms_table", "hsa04110 / Cell cycle / 0.001 / 5 / CDK1, CCNB1")
    }

    fn config() -> GenerationConfig {
        GenerationConfig::new("llama3.1", 0.1, 128, 2024)
    }

    #[tokio::test]
    async fn test_invalid_backend_fails_before_send() {
        let hosted = EchoBackend::new(BackendSelector::Hosted);
        let local = EchoBackend::new(BackendSelector::Local);
        let dispatcher = Dispatcher::new(BackendSet::new(hosted.clone(), local.clone()));

        let err = dispatcher
            .dispatch_named(TemplateKind::EnrichmentKegg, &fields(), "openai", &config())
            .await
            .unwrap_err();

        assert!(matches!(err, CellScribeError::InvalidBackend(_)));
        assert_eq!(hosted.calls.load(Ordering::SeqCst), 0);
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_same_seed_same_text() {
        let local = EchoBackend::new(BackendSelector::Local);
        let dispatcher = Dispatcher::new(BackendSet::new(
            EchoBackend::new(BackendSelector::Hosted),
            local.clone(),
        ));

        let first = dispatcher
            .dispatch(TemplateKind::EnrichmentKegg, &fields(), BackendSelector::Local, &config())
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(TemplateKind::EnrichmentKegg, &fields(), BackendSelector::Local, &config())
            .await
            .unwrap();

        assert_eq!(first.text, second.text);
        assert!(first.text.unwrap().starts_with("2024|0.1|128|"));
        assert_eq!(local.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_hosted_reads_credential_each_call() {
        let hosted = EchoBackend::new(BackendSelector::Hosted);
        let key_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(key_file.path(), "first-key\n").unwrap();

        let dispatcher = Dispatcher::new(BackendSet::new(
            hosted.clone(),
            EchoBackend::new(BackendSelector::Local),
        ))
        .with_credential_path(key_file.path());

        dispatcher
            .dispatch(TemplateKind::EnrichmentKegg, &fields(), BackendSelector::Hosted, &config())
            .await
            .unwrap();
        std::fs::write(key_file.path(), "second-key\n").unwrap();
        dispatcher
            .dispatch(TemplateKind::EnrichmentKegg, &fields(), BackendSelector::Hosted, &config())
            .await
            .unwrap();

        let keys = hosted.seen_keys.lock().unwrap().clone();
        assert_eq!(
            keys,
            vec![Some("first-key".to_string()), Some("second-key".to_string())]
        );
    }

    #[tokio::test]
    async fn test_hosted_without_credential_path_never_sends() {
        let hosted = EchoBackend::new(BackendSelector::Hosted);
        let dispatcher = Dispatcher::new(BackendSet::new(
            hosted.clone(),
            EchoBackend::new(BackendSelector::Local),
        ));

        let err = dispatcher
            .dispatch(TemplateKind::EnrichmentKegg, &fields(), BackendSelector::Hosted, &config())
            .await
            .unwrap_err();
        assert!(matches!(err, CellScribeError::Credential(_)));
        assert_eq!(hosted.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_field_and_bad_budget_never_send() {
        let local = EchoBackend::new(BackendSelector::Local);
        let dispatcher = Dispatcher::new(BackendSet::new(
            EchoBackend::new(BackendSelector::Hosted),
            local.clone(),
        ));

        let err = dispatcher
            .dispatch(TemplateKind::Quality, &fields(), BackendSelector::Local, &config())
            .await
            .unwrap_err();
        assert!(matches!(err, CellScribeError::MissingField { .. }));

        let mut zero_budget = config();
        zero_budget.max_output_tokens = 0;
        let err = dispatcher
            .dispatch(TemplateKind::EnrichmentKegg, &fields(), BackendSelector::Local, &zero_budget)
            .await
            .unwrap_err();
        assert!(matches!(err, CellScribeError::Config(_)));
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_error_is_returned_unchanged() {
        let dispatcher = Dispatcher::new(BackendSet::new(
            EchoBackend::new(BackendSelector::Hosted),
            Arc::new(FailingBackend),
        ));

        let raw = dispatcher
            .dispatch(TemplateKind::EnrichmentKegg, &fields(), BackendSelector::Local, &config())
            .await
            .unwrap();
        assert_eq!(
            raw,
            RawResponse::backend_error(BackendErrorKind::HttpStatus(503), "overloaded")
        );
        assert!(!dispatcher.check_backend(BackendSelector::Local).await.unwrap());
    }
}
