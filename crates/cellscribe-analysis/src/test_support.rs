use async_trait::async_trait;
use cellscribe_ai::{BackendClient, BackendSet, Dispatcher, LenientParser, ResponseParser};
use cellscribe_core::{
    BackendErrorKind, BackendSelector, Credential, GenerationConfig, PromptRequest, RawResponse,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fake backend that replays scripted responses and counts calls
pub(crate) struct ScriptedBackend {
    backend: BackendSelector,
    responses: Mutex<VecDeque<RawResponse>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn new(backend: BackendSelector, responses: Vec<RawResponse>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn local(responses: Vec<RawResponse>) -> Arc<Self> {
        Self::new(BackendSelector::Local, responses)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendClient for ScriptedBackend {
    async fn send(&self, request: &PromptRequest, _credential: Option<&Credential>) -> RawResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.text.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RawResponse::backend_error(BackendErrorKind::EmptyResponse, "script exhausted"))
    }

    async fn is_available(&self, _credential: Option<&Credential>) -> bool {
        true
    }

    fn backend(&self) -> BackendSelector {
        self.backend
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

/// Dispatcher whose local backend is `local`; the hosted slot is never scripted
pub(crate) fn local_dispatcher(local: Arc<ScriptedBackend>) -> Dispatcher {
    let hosted = ScriptedBackend::new(BackendSelector::Hosted, Vec::new());
    Dispatcher::new(BackendSet::new(hosted, local))
}

pub(crate) fn parser() -> Arc<dyn ResponseParser> {
    Arc::new(LenientParser::new())
}

pub(crate) fn config() -> GenerationConfig {
    GenerationConfig::new("llama3.1", 0.2, 256, 42)
}
