use crate::hosted_provider::{HostedClient, HostedClientConfig};
use crate::llm_provider::BackendClient;
use crate::local_provider::{LocalClient, LocalClientConfig};
use cellscribe_core::{BackendSelector, LLMConfig, Result};
use std::sync::Arc;
use std::time::Duration;

/// One client per backend variant
#[derive(Clone)]
pub struct BackendSet {
    hosted: Arc<dyn BackendClient>,
    local: Arc<dyn BackendClient>,
}

impl BackendSet {
    pub fn new(hosted: Arc<dyn BackendClient>, local: Arc<dyn BackendClient>) -> Self {
        Self { hosted, local }
    }

    pub fn get(&self, backend: BackendSelector) -> &Arc<dyn BackendClient> {
        match backend {
            BackendSelector::Hosted => &self.hosted,
            BackendSelector::Local => &self.local,
        }
    }
}

/// Factory for creating backend clients based on configuration
pub struct BackendFactory;

impl BackendFactory {
    /// Create the client for one backend
    pub fn create(backend: BackendSelector, config: &LLMConfig) -> Result<Arc<dyn BackendClient>> {
        match backend {
            BackendSelector::Hosted => Self::create_hosted(config),
            BackendSelector::Local => Ok(Self::create_local(config)),
        }
    }

    /// Create clients for both backends
    pub fn create_all(config: &LLMConfig) -> Result<BackendSet> {
        Ok(BackendSet::new(
            Self::create_hosted(config)?,
            Self::create_local(config),
        ))
    }

    fn create_hosted(config: &LLMConfig) -> Result<Arc<dyn BackendClient>> {
        let hosted_config = HostedClientConfig {
            api_base: config.hosted.api_base.clone(),
            timeout_secs: config.timeout_secs,
        };

        Ok(Arc::new(HostedClient::new(hosted_config)?))
    }

    fn create_local(config: &LLMConfig) -> Arc<dyn BackendClient> {
        let local_config = LocalClientConfig {
            base_url: config.local.url.clone(),
            context_window: config.local.context_window,
            gpu_layers: config.local.gpu_layers,
            timeout: Duration::from_secs(config.timeout_secs),
        };

        Arc::new(LocalClient::new(local_config))
    }

    /// Get a list of supported backends
    pub fn supported_backends() -> Vec<&'static str> {
        vec![BackendSelector::Hosted.as_str(), BackendSelector::Local.as_str()]
    }
}
