pub mod dispatcher;
pub mod llm_factory;
pub mod llm_provider;
pub mod prompts;
pub mod response_parser;

// LLM backends
pub mod hosted_provider;
pub mod local_provider;

pub use dispatcher::Dispatcher;
pub use hosted_provider::{HostedClient, HostedClientConfig};
pub use llm_factory::{BackendFactory, BackendSet};
pub use llm_provider::*;
pub use local_provider::{LocalClient, LocalClientConfig};
pub use prompts::{PromptBuilder, PromptFields, TemplateKind};
pub use response_parser::*;
