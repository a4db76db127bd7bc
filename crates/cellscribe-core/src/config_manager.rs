use crate::error::CellScribeError;
use crate::types::{BackendSelector, GenerationConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for CellScribeError {
    fn from(err: ConfigError) -> Self {
        CellScribeError::Config(err.to_string())
    }
}

/// Main configuration for CellScribe
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CellScribeConfig {
    /// LLM backend configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Pathway-enrichment summarisation settings
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// LLM backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Backend: "hosted" or "local"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Temperature for generation, in [0, 1]
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens the model may generate per call
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Sampling seed, fixed for reproducibility
    #[serde(default = "default_seed")]
    pub seed: i64,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Model override for whichever backend ends up selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default)]
    pub hosted: HostedConfig,

    #[serde(default)]
    pub local: LocalConfig,
}

impl LLMConfig {
    pub fn selector(&self) -> Result<BackendSelector, CellScribeError> {
        self.backend.parse()
    }

    /// Model identifier for the given backend
    pub fn model_for(&self, backend: BackendSelector) -> &str {
        if let Some(model) = &self.model {
            if self.selector().ok() == Some(backend) {
                return model;
            }
        }
        match backend {
            BackendSelector::Hosted => &self.hosted.model,
            BackendSelector::Local => &self.local.model,
        }
    }

    /// Fresh generation parameters for one call against `backend`
    pub fn generation_config(&self, backend: BackendSelector) -> GenerationConfig {
        GenerationConfig::new(
            self.model_for(backend),
            self.temperature,
            self.max_output_tokens,
            self.seed,
        )
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            seed: default_seed(),
            timeout_secs: default_timeout_secs(),
            model: None,
            hosted: HostedConfig::default(),
            local: LocalConfig::default(),
        }
    }
}

/// Hosted generation API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedConfig {
    /// Model identifier (e.g., "gemini-1.5-flash")
    #[serde(default = "default_hosted_model")]
    pub model: String,

    /// API base URL
    #[serde(default = "default_hosted_api_base")]
    pub api_base: String,

    /// File whose first line is the API key
    #[serde(default)]
    pub credential_path: Option<PathBuf>,
}

impl Default for HostedConfig {
    fn default() -> Self {
        Self {
            model: default_hosted_model(),
            api_base: default_hosted_api_base(),
            credential_path: None,
        }
    }
}

/// Locally served model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Model name (e.g., "llama3.1")
    #[serde(default = "default_local_model")]
    pub model: String,

    /// Ollama URL
    #[serde(default = "default_ollama_url")]
    pub url: String,

    /// Number of layers to offload to the GPU
    #[serde(default)]
    pub gpu_layers: Option<u32>,

    /// Context window size
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            model: default_local_model(),
            url: default_ollama_url(),
            gpu_layers: None,
            context_window: default_context_window(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Enrichment table filtering and checkpointing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Adjusted p-value cutoff for terms sent to the model
    #[serde(default = "default_p_value_cutoff")]
    pub p_value_cutoff: f64,

    /// Minimum number of genes a term must contain
    #[serde(default = "default_min_gene_count")]
    pub min_gene_count: usize,

    /// Maximum number of terms per source
    #[serde(default = "default_max_terms")]
    pub max_terms: usize,

    /// Directory for resumable session checkpoints
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            p_value_cutoff: default_p_value_cutoff(),
            min_gene_count: default_min_gene_count(),
            max_terms: default_max_terms(),
            checkpoint_dir: None,
        }
    }
}

// Default value functions
fn default_backend() -> String {
    "local".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_output_tokens() -> u32 {
    2048
}
fn default_seed() -> i64 {
    42
}
fn default_timeout_secs() -> u64 {
    300
} // chained enrichment calls on local models are slow
fn default_hosted_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_hosted_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_local_model() -> String {
    "llama3.1".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_context_window() -> usize {
    8192
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_p_value_cutoff() -> f64 {
    0.05
}
fn default_min_gene_count() -> usize {
    2
}
fn default_max_terms() -> usize {
    30
}

/// Configuration manager with layered sources
pub struct ConfigManager {
    config: CellScribeConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Config file (.cellscribe.toml)
    /// 3. Sensible defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None, |_| {})
    }

    /// Load from an explicit file, still honouring environment overrides
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(Some(path), |_| {})
    }

    /// Load from `path` (or the default search) and let `overrides` adjust the
    /// result after environment overrides. Validation runs last.
    pub fn load_with<F>(path: Option<&Path>, overrides: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(&mut CellScribeConfig),
    {
        info!("Loading CellScribe configuration");

        let (config, config_path) = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                Self::load_dotenv();
                (Self::read_toml_file(path)?, Some(path.to_path_buf()))
            }
            None => {
                Self::load_dotenv();
                Self::load_config_file()?
            }
        };

        let mut config = Self::apply_env_overrides(config, |key| std::env::var(key).ok());
        overrides(&mut config);
        Self::finish(config, config_path)
    }

    fn finish(config: CellScribeConfig, config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;

        match config_path {
            Some(ref path) => info!("Config file: {}", path.display()),
            None => info!("Config file: NONE (using defaults)"),
        }
        info!(
            "LLM backend: {} (hosted model {}, local model {})",
            config.llm.backend, config.llm.hosted.model, config.llm.local.model
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load .env file if it exists
    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            } else {
                info!("Loaded .env file from current directory");
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".cellscribe.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .cellscribe.env: {}", e);
                } else {
                    info!("Loaded .cellscribe.env from home directory");
                }
            }
        }
    }

    /// Find and load config file
    /// Search order:
    /// 1. ./.cellscribe.toml (current directory)
    /// 2. ~/.cellscribe/config.toml (user config)
    /// 3. Use defaults
    fn load_config_file() -> Result<(CellScribeConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".cellscribe.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".cellscribe").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        info!("No config file found, using defaults");
        Ok((CellScribeConfig::default(), None))
    }

    /// Read TOML config file
    fn read_toml_file(path: &Path) -> Result<CellScribeConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply environment variable overrides, reading variables through `lookup`
    pub fn apply_env_overrides<F>(mut config: CellScribeConfig, lookup: F) -> CellScribeConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("CELLSCRIBE_BACKEND") {
            config.llm.backend = backend;
        }
        if let Some(model) = lookup("CELLSCRIBE_MODEL") {
            config.llm.model = Some(model);
        }
        if let Some(temp) = lookup("CELLSCRIBE_TEMPERATURE") {
            if let Ok(t) = temp.parse() {
                config.llm.temperature = t;
            }
        }
        if let Some(seed) = lookup("CELLSCRIBE_SEED") {
            if let Ok(s) = seed.parse() {
                config.llm.seed = s;
            }
        }
        if let Some(tokens) = lookup("CELLSCRIBE_MAX_OUTPUT_TOKENS") {
            if let Ok(t) = tokens.parse() {
                config.llm.max_output_tokens = t;
            }
        }
        if let Some(path) = lookup("CELLSCRIBE_CREDENTIAL_PATH") {
            config.llm.hosted.credential_path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("CELLSCRIBE_OLLAMA_URL") {
            config.llm.local.url = url;
        }
        if let Some(level) = lookup("CELLSCRIBE_LOG_LEVEL") {
            config.logging.level = level;
        }

        // RUST_LOG holds filter directives and is read by the subscriber itself
        config
    }

    /// Validate configuration
    pub fn validate_config(config: &CellScribeConfig) -> Result<(), ConfigError> {
        if let Err(e) = config.llm.selector() {
            return Err(ConfigError::ValidationError(e.to_string()));
        }

        if !(0.0..=1.0).contains(&config.llm.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid temperature: {}. Must be within [0, 1]",
                config.llm.temperature
            )));
        }

        if config.llm.max_output_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_output_tokens must be positive".to_string(),
            ));
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        if !(0.0..=1.0).contains(&config.enrichment.p_value_cutoff) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid enrichment p-value cutoff: {}",
                config.enrichment.p_value_cutoff
            )));
        }

        Ok(())
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &CellScribeConfig {
        &self.config
    }

    /// Get the path to the config file that was loaded, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Create a default config file
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = CellScribeConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}
