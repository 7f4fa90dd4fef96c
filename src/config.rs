use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub distiller: DistillerConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
    /// File the configuration was read from; `None` when defaults were used
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// General settings
#[derive(Debug, Clone, Deserialize)]
pub struct DistillerConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DistillerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Completion provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of an OpenAI-compatible chat completions API
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Name of the environment variable holding the credential
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Model menu offered to the user
    #[serde(default = "default_models")]
    pub models: Vec<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            models: default_models(),
        }
    }
}

/// Where processed documents are written
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default = "default_dir_prefix")]
    pub dir_prefix: String,
    /// Remote persistence endpoint. When unset the CLI writes to `output_root` directly.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            dir_prefix: default_dir_prefix(),
            endpoint: None,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_models() -> Vec<String> {
    vec![
        "gpt-4o-mini".to_string(),
        "claude-3-5-haiku-20241022".to_string(),
        "gemini-1.5-flash".to_string(),
    ]
}

fn default_output_root() -> PathBuf {
    PathBuf::from("distilled")
}

fn default_dir_prefix() -> String {
    "distill-".to_string()
}

fn default_http_port() -> u16 {
    3000
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in DISTILLER_CONFIG environment variable
    /// 2. ./config.toml in current directory
    ///
    /// A missing ./config.toml falls back to defaults; an explicit
    /// DISTILLER_CONFIG path must exist.
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config = match std::env::var("DISTILLER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                let path = PathBuf::from("config.toml");
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Config::default()
                }
            }
        };

        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration file without consulting the environment
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.source = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.completion.timeout_secs == 0 {
            anyhow::bail!("completion.timeout_secs must be greater than 0");
        }

        if self.completion.models.is_empty() {
            anyhow::bail!("completion.models must list at least one model");
        }

        if self.storage.output_root.as_os_str().is_empty() {
            anyhow::bail!("storage.output_root must not be empty");
        }

        if self.storage.dir_prefix.contains(['/', '\\']) {
            anyhow::bail!("storage.dir_prefix must not contain path separators");
        }

        Ok(())
    }

    /// Read the completion credential, if one is configured in the environment
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.completion.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    /// Get the storage root
    pub fn output_root(&self) -> &Path {
        &self.storage.output_root
    }
}
