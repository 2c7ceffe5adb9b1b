// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for starsearch
//!
//! Loads configuration from .starsearch.toml in current directory or
//! ~/.config/starsearch/config.toml, then applies environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::remote::retry::RetryPolicy;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_GITHUB_API: &str = "https://api.github.com";
const DEFAULT_SUMMARIZER_URL: &str = "https://api.deepseek.com/v1";
const DEFAULT_SUMMARIZER_MODEL: &str = "deepseek-chat";

/// GitHub access configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// Personal access token (overridden by GITHUB_TOKEN)
    pub token: Option<String>,
    /// API base URL, for GitHub Enterprise or test servers
    pub api_url: Option<String>,
    /// Items per listing page
    pub per_page: Option<u32>,
}

impl GithubConfig {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    /// Get API base URL (defaults to https://api.github.com)
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or(DEFAULT_GITHUB_API)
            .trim_end_matches('/')
    }

    /// Get page size (defaults to 30, clamped to the API maximum of 100)
    pub fn per_page(&self) -> u32 {
        self.per_page.unwrap_or(30).clamp(1, 100)
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend name (sentence-transformers, voyageai, command)
    pub backend: Option<String>,
    /// Model identifier for remote or command backends
    pub model: Option<String>,
    /// Command to execute for the command backend
    pub command: Option<String>,
    /// Voyage AI key (overridden by VOYAGE_API_KEY)
    pub api_key: Option<String>,
    /// Texts per provider request
    pub batch_size: Option<usize>,
}

impl EmbeddingConfig {
    /// Get backend name (defaults to "sentence-transformers")
    pub fn backend(&self) -> &str {
        self.backend.as_deref().unwrap_or("sentence-transformers")
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }

    /// Get batch size (defaults to 128)
    pub fn batch_size(&self) -> usize {
        self.batch_size.filter(|&b| b > 0).unwrap_or(128)
    }
}

/// Summarizer configuration (OpenAI-compatible chat endpoint)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// API key (overridden by DEEPSEEK_API_KEY); summaries are disabled without one
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Characters of README text sent for summarization
    pub max_chars: Option<usize>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl SummarizerConfig {
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }

    /// Get base URL (defaults to the DeepSeek API)
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_SUMMARIZER_URL)
            .trim_end_matches('/')
    }

    /// Get model (defaults to "deepseek-chat")
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_SUMMARIZER_MODEL)
    }

    /// Get max tokens (defaults to 1000)
    pub fn max_tokens(&self) -> usize {
        self.max_tokens.unwrap_or(1000)
    }

    /// Get max input chars (defaults to 4 chars per token of max_tokens)
    pub fn max_chars(&self) -> usize {
        self.max_chars.unwrap_or_else(|| self.max_tokens() * 4)
    }

    /// Get temperature (defaults to 0.7)
    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(0.7)
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum in-flight enrichments per page
    pub concurrency: Option<usize>,
}

impl SyncConfig {
    /// Get concurrency (defaults to 8, never below 1)
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(8).max(1)
    }
}

/// Network behavior shared by every remote client
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

impl RemoteConfig {
    /// Get request timeout (defaults to 30s)
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(30).max(1))
    }

    /// Get retry policy (defaults to 2 retries starting at 500ms)
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries.unwrap_or(2),
            Duration::from_millis(self.retry_backoff_ms.unwrap_or(500)),
        )
    }
}

/// Configuration loaded from .starsearch.toml or ~/.config/starsearch/config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding default.db and the index files
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub github: GithubConfig,

    #[serde(default)]
    pub embeddings: EmbeddingConfig,

    #[serde(default)]
    pub summarizer: SummarizerConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub remote: RemoteConfig,
}

impl Config {
    /// Load configuration from files, then apply environment overrides
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables
    /// 2. .starsearch.toml in current directory
    /// 3. ~/.config/starsearch/config.toml
    pub fn load() -> Self {
        Self::load_files().with_env_overrides(|name| std::env::var(name).ok())
    }

    fn load_files() -> Self {
        if let Some(config) = Self::load_from_path(Path::new(".starsearch.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("starsearch").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "loaded config");
                Some(config)
            }
            Err(e) => {
                eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Apply environment overrides using the given lookup.
    ///
    /// Empty values are ignored so an exported-but-blank variable does not
    /// mask the file setting.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(backend) = get("EMBEDDING_IMPLEMENTATION") {
            self.embeddings.backend = Some(backend);
        }
        if let Some(key) = get("VOYAGE_API_KEY") {
            self.embeddings.api_key = Some(key);
        }
        if let Some(key) = get("DEEPSEEK_API_KEY") {
            self.summarizer.api_key = Some(key);
        }
        if let Some(dir) = get("STARSEARCH_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        self
    }

    /// Get data directory (defaults to ./data)
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    /// Path of the record store database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("default.db")
    }

    pub fn github(&self) -> &GithubConfig {
        &self.github
    }

    pub fn embeddings(&self) -> &EmbeddingConfig {
        &self.embeddings
    }

    pub fn summarizer(&self) -> &SummarizerConfig {
        &self.summarizer
    }

    pub fn sync(&self) -> &SyncConfig {
        &self.sync
    }

    pub fn remote(&self) -> &RemoteConfig {
        &self.remote
    }
}
