use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Top-level ragloop configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retriever: RetrieverConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Limits applied to every run of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of passes through the rewrite node per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Overall deadline for one run.
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
    /// Timeout for a single model call.
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_duration_secs: default_max_duration(),
            model_timeout_secs: default_model_timeout(),
        }
    }
}

impl AgentConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

fn default_max_iterations() -> usize { 3 }
fn default_max_duration() -> u64 { 300 }
fn default_model_timeout() -> u64 { 120 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            extra_headers: HashMap::new(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "ollama".to_string() }
fn default_model_id() -> String { "mistral".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for model requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "ollama", "openai", or any OpenAI-compatible API.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Model name (e.g., "all-minilm:latest", "text-embedding-3-small").
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Base URL for the embedding API (e.g., "http://localhost:11434/v1").
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
    /// Texts per embedding request.
    #[serde(default = "default_embedding_batch")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: None,
            api_key: None,
            dimensions: default_embedding_dims(),
            batch_size: default_embedding_batch(),
        }
    }
}

impl EmbeddingConfig {
    /// Base URL, falling back to the provider's well-known endpoint.
    pub fn resolved_base_url(&self) -> String {
        if let Some(ref url) = self.base_url {
            return url.clone();
        }
        match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1".to_string(),
            _ => "http://localhost:11434/v1".to_string(),
        }
    }
}

fn default_embedding_provider() -> String { "ollama".to_string() }
fn default_embedding_model() -> String { "all-minilm:latest".to_string() }
fn default_embedding_dims() -> usize { 384 }
fn default_embedding_batch() -> usize { 64 }

/// The retrieval tool surfaced to the router model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverConfig {
    #[serde(default = "default_retriever_name")]
    pub name: String,
    #[serde(default = "default_retriever_description")]
    pub description: String,
    /// Passages returned per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_retriever_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            name: default_retriever_name(),
            description: default_retriever_description(),
            top_k: default_top_k(),
            timeout_secs: default_retriever_timeout(),
        }
    }
}

fn default_retriever_name() -> String { "retrieve_blog_posts".to_string() }
fn default_retriever_description() -> String {
    "Search and return information about Lilian Weng blog posts on LLM agents, \
     prompt engineering, and adversarial attacks on LLMs."
        .to_string()
}
fn default_top_k() -> usize { 4 }
fn default_retriever_timeout() -> u64 { 30 }

/// Sources loaded into the index before any run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_urls() -> Vec<String> {
    vec![
        "https://lilianweng.github.io/posts/2023-06-23-agent/".to_string(),
        "https://lilianweng.github.io/posts/2023-03-15-prompt-engineering/".to_string(),
        "https://lilianweng.github.io/posts/2023-10-25-adv-attack-llm/".to_string(),
    ]
}
fn default_chunk_size() -> usize { 500 }
fn default_chunk_overlap() -> usize { 50 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| RagError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| RagError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every run fail.
    pub fn validate(&self) -> Result<()> {
        if self.ingest.chunk_size == 0 {
            return Err(RagError::Config("ingest.chunk_size must be > 0".into()));
        }
        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            return Err(RagError::Config(format!(
                "ingest.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.ingest.chunk_overlap, self.ingest.chunk_size
            )));
        }
        if self.retriever.top_k == 0 {
            return Err(RagError::Config("retriever.top_k must be > 0".into()));
        }
        if self.retriever.timeout_secs == 0 {
            return Err(RagError::Config("retriever.timeout_secs must be > 0".into()));
        }
        if self.agent.model_timeout_secs == 0 || self.agent.max_duration_secs == 0 {
            return Err(RagError::Config("agent timeouts must be > 0".into()));
        }
        Ok(())
    }

    /// Default location in the user's home directory.
    pub fn home_config_path() -> Option<PathBuf> {
        dirs_home().map(|h| h.join(".ragloop").join("config.toml"))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
