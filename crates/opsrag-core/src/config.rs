use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::Error;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// The full typed settings tree, validated.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub reranker: RerankerSettings,
    pub retrieval: RetrievalSettings,
    pub agent: AgentSettings,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub vector_store_dir: String,
    pub table: String,
    pub knowledge_file: String,
    pub cluster_snapshot: Option<String>,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            vector_store_dir: "data/vector_store".into(),
            table: "chunks".into(),
            knowledge_file: "data/k8s_knowledge.json".into(),
            cluster_snapshot: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { max_chunk_chars: 1000, overlap_chars: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model_dir: String,
    pub use_fake: bool,
    pub dim: usize,
    pub max_len: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_dir: "models/all-MiniLM-L6-v2".into(),
            use_fake: false,
            dim: 384,
            max_len: 256,
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerSettings {
    pub enabled: bool,
    pub model_dir: Option<String>,
    pub use_fake: bool,
}

impl Default for RerankerSettings {
    fn default() -> Self {
        Self { enabled: true, model_dir: None, use_fake: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Candidates fetched per leg before fusion.
    pub initial_n: usize,
    /// RRF damping constant.
    pub fusion_k: f32,
    pub dedup_threshold: f32,
    pub default_n: usize,
    pub rerank_top_n: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { initial_n: 20, fusion_k: 60.0, dedup_threshold: 0.95, default_n: 5, rerank_top_n: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_tool_calls: usize,
    pub context_chunks: usize,
    pub rerank: bool,
    pub llm_timeout_secs: u64,
    pub tool_timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self { max_tool_calls: 3, context_chunks: 3, rerank: true, llm_timeout_secs: 60, tool_timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub stream: bool,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://integrate.api.nvidia.com/v1".into(),
            model: "meta/llama-3.3-70b-instruct".into(),
            api_key_env: "NVIDIA_API_KEY".into(),
            temperature: 0.2,
            top_p: 0.7,
            max_tokens: 1024,
            stream: false,
            timeout_secs: 60,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if self.chunking.max_chunk_chars == 0 {
            return invalid("chunking.max_chunk_chars must be positive".into());
        }
        if self.chunking.overlap_chars >= self.chunking.max_chunk_chars {
            return invalid(format!(
                "chunking.overlap_chars ({}) must be smaller than max_chunk_chars ({})",
                self.chunking.overlap_chars, self.chunking.max_chunk_chars
            ));
        }
        let t = self.retrieval.dedup_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return invalid(format!("retrieval.dedup_threshold must be in (0, 1], got {t}"));
        }
        if self.retrieval.fusion_k <= 0.0 {
            return invalid("retrieval.fusion_k must be positive".into());
        }
        if self.retrieval.initial_n == 0 {
            return invalid("retrieval.initial_n must be at least 1".into());
        }
        if self.agent.max_tool_calls == 0 {
            return invalid("agent.max_tool_calls must be at least 1".into());
        }
        if self.embedding.dim == 0 {
            return invalid("embedding.dim must be positive".into());
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
