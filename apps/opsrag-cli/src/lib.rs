//! Wiring shared by the `opsrag` and `opsrag-indexer` binaries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use opsrag_agent::{register_cluster_tools, AgentConfig, LlmClient, OpenAiCompatClient, Orchestrator, SnapshotCluster, ToolRegistry};
use opsrag_core::config::{expand_path, Config, Settings};
use opsrag_core::ChunkingConfig;
use opsrag_embed::{get_default_embedder, get_default_reranker};
use opsrag_hybrid::HybridSearchEngine;
use opsrag_text::TantivyLexicalIndex;
use opsrag_vector::table::reset_store;
use opsrag_vector::LanceVectorStore;

pub type Engine = HybridSearchEngine<TantivyLexicalIndex, LanceVectorStore>;

/// Loads `.env`, installs the log subscriber (`RUST_LOG`, default `info`)
/// and reads the layered configuration.
pub fn bootstrap() -> Result<Settings> {
    // a missing .env is fine; the real environment still applies
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    Config::load()?.settings()
}

pub fn vector_store_dir(settings: &Settings) -> PathBuf {
    expand_path(&settings.data.vector_store_dir)
}

/// Opens the persisted store and loads it into both retrieval legs.
/// `fresh` deletes the store first.
pub async fn open_engine(settings: &Settings, fresh: bool) -> Result<Engine> {
    let dir = vector_store_dir(settings);
    if fresh {
        reset_store(&dir)?;
    }
    std::fs::create_dir_all(&dir)?;

    let embedder = get_default_embedder(&settings.embedding)?;
    let store = LanceVectorStore::open(&dir, &settings.data.table, embedder.dim()).await?;
    let reranker = get_default_reranker(&settings.reranker)?;
    let engine = HybridSearchEngine::new(
        embedder,
        store,
        TantivyLexicalIndex::new()?,
        settings.retrieval.clone(),
        ChunkingConfig::from(&settings.chunking),
    )
    .with_reranker(reranker);

    let loaded = engine.load_persisted().await?;
    info!(chunks = loaded, embedder = engine.embedder_id(), "knowledge base ready");
    Ok(engine)
}

pub fn build_tools(settings: &Settings) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new().with_timeout(Duration::from_secs(settings.agent.tool_timeout_secs));
    match &settings.data.cluster_snapshot {
        Some(path) => {
            let cluster = SnapshotCluster::from_file(&expand_path(path))?;
            register_cluster_tools(&mut registry, Arc::new(cluster));
        }
        None => warn!("no cluster snapshot configured; live cluster tools are unavailable"),
    }
    Ok(registry)
}

/// `None` (retrieval-only mode) when no API key is available.
pub fn build_llm(settings: &Settings) -> Option<Arc<dyn LlmClient>> {
    match OpenAiCompatClient::from_settings(&settings.llm) {
        Ok(client) => {
            info!(model = %settings.llm.model, "LLM client ready");
            Some(Arc::new(client))
        }
        Err(e) => {
            warn!(error = %e, "running in retrieval-only mode");
            None
        }
    }
}

pub async fn build_orchestrator(settings: &Settings) -> Result<Orchestrator> {
    let engine = open_engine(settings, false).await?;
    let tools = build_tools(settings)?;
    let llm = build_llm(settings);
    let config = AgentConfig::from_settings(&settings.agent, &settings.llm);
    Ok(Orchestrator::new(Arc::new(engine), llm, Arc::new(tools), config))
}
