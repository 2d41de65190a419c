//! Local transformer inference for embeddings and reranking.
//!
//! `get_default_embedder` and `get_default_reranker` pick between the candle
//! models and the deterministic stand-ins based on settings and
//! `APP_USE_FAKE_EMBEDDINGS`.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use opsrag_core::config::{expand_path, EmbeddingSettings, RerankerSettings};
use opsrag_core::traits::{CrossEncoder, Embedder};

pub mod cross_encoder;
pub mod device;
pub mod fake;
pub mod model;
pub mod pool;
pub mod tokenize;

pub use cross_encoder::CrossEncoderModel;
pub use fake::{FakeEmbedder, LexicalOverlapScorer};
pub use model::EmbeddingModel;
pub use pool::{l2_normalize, masked_mean_l2};

fn fake_forced() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    if settings.use_fake || fake_forced() {
        info!(dim = settings.dim, "using FakeEmbedder");
        return Ok(Arc::new(FakeEmbedder::new(settings.dim)));
    }
    let dir = resolve_model_dir(&settings.model_dir)?;
    let model = EmbeddingModel::load(&dir, settings.max_len, settings.batch_size)?;
    if model.dim() != settings.dim {
        warn!(configured = settings.dim, actual = model.dim(), "embedding.dim differs from the model; using the model's");
    }
    Ok(Arc::new(model))
}

/// `None` when reranking is disabled. A missing model directory degrades to
/// the lexical-overlap scorer rather than failing startup.
pub fn get_default_reranker(settings: &RerankerSettings) -> Result<Option<Arc<dyn CrossEncoder>>> {
    if !settings.enabled {
        return Ok(None);
    }
    if settings.use_fake || fake_forced() {
        return Ok(Some(Arc::new(LexicalOverlapScorer)));
    }
    match settings.model_dir.as_deref().map(resolve_model_dir) {
        Some(Ok(dir)) => Ok(Some(Arc::new(CrossEncoderModel::load(&dir)?))),
        Some(Err(e)) => {
            warn!(error = %e, "cross-encoder unavailable; falling back to lexical overlap");
            Ok(Some(Arc::new(LexicalOverlapScorer)))
        }
        None => Ok(Some(Arc::new(LexicalOverlapScorer))),
    }
}

/// `APP_MODEL_DIR` wins over the configured directory.
fn resolve_model_dir(configured: &str) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("APP_MODEL_DIR") {
        let p = expand_path(&dir);
        if p.exists() { info!(dir = %p.display(), "using APP_MODEL_DIR"); return Ok(p); }
    }
    let p = expand_path(configured);
    if p.exists() { return Ok(p); }
    let parent = Path::new("..").join(&p);
    if parent.exists() { return Ok(parent); }
    Err(anyhow!("Could not locate model directory {}", configured))
}
