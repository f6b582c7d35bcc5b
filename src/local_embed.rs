use crate::embeddings::{Embedder, Embedding};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use log::{debug, info};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// Sentence-transformer used when no local model is configured
pub const DEFAULT_LOCAL_MODEL: &str = "BAAI/bge-large-en-v1.5";

/// Resolve a model name to a fastembed model
pub fn parse_local_model(name: &str) -> Result<EmbeddingModel> {
    match name.trim() {
        "BAAI/bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "BAAI/bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "BAAI/bge-large-en-v1.5" => Ok(EmbeddingModel::BGELargeENV15),
        "sentence-transformers/all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "nomic-ai/nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        other => Err(RagError::InvalidConfiguration(format!(
            "unsupported local embedding model '{}'",
            other
        ))),
    }
}

/// Local neural embedder running an ONNX sentence-transformer through fastembed.
///
/// Inference is CPU-bound, so each batch runs on the blocking thread pool.
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_id: String,
    dimension: usize,
}

impl FastEmbedder {
    /// Load `model_name`, downloading it into `cache_dir` on first use
    pub fn new(model_name: &str, cache_dir: Option<PathBuf>) -> Result<Self> {
        let model = parse_local_model(model_name)?;

        let mut options = InitOptions::new(model).with_show_download_progress(true);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }

        let mut text_model = TextEmbedding::try_new(options).map_err(|e| {
            RagError::EmbeddingUnavailable(format!("failed to load {}: {}", model_name, e))
        })?;

        // Dimension comes from the model itself
        let dimension = text_model
            .embed(vec!["dimension check"], None)
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?
            .first()
            .map(|v| v.len())
            .ok_or_else(|| {
                RagError::EmbeddingUnavailable(format!("{} returned no embedding", model_name))
            })?;

        info!(
            "Loaded local embedding model {} ({} dimensions)",
            model_name, dimension
        );
        Ok(FastEmbedder {
            model: Arc::new(Mutex::new(text_model)),
            model_id: model_name.trim().to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        debug!("Embedding {} texts locally with {}", texts.len(), self.model_id);
        let model = Arc::clone(&self.model);
        let batch = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || model.lock().embed(batch, None))
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(format!("embedding task failed: {}", e)))?
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;

        Ok(vectors.into_iter().map(Embedding::new).collect())
    }
}
