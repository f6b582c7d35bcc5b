use crate::error::{RagError, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Embedding { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Text embedding capability implemented once per backend.
///
/// Implementations return one vector per input, in input order, each of
/// length [`Embedder::dimension`]. Backend failures are reported as
/// [`RagError::EmbeddingUnavailable`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the model, recorded in persisted indexes
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embed one backend batch
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Embed `texts` in batches of `batch_size`, bounding each backend call by `timeout`.
///
/// The output does not depend on `batch_size`. Every returned vector is checked
/// against the embedder's declared dimension.
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    timeout: Duration,
) -> Result<Vec<Embedding>> {
    if batch_size == 0 {
        return Err(RagError::InvalidConfiguration(
            "embedding batch size must be greater than zero".to_string(),
        ));
    }

    let mut embeddings = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        debug!(
            "Embedding batch of {} texts with {}",
            batch.len(),
            embedder.model_id()
        );
        let vectors = tokio::time::timeout(timeout, embedder.embed(batch))
            .await
            .map_err(|_| RagError::Timeout {
                operation: "embedding",
                after: timeout,
            })??;

        if vectors.len() != batch.len() {
            return Err(RagError::EmbeddingUnavailable(format!(
                "{} returned {} vectors for {} inputs",
                embedder.model_id(),
                vectors.len(),
                batch.len()
            )));
        }
        for vector in &vectors {
            if vector.dimension() != embedder.dimension() {
                return Err(RagError::DimensionMismatch {
                    expected: embedder.dimension(),
                    actual: vector.dimension(),
                });
            }
        }
        embeddings.extend(vectors);
    }

    Ok(embeddings)
}

/// Offline embedder based on signed feature hashing of lowercase word tokens.
///
/// Vectors are L2-normalised. It needs no model download and is fully
/// deterministic, which makes it suitable for tests and air-gapped use.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(HashingEmbedder {
            dimension,
            model_id: format!("hashing-v1-{}", dimension),
        })
    }

    fn embed_text(&self, text: &str) -> Embedding {
        let mut values = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.to_lowercase().as_bytes());
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            values[slot] += sign;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }

        Embedding { values }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}
