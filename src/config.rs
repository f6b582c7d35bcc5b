use crate::error::{RagError, Result};
use crate::index::SimilarityMetric;
use crate::local_embed::DEFAULT_LOCAL_MODEL;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which embedding adapter the session should construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Gemini,
    /// Local sentence-transformer through fastembed
    FastEmbed,
    Hashing,
}

impl FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(EmbeddingBackend::Gemini),
            "fastembed" | "local" => Ok(EmbeddingBackend::FastEmbed),
            "hashing" | "hash" => Ok(EmbeddingBackend::Hashing),
            other => Err(format!("unknown embedding backend '{}'", other)),
        }
    }
}

/// Configuration consumed by the retrieval core and the assistant
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Chunk length in characters
    pub chunk_size: usize,
    /// Characters shared by adjacent chunks
    pub overlap: usize,
    pub embedding_dimension: usize,
    pub similarity_metric: SimilarityMetric,
    pub top_k_default: usize,
    pub embed_batch_size: usize,
    pub embed_timeout: Duration,
    pub acquisition_timeout: Duration,
    /// Estimated token budget for the generation context
    pub context_tokens: usize,
    pub ingest_concurrency: usize,
    pub index_path: PathBuf,
    pub embedding_backend: EmbeddingBackend,
    /// Model name for the fastembed backend
    pub local_model: String,
    pub model_cache_dir: Option<PathBuf>,
}

impl Default for RagConfig {
    fn default() -> Self {
        RagConfig {
            chunk_size: 1000,
            overlap: 200,
            embedding_dimension: 768,
            similarity_metric: SimilarityMetric::Cosine,
            top_k_default: 5,
            embed_batch_size: 32,
            embed_timeout: Duration::from_secs(30),
            acquisition_timeout: Duration::from_secs(60),
            context_tokens: 2048,
            ingest_concurrency: 4,
            index_path: PathBuf::from("paper_index.json"),
            embedding_backend: EmbeddingBackend::Gemini,
            local_model: DEFAULT_LOCAL_MODEL.to_string(),
            model_cache_dir: None,
        }
    }
}

impl RagConfig {
    /// Create a new configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = RagConfig::default();

        let config = RagConfig {
            chunk_size: env_or("RAG_CHUNK_SIZE", defaults.chunk_size)?,
            overlap: env_or("RAG_OVERLAP", defaults.overlap)?,
            embedding_dimension: env_or("RAG_EMBEDDING_DIMENSION", defaults.embedding_dimension)?,
            similarity_metric: env_or("RAG_SIMILARITY_METRIC", defaults.similarity_metric)?,
            top_k_default: env_or("RAG_TOP_K", defaults.top_k_default)?,
            embed_batch_size: env_or("RAG_EMBED_BATCH_SIZE", defaults.embed_batch_size)?,
            embed_timeout: Duration::from_secs(env_or(
                "RAG_EMBED_TIMEOUT_SECS",
                defaults.embed_timeout.as_secs(),
            )?),
            acquisition_timeout: Duration::from_secs(env_or(
                "RAG_ACQUISITION_TIMEOUT_SECS",
                defaults.acquisition_timeout.as_secs(),
            )?),
            context_tokens: env_or("RAG_CONTEXT_TOKENS", defaults.context_tokens)?,
            ingest_concurrency: env_or("RAG_INGEST_CONCURRENCY", defaults.ingest_concurrency)?,
            index_path: env::var("RAG_INDEX_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.index_path),
            embedding_backend: env_or("RAG_EMBEDDING_BACKEND", defaults.embedding_backend)?,
            local_model: env::var("RAG_LOCAL_MODEL").unwrap_or(defaults.local_model),
            model_cache_dir: env::var("RAG_MODEL_CACHE_DIR").ok().map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject parameter combinations the core cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        if self.embedding_dimension == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding_dimension must be greater than zero".to_string(),
            ));
        }
        if self.top_k_default == 0 {
            return Err(RagError::InvalidConfiguration(
                "top_k_default must be greater than zero".to_string(),
            ));
        }
        if self.context_tokens == 0 {
            return Err(RagError::InvalidConfiguration(
                "context_tokens must be greater than zero".to_string(),
            ));
        }
        if self.embed_batch_size == 0 || self.ingest_concurrency == 0 {
            return Err(RagError::InvalidConfiguration(
                "batch size and ingest concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RagError::InvalidConfiguration(format!("{}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let config = RagConfig {
            chunk_size: 100,
            overlap: 100,
            ..RagConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RagError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let config = RagConfig {
            embedding_dimension: 0,
            ..RagConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_context_budget_rejected() {
        let config = RagConfig {
            context_tokens: 0,
            ..RagConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RagError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!(
            "Gemini".parse::<EmbeddingBackend>().unwrap(),
            EmbeddingBackend::Gemini
        );
        assert_eq!(
            "hashing".parse::<EmbeddingBackend>().unwrap(),
            EmbeddingBackend::Hashing
        );
        assert_eq!(
            "local".parse::<EmbeddingBackend>().unwrap(),
            EmbeddingBackend::FastEmbed
        );
        assert!("faiss".parse::<EmbeddingBackend>().is_err());
    }
}
