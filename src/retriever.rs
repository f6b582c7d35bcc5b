use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::document::Document;
use crate::embeddings::{embed_in_batches, Embedder, Embedding};
use crate::error::{RagError, Result};
use crate::index::{QueryResult, VectorIndex};
use futures::stream::{self, StreamExt};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Tuning knobs for the embedding stage
#[derive(Debug, Clone, Copy)]
pub struct RetrieverOptions {
    pub batch_size: usize,
    /// Deadline for each embedding backend call
    pub embed_timeout: Duration,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        RetrieverOptions {
            batch_size: 32,
            embed_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a successful ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks: usize,
    /// Whether an earlier version of the document was superseded
    pub replaced: bool,
}

/// Runs documents through chunking, embedding and indexing, and answers
/// similarity queries against the resulting index.
pub struct Retriever {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    options: RetrieverOptions,
}

impl Retriever {
    /// Fails if the embedder does not produce vectors the index was built for.
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        index: Arc<VectorIndex>,
        options: RetrieverOptions,
    ) -> Result<Self> {
        let metadata = index.metadata();
        if embedder.model_id() != metadata.model_id {
            return Err(RagError::ModelMismatch {
                stored: metadata.model_id.clone(),
                configured: embedder.model_id().to_string(),
            });
        }
        if embedder.dimension() != metadata.dimension {
            return Err(RagError::DimensionMismatch {
                expected: metadata.dimension,
                actual: embedder.dimension(),
            });
        }
        if options.batch_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding batch size must be greater than zero".to_string(),
            ));
        }

        Ok(Retriever {
            chunker,
            embedder,
            index,
            options,
        })
    }

    pub fn from_config(
        config: &RagConfig,
        embedder: Arc<dyn Embedder>,
        index: Arc<VectorIndex>,
    ) -> Result<Self> {
        let chunker = Chunker::new(config.chunk_size, config.overlap)?;
        let options = RetrieverOptions {
            batch_size: config.embed_batch_size,
            embed_timeout: config.embed_timeout,
        };
        Retriever::new(chunker, embedder, index, options)
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Chunk, embed and index a document, superseding any earlier version.
    ///
    /// The index is only touched by the final `add`, so a chunking or embedding
    /// failure leaves the previous state of the document in place.
    pub async fn ingest(&self, document: &Document) -> Result<IngestReport> {
        if document.content.trim().is_empty() {
            return Err(RagError::EmptyDocument(document.id.clone()));
        }
        let chunks = self.chunker.chunk(&document.id, &document.content);

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embed_in_batches(
            self.embedder.as_ref(),
            &texts,
            self.options.batch_size,
            self.options.embed_timeout,
        )
        .await?;

        let replaced = self.index.contains(&document.id);
        let count = self
            .index
            .add(&document.id, document.metadata.clone(), chunks, embeddings)?;

        info!(
            "Indexed '{}' as {} chunks{}",
            document.id,
            count,
            if replaced { " (replacing earlier version)" } else { "" }
        );
        Ok(IngestReport {
            document_id: document.id.clone(),
            chunks: count,
            replaced,
        })
    }

    /// Ingest several documents, up to `concurrency` at a time.
    /// Results are returned in input order; one failure does not stop the others.
    pub async fn ingest_many(
        &self,
        documents: &[Document],
        concurrency: usize,
    ) -> Vec<(String, Result<IngestReport>)> {
        let mut results: Vec<(usize, String, Result<IngestReport>)> =
            stream::iter(documents.iter().enumerate())
                .map(|(position, document)| async move {
                    let outcome = self.ingest(document).await;
                    if let Err(e) = &outcome {
                        warn!("Failed to ingest '{}': {}", document.id, e);
                    }
                    (position, document.id.clone(), outcome)
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

        results.sort_by_key(|(position, _, _)| *position);
        results
            .into_iter()
            .map(|(_, id, outcome)| (id, outcome))
            .collect()
    }

    /// Top-k chunks across the corpus for a natural-language question
    pub async fn query(&self, question: &str, k: usize) -> Result<QueryResult> {
        let embedding = self.embed_question(question).await?;
        self.index.search(&embedding, k)
    }

    /// Top-k chunks of one document; empty when the document is not indexed
    pub async fn query_document(
        &self,
        question: &str,
        k: usize,
        document_id: &str,
    ) -> Result<QueryResult> {
        let embedding = self.embed_question(question).await?;
        self.index.search_within(&embedding, k, document_id)
    }

    /// Drop a document and all of its chunks
    pub fn remove(&self, document_id: &str) -> bool {
        self.index.remove(document_id)
    }

    async fn embed_question(&self, question: &str) -> Result<Embedding> {
        if question.trim().is_empty() {
            return Err(RagError::InvalidConfiguration(
                "question must not be empty".to_string(),
            ));
        }
        let mut embeddings = embed_in_batches(
            self.embedder.as_ref(),
            &[question.to_string()],
            1,
            self.options.embed_timeout,
        )
        .await?;
        embeddings.pop().ok_or_else(|| {
            RagError::EmbeddingUnavailable("no embedding returned for question".to_string())
        })
    }
}
