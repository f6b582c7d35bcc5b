use crate::chunking::TextChunk;
use crate::document::DocumentMetadata;
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const FORMAT_VERSION: u32 = 1;

/// Similarity metric, fixed for the lifetime of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    Dot,
    /// Scored as the negated L2 distance so that higher is always better
    Euclidean,
}

impl SimilarityMetric {
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            SimilarityMetric::Cosine => cosine_similarity(a, b),
            SimilarityMetric::Dot => dot(a, b),
            SimilarityMetric::Euclidean => -a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

impl FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "dot" => Ok(SimilarityMetric::Dot),
            "euclidean" | "l2" => Ok(SimilarityMetric::Euclidean),
            other => Err(format!("unknown similarity metric '{}'", other)),
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::Dot => "dot",
            SimilarityMetric::Euclidean => "euclidean",
        };
        f.write_str(name)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity; a zero-magnitude vector scores 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// Properties an index is built with. Changing any of them requires a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub dimension: usize,
    pub metric: SimilarityMetric,
    /// Identifier of the embedding model that produced the stored vectors
    pub model_id: String,
}

/// A chunk, its vector and a reference to its document
#[derive(Debug, Clone)]
struct IndexEntry {
    chunk: TextChunk,
    embedding: Embedding,
    document: Arc<DocumentMetadata>,
    /// Insertion sequence number, used to break score ties
    seq: u64,
}

/// One ranked search result with provenance
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: TextChunk,
    pub score: f32,
    pub document: Arc<DocumentMetadata>,
}

/// Hits ordered by descending score, ties by insertion order
pub type QueryResult = Vec<SearchHit>;

#[derive(Debug, Default)]
struct IndexState {
    /// Kept in insertion order
    entries: Vec<IndexEntry>,
    documents: BTreeMap<String, Arc<DocumentMetadata>>,
    next_seq: u64,
}

impl IndexState {
    fn remove_document(&mut self, document_id: &str) -> usize {
        if self.documents.remove(document_id).is_none() {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|e| e.chunk.document_id != document_id);
        before - self.entries.len()
    }
}

/// In-memory exact nearest-neighbour index over document chunks.
///
/// Writers hold the lock only while swapping a document's entries in or out,
/// so a search observes either all of a document's entries or none of them.
#[derive(Debug)]
pub struct VectorIndex {
    metadata: IndexMetadata,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Create an empty index
    pub fn new(metadata: IndexMetadata) -> Result<Self> {
        if metadata.dimension == 0 {
            return Err(RagError::InvalidConfiguration(
                "index dimension must be greater than zero".to_string(),
            ));
        }
        info!(
            "Initializing vector index: dimension {}, metric {}, model {}",
            metadata.dimension, metadata.metric, metadata.model_id
        );
        Ok(VectorIndex {
            metadata,
            state: RwLock::new(IndexState::default()),
        })
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn dimension(&self) -> usize {
        self.metadata.dimension
    }

    /// Replace all entries of `document_id` with the given chunks.
    ///
    /// Everything is validated before the index is touched: on error the
    /// previous entries of the document remain in place.
    pub fn add(
        &self,
        document_id: &str,
        metadata: DocumentMetadata,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Embedding>,
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Err(RagError::EmptyDocument(document_id.to_string()));
        }
        if chunks.len() != embeddings.len() {
            return Err(RagError::InvalidConfiguration(format!(
                "{} chunks but {} embeddings for document '{}'",
                chunks.len(),
                embeddings.len(),
                document_id
            )));
        }
        if let Some(stray) = chunks.iter().find(|c| c.document_id != document_id) {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk {} belongs to '{}', not '{}'",
                stray.index, stray.document_id, document_id
            )));
        }
        for embedding in &embeddings {
            self.check_vector(&embedding.values)?;
        }

        let document = Arc::new(metadata);
        let count = chunks.len();
        let mut entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry {
                chunk,
                embedding,
                document: Arc::clone(&document),
                seq: 0,
            })
            .collect();

        let mut state = self.state.write();
        let replaced = state.remove_document(document_id);
        for entry in &mut entries {
            entry.seq = state.next_seq;
            state.next_seq += 1;
        }
        state.entries.extend(entries);
        state.documents.insert(document_id.to_string(), document);
        drop(state);

        if replaced > 0 {
            debug!(
                "Replaced {} entries of '{}' with {}",
                replaced, document_id, count
            );
        } else {
            debug!("Added {} entries for '{}'", count, document_id);
        }
        Ok(count)
    }

    /// Delete every entry of a document. Returns false when it was not indexed.
    pub fn remove(&self, document_id: &str) -> bool {
        let mut state = self.state.write();
        let present = state.documents.contains_key(document_id);
        let removed = state.remove_document(document_id);
        drop(state);

        if present {
            debug!("Removed {} entries of '{}'", removed, document_id);
        }
        present
    }

    /// Top-k entries over the whole corpus
    pub fn search(&self, query: &Embedding, k: usize) -> Result<QueryResult> {
        self.ranked(query, k, |_| true)
    }

    /// Top-k entries of a single document; empty if it is not indexed
    pub fn search_within(
        &self,
        query: &Embedding,
        k: usize,
        document_id: &str,
    ) -> Result<QueryResult> {
        self.ranked(query, k, |entry| entry.chunk.document_id == document_id)
    }

    fn ranked<F>(&self, query: &Embedding, k: usize, keep: F) -> Result<QueryResult>
    where
        F: Fn(&IndexEntry) -> bool,
    {
        if k == 0 {
            return Err(RagError::InvalidConfiguration(
                "k must be greater than zero".to_string(),
            ));
        }
        self.check_vector(&query.values)?;

        let state = self.state.read();
        let mut scored: Vec<(f32, &IndexEntry)> = state
            .entries
            .iter()
            .filter(|entry| keep(*entry))
            .map(|entry| {
                let score = self
                    .metadata
                    .metric
                    .score(&query.values, &entry.embedding.values);
                (score, entry)
            })
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.seq.cmp(&b.1.seq)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| SearchHit {
                chunk: entry.chunk.clone(),
                score,
                document: Arc::clone(&entry.document),
            })
            .collect())
    }

    /// Total number of entries
    pub fn size(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn document_count(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.state.read().documents.contains_key(document_id)
    }

    /// Indexed document ids in sorted order
    pub fn document_ids(&self) -> Vec<String> {
        self.state.read().documents.keys().cloned().collect()
    }

    pub fn document(&self, document_id: &str) -> Option<Arc<DocumentMetadata>> {
        self.state.read().documents.get(document_id).cloned()
    }

    /// Number of chunks indexed for a document
    pub fn chunk_count(&self, document_id: &str) -> usize {
        self.state
            .read()
            .entries
            .iter()
            .filter(|e| e.chunk.document_id == document_id)
            .count()
    }

    fn check_vector(&self, values: &[f32]) -> Result<()> {
        if values.len() != self.metadata.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.metadata.dimension,
                actual: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(RagError::InvalidConfiguration(
                "embedding contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }

    /// Write the index to `path` as JSON, replacing any previous file atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let stored = {
            let state = self.state.read();
            StoredIndex {
                format_version: FORMAT_VERSION,
                metadata: self.metadata.clone(),
                documents: state
                    .documents
                    .iter()
                    .map(|(id, metadata)| StoredDocument {
                        id: id.clone(),
                        metadata: metadata.as_ref().clone(),
                    })
                    .collect(),
                entries: state
                    .entries
                    .iter()
                    .map(|e| StoredEntry {
                        chunk: e.chunk.clone(),
                        vector: e.embedding.values.clone(),
                    })
                    .collect(),
            }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(fs::File::create(&tmp_path)?);
            serde_json::to_writer(&mut writer, &stored)?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, path)?;

        info!(
            "Saved index with {} entries from {} documents to {}",
            stored.entries.len(),
            stored.documents.len(),
            path.display()
        );
        Ok(())
    }

    /// Load an index written by [`VectorIndex::save`].
    ///
    /// The stored model, dimension and metric must equal `expected`.
    pub fn load<P: AsRef<Path>>(path: P, expected: &IndexMetadata) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading index from {}", path.display());

        let reader = BufReader::new(fs::File::open(path)?);
        let stored: StoredIndex = serde_json::from_reader(reader)?;

        if stored.format_version != FORMAT_VERSION {
            return Err(RagError::InvalidConfiguration(format!(
                "unsupported index format version {}",
                stored.format_version
            )));
        }
        if stored.metadata.model_id != expected.model_id {
            return Err(RagError::ModelMismatch {
                stored: stored.metadata.model_id,
                configured: expected.model_id.clone(),
            });
        }
        if stored.metadata.dimension != expected.dimension {
            return Err(RagError::DimensionMismatch {
                expected: expected.dimension,
                actual: stored.metadata.dimension,
            });
        }
        if stored.metadata.metric != expected.metric {
            return Err(RagError::InvalidConfiguration(format!(
                "index was built with the {} metric, configured metric is {}; rebuild required",
                stored.metadata.metric, expected.metric
            )));
        }

        let index = VectorIndex::new(stored.metadata)?;
        let documents: BTreeMap<String, Arc<DocumentMetadata>> = stored
            .documents
            .into_iter()
            .map(|d| (d.id, Arc::new(d.metadata)))
            .collect();

        let mut entries = Vec::with_capacity(stored.entries.len());
        for (seq, stored_entry) in stored.entries.into_iter().enumerate() {
            index.check_vector(&stored_entry.vector)?;
            let document = documents
                .get(&stored_entry.chunk.document_id)
                .cloned()
                .ok_or_else(|| {
                    RagError::InvalidConfiguration(format!(
                        "stored chunk references unknown document '{}'",
                        stored_entry.chunk.document_id
                    ))
                })?;
            entries.push(IndexEntry {
                chunk: stored_entry.chunk,
                embedding: Embedding::new(stored_entry.vector),
                document,
                seq: seq as u64,
            });
        }

        {
            let mut state = index.state.write();
            state.next_seq = entries.len() as u64;
            state.entries = entries;
            state.documents = documents;
        }

        info!(
            "Loaded {} entries from {} documents",
            index.size(),
            index.document_count()
        );
        Ok(index)
    }

    /// Load the index at `path` if it exists, otherwise start an empty one
    pub fn open_or_create<P: AsRef<Path>>(path: P, metadata: IndexMetadata) -> Result<Self> {
        if path.as_ref().exists() {
            VectorIndex::load(path, &metadata)
        } else {
            VectorIndex::new(metadata)
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredIndex {
    format_version: u32,
    metadata: IndexMetadata,
    documents: Vec<StoredDocument>,
    entries: Vec<StoredEntry>,
}

#[derive(Serialize, Deserialize)]
struct StoredDocument {
    id: String,
    metadata: DocumentMetadata,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    chunk: TextChunk,
    vector: Vec<f32>,
}
