use async_trait::async_trait;
use paper_rag::chunking::Chunker;
use paper_rag::document::{Document, DocumentMetadata};
use paper_rag::embeddings::{Embedder, Embedding, HashingEmbedder};
use paper_rag::index::{IndexMetadata, QueryResult, SimilarityMetric, VectorIndex};
use paper_rag::retriever::{Retriever, RetrieverOptions};
use paper_rag::{RagError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DIM: usize = 256;

/// Hashing embedder that can be switched into a failing or stalled state
struct FlakyEmbedder {
    inner: HashingEmbedder,
    fail: AtomicBool,
    stall: AtomicBool,
}

impl FlakyEmbedder {
    fn new() -> Self {
        FlakyEmbedder {
            inner: HashingEmbedder::new(DIM).unwrap(),
            fail: AtomicBool::new(false),
            stall: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::EmbeddingUnavailable("connection reset".to_string()));
        }
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        self.inner.embed(texts).await
    }
}

fn new_index() -> Arc<VectorIndex> {
    Arc::new(
        VectorIndex::new(IndexMetadata {
            dimension: DIM,
            metric: SimilarityMetric::Cosine,
            model_id: format!("hashing-v1-{}", DIM),
        })
        .unwrap(),
    )
}

fn retriever_with(embedder: Arc<dyn Embedder>, index: Arc<VectorIndex>) -> Retriever {
    Retriever::new(
        Chunker::new(120, 20).unwrap(),
        embedder,
        index,
        RetrieverOptions {
            batch_size: 3,
            embed_timeout: Duration::from_millis(100),
        },
    )
    .unwrap()
}

fn retriever() -> Retriever {
    retriever_with(Arc::new(HashingEmbedder::new(DIM).unwrap()), new_index())
}

fn paper(id: &str, text: &str) -> Document {
    Document::new(
        id,
        text,
        DocumentMetadata {
            title: format!("Paper {}", id),
            ..DocumentMetadata::default()
        },
    )
}

fn corpus() -> Vec<Document> {
    vec![
        paper(
            "antibiotics",
            "Antibiotic resistance emerges when bacteria survive repeated exposure. \
             Horizontal gene transfer spreads resistance genes between species.\n\n\
             Stewardship programs reduce unnecessary prescriptions in hospitals.",
        ),
        paper(
            "photosynthesis",
            "Photosynthesis converts light energy into chemical energy. \
             Chlorophyll absorbs red and blue light most strongly.\n\n\
             The Calvin cycle fixes carbon dioxide into sugars.",
        ),
        paper(
            "neurons",
            "Neurons communicate through synapses using neurotransmitters. \
             Long-term potentiation strengthens synaptic connections during learning.",
        ),
    ]
}

fn summary(result: &QueryResult) -> Vec<(String, usize, u32)> {
    result
        .iter()
        .map(|hit| (hit.chunk.document_id.clone(), hit.chunk.index, hit.score.to_bits()))
        .collect()
}

#[tokio::test]
async fn reingest_gives_same_results_as_single_ingest() {
    let once = retriever();
    let twice = retriever();
    for document in corpus() {
        once.ingest(&document).await.unwrap();
        twice.ingest(&document).await.unwrap();
        twice.ingest(&document).await.unwrap();
    }

    assert_eq!(once.index().size(), twice.index().size());
    let question = "how do bacteria become resistant to antibiotics";
    assert_eq!(
        summary(&once.query(question, 5).await.unwrap()),
        summary(&twice.query(question, 5).await.unwrap())
    );
}

#[tokio::test]
async fn removed_document_never_returned() {
    let retriever = retriever();
    for document in corpus() {
        retriever.ingest(&document).await.unwrap();
    }
    assert!(retriever.remove("photosynthesis"));
    assert!(!retriever.remove("photosynthesis"));

    let size = retriever.index().size();
    for k in 1..=size {
        let hits = retriever.query("light energy chlorophyll", k).await.unwrap();
        assert!(hits.len() <= k);
        assert!(hits.iter().all(|h| h.chunk.document_id != "photosynthesis"));
    }
}

#[tokio::test]
async fn wrong_dimension_rejected_without_changing_index() {
    let retriever = retriever();
    retriever.ingest(&corpus()[0]).await.unwrap();
    let index = retriever.index();
    let before = index.size();

    let chunk = Chunker::new(120, 20).unwrap().chunk("extra", "Short note.");
    let err = index
        .add(
            "extra",
            DocumentMetadata::default(),
            chunk,
            vec![Embedding::new(vec![0.5; DIM - 1])],
        )
        .unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { .. }));
    assert_eq!(index.size(), before);
    assert!(!index.contains("extra"));

    let err = index
        .search(&Embedding::new(vec![0.5; DIM + 1]), 3)
        .unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn repeated_searches_are_identical() {
    let retriever = retriever();
    for document in corpus() {
        retriever.ingest(&document).await.unwrap();
    }
    let first = retriever.query("synaptic learning", 4).await.unwrap();
    let second = retriever.query("synaptic learning", 4).await.unwrap();
    assert_eq!(summary(&first), summary(&second));
    assert!(first.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn embedding_failure_keeps_previous_version() {
    let embedder = Arc::new(FlakyEmbedder::new());
    let retriever = retriever_with(embedder.clone(), new_index());
    retriever
        .ingest(&paper("neurons", "Neurons fire action potentials."))
        .await
        .unwrap();

    embedder.fail.store(true, Ordering::SeqCst);
    let err = retriever
        .ingest(&paper("neurons", "A completely rewritten abstract about glia."))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    embedder.fail.store(false, Ordering::SeqCst);

    let hits = retriever.query("action potentials", 1).await.unwrap();
    assert_eq!(hits[0].chunk.text, "Neurons fire action potentials.");
}

#[tokio::test]
async fn embedding_timeout_leaves_index_unchanged() {
    let embedder = Arc::new(FlakyEmbedder::new());
    let retriever = retriever_with(embedder.clone(), new_index());
    retriever.ingest(&corpus()[1]).await.unwrap();
    let before = retriever.index().size();

    embedder.stall.store(true, Ordering::SeqCst);
    let err = retriever.ingest(&corpus()[2]).await.unwrap_err();
    assert!(matches!(err, RagError::Timeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(retriever.index().size(), before);
    assert!(!retriever.index().contains("neurons"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_searches_agree() {
    let retriever = Arc::new(retriever());
    for document in corpus() {
        retriever.ingest(&document).await.unwrap();
    }
    let expected = summary(&retriever.query("carbon dioxide sugars", 3).await.unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let retriever = Arc::clone(&retriever);
            tokio::spawn(async move { retriever.query("carbon dioxide sugars", 3).await })
        })
        .collect();

    for handle in handles {
        let hits = handle.await.unwrap().unwrap();
        assert_eq!(summary(&hits), expected);
    }
}

const FLUX_V1: &str = "Metabolic flux analysis quantifies reaction rates in living cells. \
     Isotope labelling experiments constrain the flux estimates.";

const FLUX_V2: &str = "Metabolic flux analysis was repeated with a larger network. \
     Carbon labelling patterns were measured by mass spectrometry.\n\n\
     Flux estimates changed for glycolysis and the pentose phosphate pathway. \
     The revised model fits the labelling data within measurement error.";

fn sorted_chunk_texts(document: &Document) -> Vec<String> {
    let mut texts: Vec<String> = Chunker::new(120, 20)
        .unwrap()
        .chunk(&document.id, &document.content)
        .into_iter()
        .map(|c| c.text)
        .collect();
    texts.sort();
    texts
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn searches_never_see_a_partial_document_version() {
    let retriever = Arc::new(retriever());
    retriever.ingest(&corpus()[0]).await.unwrap();

    let versions = vec![paper("flux", FLUX_V1), paper("flux", FLUX_V2)];
    let expected: Vec<Vec<String>> = versions.iter().map(sorted_chunk_texts).collect();
    assert_ne!(expected[0], expected[1]);
    assert!(expected[1].len() > 1);

    let writer = {
        let retriever = Arc::clone(&retriever);
        tokio::spawn(async move {
            for round in 0..90 {
                match round % 3 {
                    0 | 1 => {
                        retriever.ingest(&versions[round % 3]).await.unwrap();
                    }
                    _ => {
                        retriever.remove("flux");
                    }
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let retriever = Arc::clone(&retriever);
            let expected = expected.clone();
            tokio::spawn(async move {
                for _ in 0..90 {
                    // k covers the whole index, so every indexed flux chunk is returned
                    let hits = retriever.query("metabolic flux labelling", 50).await.unwrap();
                    let mut seen: Vec<String> = hits
                        .iter()
                        .filter(|h| h.chunk.document_id == "flux")
                        .map(|h| h.chunk.text.clone())
                        .collect();
                    seen.sort();
                    assert!(
                        seen.is_empty() || expected.contains(&seen),
                        "mixed or partial version observed: {:?}",
                        seen
                    );
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test]
async fn persisted_index_ranks_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.json");

    let retriever = retriever();
    for document in corpus() {
        retriever.ingest(&document).await.unwrap();
    }
    retriever.index().save(&path).unwrap();
    let before = retriever.query("gene transfer between species", 4).await.unwrap();

    let reopened = Arc::new(
        VectorIndex::open_or_create(&path, retriever.index().metadata().clone()).unwrap(),
    );
    let restored = retriever_with(Arc::new(HashingEmbedder::new(DIM).unwrap()), reopened);
    let after = restored.query("gene transfer between species", 4).await.unwrap();

    assert_eq!(summary(&before), summary(&after));
    assert_eq!(after[0].document.title, "Paper antibiotics");
}
