use crate::config::RagConfig;
use crate::context::{ContextBuilder, SourceRef};
use crate::document::{Document, DocumentSource};
use crate::error::{RagError, Result};
use crate::index::QueryResult;
use crate::retriever::{IngestReport, Retriever};
use async_trait::async_trait;
use log::{error, info, warn};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

/// Answer returned when nothing relevant is indexed
pub const NO_RELEVANT_PASSAGES: &str = "No relevant passages were found in the indexed papers.";

/// Generation collaborator. Prompt construction belongs to the implementation.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, context: &str, question: &str) -> Result<String>;
}

/// Session-level knobs for the assistant
#[derive(Debug, Clone, Copy)]
pub struct AssistantOptions {
    pub top_k_default: usize,
    /// Estimated token budget for the generation context
    pub context_tokens: usize,
    pub acquisition_timeout: Duration,
    pub ingest_concurrency: usize,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        AssistantOptions {
            top_k_default: 5,
            context_tokens: 2048,
            acquisition_timeout: Duration::from_secs(60),
            ingest_concurrency: 4,
        }
    }
}

impl AssistantOptions {
    pub fn from_config(config: &RagConfig) -> Self {
        AssistantOptions {
            top_k_default: config.top_k_default,
            context_tokens: config.context_tokens,
            acquisition_timeout: config.acquisition_timeout,
            ingest_concurrency: config.ingest_concurrency,
        }
    }
}

/// Outcome of acquiring and indexing papers for a topic
#[derive(Debug)]
pub struct ResearchReport {
    /// Number of documents the source returned
    pub found: usize,
    pub ingested: Vec<IngestReport>,
    pub failed: Vec<(String, RagError)>,
}

/// Generated answer with the passages it was conditioned on
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

impl Answer {
    fn no_relevant_passages() -> Self {
        Answer {
            text: NO_RELEVANT_PASSAGES.to_string(),
            sources: Vec::new(),
        }
    }
}

/// Research assistant session: acquisition, retrieval and generation.
///
/// Built once per session with explicit handles to its collaborators.
pub struct Assistant {
    retriever: Retriever,
    source: Arc<dyn DocumentSource>,
    generator: Arc<dyn Generator>,
    context_builder: ContextBuilder,
    options: AssistantOptions,
}

impl Assistant {
    pub fn new(
        retriever: Retriever,
        source: Arc<dyn DocumentSource>,
        generator: Arc<dyn Generator>,
        options: AssistantOptions,
    ) -> Self {
        Assistant {
            retriever,
            source,
            generator,
            context_builder: ContextBuilder::new(options.context_tokens),
            options,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Find papers on a topic and index them.
    ///
    /// Papers that fail to index are reported, not fatal.
    pub async fn research(&self, query: &str, max_results: usize) -> Result<ResearchReport> {
        info!("Searching for papers about: {}", query);

        let timeout = self.options.acquisition_timeout;
        let documents = tokio::time::timeout(timeout, self.source.search(query, max_results))
            .await
            .map_err(|_| RagError::Timeout {
                operation: "document acquisition",
                after: timeout,
            })??;

        if documents.is_empty() {
            warn!("No papers found for '{}'", query);
        }

        let found = documents.len();
        let mut report = ResearchReport {
            found,
            ingested: Vec::new(),
            failed: Vec::new(),
        };
        for (id, outcome) in self
            .retriever
            .ingest_many(&documents, self.options.ingest_concurrency)
            .await
        {
            match outcome {
                Ok(ingested) => report.ingested.push(ingested),
                Err(e) => {
                    error!("Error processing paper {}: {}", id, e);
                    report.failed.push((id, e));
                }
            }
        }

        info!(
            "Successfully processed {} of {} papers",
            report.ingested.len(),
            found
        );
        Ok(report)
    }

    pub async fn ingest_document(&self, document: &Document) -> Result<IngestReport> {
        self.retriever.ingest(document).await
    }

    pub fn remove_document(&self, document_id: &str) -> bool {
        self.retriever.remove(document_id)
    }

    /// Ranked passages for a question; `k` defaults to the session's top-k
    pub async fn retrieve(&self, question: &str, k: Option<usize>) -> Result<QueryResult> {
        let k = k.unwrap_or(self.options.top_k_default);
        self.retriever.query(question, k).await
    }

    /// Answer a question from the indexed papers
    pub async fn answer(&self, question: &str, k: Option<usize>) -> Result<Answer> {
        info!("Answering question: {}", question);

        if self.retriever.index().is_empty() {
            warn!("No papers indexed; search for papers first");
            return Ok(Answer::no_relevant_passages());
        }

        let hits = self.retrieve(question, k).await?;
        let context = self.context_builder.build(&hits);
        if context.is_empty() {
            return Ok(Answer::no_relevant_passages());
        }

        let text = self.generator.generate(&context.text, question).await?;
        info!("Generated answer from {} papers", context.sources.len());

        Ok(Answer {
            text: text.trim().to_string(),
            sources: context.sources,
        })
    }

    /// Interactive question loop; ends on `exit` or end of input
    pub async fn run_query_loop<R: BufRead, W: Write>(
        &self,
        mut input: R,
        mut output: W,
        k: Option<usize>,
    ) -> Result<()> {
        writeln!(
            output,
            "Ready to answer questions about {} papers. Type 'exit' to quit.",
            self.retriever.index().document_count()
        )?;

        let mut buffer = String::new();
        loop {
            write!(output, "\nYour question: ")?;
            output.flush()?;

            buffer.clear();
            if input.read_line(&mut buffer)? == 0 {
                break;
            }

            let question = buffer.trim();
            if question.is_empty() {
                continue;
            }
            if question.eq_ignore_ascii_case("exit") {
                writeln!(output, "Goodbye!")?;
                break;
            }

            match self.answer(question, k).await {
                Ok(answer) => {
                    writeln!(output, "\n{}", answer.text)?;
                    for source in &answer.sources {
                        writeln!(
                            output,
                            "  [{}] {} (chars {}-{}, score {:.3})",
                            source.document_id, source.title, source.start, source.end, source.score
                        )?;
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!("Transient failure: {}", e);
                    writeln!(output, "\nTemporary failure, please try again: {}", e)?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{estimate_token_count, Chunker};
    use crate::document::DocumentMetadata;
    use crate::embeddings::{Embedder, HashingEmbedder};
    use crate::index::{IndexMetadata, SimilarityMetric, VectorIndex};
    use crate::retriever::RetrieverOptions;
    use parking_lot::Mutex;

    struct StaticSource {
        documents: Vec<Document>,
    }

    #[async_trait]
    impl DocumentSource for StaticSource {
        async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<Document>> {
            Ok(self.documents.iter().take(max_results).cloned().collect())
        }
    }

    struct StalledSource;

    #[async_trait]
    impl DocumentSource for StalledSource {
        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<Document>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingGenerator {
        contexts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(&self, context: &str, question: &str) -> Result<String> {
            if self.fail {
                return Err(RagError::Generation("model offline".to_string()));
            }
            self.contexts.lock().push(context.to_string());
            Ok(format!("  Answer to: {}  ", question))
        }
    }

    fn paper(id: &str, title: &str, text: &str) -> Document {
        Document::new(
            id,
            text,
            DocumentMetadata {
                title: title.to_string(),
                journal: Some("Science".to_string()),
                ..DocumentMetadata::default()
            },
        )
    }

    fn assistant(
        source: Arc<dyn DocumentSource>,
        generator: Arc<RecordingGenerator>,
    ) -> Assistant {
        let embedder = Arc::new(HashingEmbedder::new(256).unwrap());
        let index = Arc::new(
            VectorIndex::new(IndexMetadata {
                dimension: 256,
                metric: SimilarityMetric::Cosine,
                model_id: embedder.model_id().to_string(),
            })
            .unwrap(),
        );
        let retriever = Retriever::new(
            Chunker::new(200, 20).unwrap(),
            embedder,
            index,
            RetrieverOptions::default(),
        )
        .unwrap();
        Assistant::new(
            retriever,
            source,
            generator,
            AssistantOptions {
                acquisition_timeout: Duration::from_millis(50),
                ..AssistantOptions::default()
            },
        )
    }

    fn library() -> Arc<dyn DocumentSource> {
        Arc::new(StaticSource {
            documents: vec![
                paper("p1", "Statins", "Statins lower LDL cholesterol and cardiovascular risk."),
                paper("p2", "Empty", ""),
                paper("p3", "Sleep", "Sleep deprivation impairs memory consolidation."),
            ],
        })
    }

    #[tokio::test]
    async fn test_research_reports_failures_without_aborting() {
        let assistant = assistant(library(), Arc::new(RecordingGenerator::default()));
        let report = assistant.research("anything", 10).await.unwrap();

        assert_eq!(report.found, 3);
        assert_eq!(report.ingested.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "p2");
        assert_eq!(assistant.retriever().index().document_count(), 2);
    }

    #[tokio::test]
    async fn test_answer_uses_retrieved_context() {
        let generator = Arc::new(RecordingGenerator::default());
        let assistant = assistant(library(), Arc::clone(&generator));
        assistant.research("", 10).await.unwrap();

        let answer = assistant
            .answer("How does sleep affect memory?", Some(1))
            .await
            .unwrap();
        assert_eq!(answer.text, "Answer to: How does sleep affect memory?");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].document_id, "p3");

        let contexts = generator.contexts.lock();
        assert!(contexts[0].starts_with("From paper 'Sleep' (Science):"));
    }

    #[tokio::test]
    async fn test_long_passage_over_budget_still_answered() {
        let generator = Arc::new(RecordingGenerator::default());
        let mut assistant = assistant(library(), Arc::clone(&generator));
        assistant.context_builder = ContextBuilder::new(20);
        let abstract_text = "Gut microbiome diversity shapes immune development ".repeat(30);
        assistant
            .ingest_document(&paper("gut", "Microbiome", &abstract_text))
            .await
            .unwrap();

        let answer = assistant
            .answer("microbiome immune development", Some(1))
            .await
            .unwrap();
        assert_ne!(answer.text, NO_RELEVANT_PASSAGES);
        assert_eq!(answer.sources.len(), 1);
        assert!(answer.sources[0].truncated);

        let contexts = generator.contexts.lock();
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].starts_with("From paper 'Microbiome' (Science):\n"));
        assert!(estimate_token_count(&contexts[0]) <= 20);
    }

    #[tokio::test]
    async fn test_empty_corpus_skips_generation() {
        let generator = Arc::new(RecordingGenerator::default());
        let assistant = assistant(library(), Arc::clone(&generator));

        let answer = assistant.answer("Anything?", None).await.unwrap();
        assert_eq!(answer.text, NO_RELEVANT_PASSAGES);
        assert!(answer.sources.is_empty());
        assert!(generator.contexts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_is_surfaced() {
        let generator = Arc::new(RecordingGenerator {
            fail: true,
            ..RecordingGenerator::default()
        });
        let assistant = assistant(library(), generator);
        assistant.research("", 10).await.unwrap();

        assert!(matches!(
            assistant.answer("statins", None).await,
            Err(RagError::Generation(_))
        ));
    }

    #[tokio::test]
    async fn test_acquisition_timeout() {
        let assistant = assistant(
            Arc::new(StalledSource),
            Arc::new(RecordingGenerator::default()),
        );
        let err = assistant.research("anything", 5).await.unwrap_err();
        assert!(matches!(err, RagError::Timeout { .. }));
        assert!(assistant.retriever().index().is_empty());
    }

    #[tokio::test]
    async fn test_query_loop_answers_until_exit() {
        let assistant = assistant(library(), Arc::new(RecordingGenerator::default()));
        assistant.research("", 10).await.unwrap();

        let input = b"statins and cholesterol\n\nexit\nnever asked\n";
        let mut output = Vec::new();
        assistant
            .run_query_loop(&input[..], &mut output, Some(2))
            .await
            .unwrap();

        let transcript = String::from_utf8(output).unwrap();
        assert!(transcript.contains("Answer to: statins and cholesterol"));
        assert!(transcript.contains("[p1] Statins"));
        assert!(transcript.contains("Goodbye!"));
        assert!(!transcript.contains("never asked"));
    }
}
