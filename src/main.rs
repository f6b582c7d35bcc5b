use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::Arc;

use paper_rag::config::{EmbeddingBackend, RagConfig};
use paper_rag::document::{Document, LocalLibrary};
use paper_rag::embeddings::{Embedder, HashingEmbedder};
use paper_rag::gemini::{GeminiClient, GeminiConfig};
use paper_rag::index::{IndexMetadata, VectorIndex};
use paper_rag::local_embed::FastEmbedder;
use paper_rag::rag::{Assistant, AssistantOptions, Generator};
use paper_rag::retriever::Retriever;
use paper_rag::RagError;

/// A research assistant over scientific papers: chunk, embed, index and ask
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Index file, overriding RAG_INDEX_PATH
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    /// Directory of downloaded papers used for research
    #[arg(long, global = true, default_value = "papers")]
    library: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index documents (supports text and PDF)
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Find papers on a topic in the library and index them
    Research {
        query: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        max_results: usize,
    },
    /// Answer a question from the indexed papers
    Ask {
        question: String,
        #[arg(short)]
        k: Option<usize>,
    },
    /// Show the passages most similar to a question
    Search {
        question: String,
        #[arg(short)]
        k: Option<usize>,
        /// Restrict the search to one document
        #[arg(long)]
        document: Option<String>,
    },
    /// Remove a document and all of its chunks
    Remove { document_id: String },
    /// Summarize the index
    Stats,
    /// Interactive question loop
    Chat {
        #[arg(short)]
        k: Option<usize>,
    },
}

/// Stands in for the generator when no Gemini key is configured
struct UnconfiguredGenerator;

#[async_trait]
impl Generator for UnconfiguredGenerator {
    async fn generate(&self, _context: &str, _question: &str) -> paper_rag::Result<String> {
        Err(RagError::Generation(
            "GEMINI_API_KEY not set; answer generation is unavailable".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();

    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut config = RagConfig::from_env().context("Invalid RAG_* configuration")?;
    if let Some(index) = args.index {
        config.index_path = index;
    }

    let gemini = match GeminiConfig::from_env(config.embedding_dimension) {
        Ok(gemini_config) => Some(GeminiClient::new(gemini_config)),
        Err(e) => {
            debug!("Gemini unavailable: {}", e);
            None
        }
    };

    let embedder = build_embedder(&config, gemini.as_ref())?;
    let metadata = IndexMetadata {
        dimension: embedder.dimension(),
        metric: config.similarity_metric,
        model_id: embedder.model_id().to_string(),
    };
    let index = Arc::new(
        VectorIndex::open_or_create(&config.index_path, metadata)
            .with_context(|| format!("Failed to open index {}", config.index_path.display()))?,
    );

    let retriever = Retriever::from_config(&config, embedder, Arc::clone(&index))
        .context("Failed to initialize retriever")?;
    let generator: Arc<dyn Generator> = match gemini {
        Some(client) => Arc::new(client),
        None => Arc::new(UnconfiguredGenerator),
    };
    let assistant = Assistant::new(
        retriever,
        Arc::new(LocalLibrary::new(&args.library)),
        generator,
        AssistantOptions::from_config(&config),
    );

    match args.command {
        Command::Ingest { paths } => {
            let mut documents = Vec::with_capacity(paths.len());
            let mut failures = 0;
            for path in &paths {
                match Document::from_file(path) {
                    Ok(document) => documents.push(document),
                    Err(e) => {
                        error!("Failed to process {}: {}", path.display(), e);
                        failures += 1;
                    }
                }
            }

            for (id, outcome) in assistant
                .retriever()
                .ingest_many(&documents, config.ingest_concurrency)
                .await
            {
                match outcome {
                    Ok(report) => println!("{}: {} chunks", id, report.chunks),
                    Err(e) => {
                        error!("Failed to index {}: {}", id, e);
                        failures += 1;
                    }
                }
            }

            save(&index, &config)?;
            if failures > 0 {
                return Err(anyhow!("{} of {} documents failed", failures, paths.len()));
            }
        }
        Command::Research { query, max_results } => {
            let report = assistant
                .research(&query, max_results)
                .await
                .context("Research failed")?;
            save(&index, &config)?;

            println!(
                "Indexed {} of {} papers found for '{}'",
                report.ingested.len(),
                report.found,
                query
            );
            for (id, e) in &report.failed {
                println!("  failed {}: {}", id, e);
            }
        }
        Command::Ask { question, k } => {
            let answer = assistant
                .answer(&question, k)
                .await
                .context("Failed to answer question")?;
            println!("{}", answer.text);
            if !answer.sources.is_empty() {
                println!("\nSources:");
                for source in &answer.sources {
                    println!(
                        "  [{}] {} (chars {}-{}, score {:.3})",
                        source.document_id, source.title, source.start, source.end, source.score
                    );
                }
            }
        }
        Command::Search {
            question,
            k,
            document,
        } => {
            let hits = match document {
                Some(id) => {
                    let k = k.unwrap_or(config.top_k_default);
                    assistant
                        .retriever()
                        .query_document(&question, k, &id)
                        .await?
                }
                None => assistant.retrieve(&question, k).await?,
            };
            if hits.is_empty() {
                println!("No matching passages.");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "{:>2}. [{}#{}] {} (chars {}-{}) score {:.4}\n    {}",
                    rank + 1,
                    hit.chunk.document_id,
                    hit.chunk.index,
                    hit.document.title,
                    hit.chunk.start,
                    hit.chunk.end,
                    hit.score,
                    hit.chunk.text.replace('\n', " ")
                );
            }
        }
        Command::Remove { document_id } => {
            if !assistant.remove_document(&document_id) {
                return Err(RagError::NotFound(document_id).into());
            }
            save(&index, &config)?;
            info!("Removed {}", document_id);
        }
        Command::Stats => {
            let metadata = index.metadata();
            println!("Index:      {}", config.index_path.display());
            println!("Model:      {}", metadata.model_id);
            println!("Dimension:  {}", metadata.dimension);
            println!("Metric:     {}", metadata.metric);
            println!("Documents:  {}", index.document_count());
            println!("Chunks:     {}", index.size());
            for id in index.document_ids() {
                let title = index
                    .document(&id)
                    .map(|d| d.title.clone())
                    .unwrap_or_default();
                println!("  {} ({} chunks) {}", id, index.chunk_count(&id), title);
            }
        }
        Command::Chat { k } => {
            let stdin = std::io::stdin();
            assistant
                .run_query_loop(stdin.lock(), std::io::stdout(), k)
                .await
                .context("Error in query loop")?;
        }
    }

    Ok(())
}

fn build_embedder(config: &RagConfig, gemini: Option<&GeminiClient>) -> Result<Arc<dyn Embedder>> {
    match config.embedding_backend {
        EmbeddingBackend::Gemini => {
            let client = gemini.cloned().ok_or_else(|| {
                anyhow!("GEMINI_API_KEY is required for the gemini embedding backend")
            })?;
            Ok(Arc::new(client))
        }
        EmbeddingBackend::FastEmbed => Ok(Arc::new(FastEmbedder::new(
            &config.local_model,
            config.model_cache_dir.clone(),
        )?)),
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::new(
            config.embedding_dimension,
        )?)),
    }
}

fn save(index: &VectorIndex, config: &RagConfig) -> Result<()> {
    index
        .save(&config.index_path)
        .with_context(|| format!("Failed to save index {}", config.index_path.display()))
}
