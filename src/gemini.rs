use crate::embeddings::{Embedder, Embedding};
use crate::error::{RagError, Result};
use crate::rag::Generator;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_EMBEDDING_MODEL: &str = "models/text-embedding-004";
const DEFAULT_GENERATE_MODEL: &str = "models/gemini-2.0-flash";

/// Configuration for Gemini API
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,
    pub embeddings_url: String,
    pub generate_url: String,
    pub embedding_model: String,
    pub generate_model: String,
    /// Length of the vectors produced by `embedding_model`
    pub dimension: usize,
}

impl GeminiConfig {
    /// Create a new configuration from environment variables.
    /// Only `GEMINI_API_KEY` is required; URLs and models have defaults.
    pub fn from_env(dimension: usize) -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY").map_err(|_| {
            RagError::InvalidConfiguration("GEMINI_API_KEY not set".to_string())
        })?;
        let embedding_model =
            env::var("GEMINI_EMBEDDING_MODEL").unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string());
        let generate_model =
            env::var("GEMINI_GENERATE_MODEL").unwrap_or_else(|_| DEFAULT_GENERATE_MODEL.to_string());
        let embeddings_url = env::var("GEMINI_EMBEDDINGS_URL").unwrap_or_else(|_| {
            format!("{}/{}:batchEmbedContents", DEFAULT_BASE_URL, embedding_model)
        });
        let generate_url = env::var("GEMINI_GENERATE_URL").unwrap_or_else(|_| {
            format!("{}/{}:generateContent", DEFAULT_BASE_URL, generate_model)
        });

        Ok(GeminiConfig {
            api_key,
            embeddings_url,
            generate_url,
            embedding_model,
            generate_model,
            dimension,
        })
    }
}

/// Client for interacting with Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Self {
        let client = reqwest::Client::new();
        GeminiClient { config, client }
    }

    /// Generate text using the configured Gemini model
    pub async fn generate_text(
        &self,
        prompt: &str,
        temperature: f32,
        top_p: f32,
        top_k: i32,
        max_output_tokens: i32,
    ) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content::new_with_role(prompt, "user")],
            generation_config: GenerationConfig {
                temperature,
                top_p,
                top_k,
                max_output_tokens,
            },
        };

        let url = format!("{}?key={}", self.config.generate_url, self.config.api_key);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::Generation(format!(
                "API request failed: {} {}",
                status, error_text
            )));
        }

        let response_data: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        // Extract the generated text from the response
        response_data
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| RagError::Generation("No response generated".to_string()))
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    fn model_id(&self) -> &str {
        &self.config.embedding_model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: &self.config.embedding_model,
                    content: EmbeddingContent {
                        parts: vec![Part {
                            text: text.as_str(),
                        }],
                    },
                })
                .collect(),
        };

        let url = format!("{}?key={}", self.config.embeddings_url, self.config.api_key);
        debug!("Requesting {} embeddings from Gemini", texts.len());

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::EmbeddingUnavailable(format!(
                "API request failed: {} {}",
                status, error_text
            )));
        }

        let response_data: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;

        Ok(response_data
            .embeddings
            .into_iter()
            .map(|e| Embedding::new(e.values))
            .collect())
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, context: &str, question: &str) -> Result<String> {
        let prompt = build_prompt(context, question);
        self.generate_text(&prompt, 0.2, 0.8, 40, 1024).await
    }
}

/// Prompt asking the model to answer from research paper excerpts with citations
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the following question based on these research paper excerpts.\n\
         Include citations to the papers when referencing specific information.\n\n\
         Research paper excerpts:\n{}\n\n\
         Question: {}\n\n\
         Answer: ",
        context, question
    )
}

// Request/response structures for the Gemini API

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: EmbeddingContent<'a>,
}

#[derive(Serialize)]
struct EmbeddingContent<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Deserialize, Debug)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    role: &'static str,
}

impl<'a> Content<'a> {
    fn new_with_role(text: &'a str, role: &'static str) -> Self {
        Content {
            parts: vec![Part { text }],
            role,
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: String,
}
