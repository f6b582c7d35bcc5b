pub mod chunking;
pub mod config;
pub mod context;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod index;
pub mod local_embed;
pub mod rag;
pub mod retriever;

pub use error::{RagError, Result};
