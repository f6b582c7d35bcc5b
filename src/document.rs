use crate::error::{RagError, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Bibliographic metadata carried alongside a document's text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    pub title: String,
    pub authors: Vec<String>,
    /// Publication identifier such as a PubMed id or DOI
    pub publication_id: Option<String>,
    pub journal: Option<String>,
    pub mime_type: String,
}

/// Represents a document with its content and metadata
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable identifier, unique per source
    pub id: String,
    /// Extracted text content of the document
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Document {
            id: id.into(),
            content: content.into(),
            metadata,
        }
    }

    /// Create a new document from a file path.
    ///
    /// The file name becomes the document id. Metadata is read from a sidecar
    /// JSON file with the same stem (`paper.pdf` -> `paper.json`) when present.
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                RagError::Acquisition(format!("invalid file name: {}", path.display()))
            })?
            .to_string();

        // Detect MIME type
        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type: {}", mime_type);

        let content = read_document_content(path, &mime_type)?;

        let mut metadata = read_sidecar_metadata(path)?.unwrap_or_default();
        if metadata.title.trim().is_empty() {
            metadata.title = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(file_name.as_str())
                .to_string();
        }
        metadata.mime_type = mime_type;

        Ok(Document {
            id: file_name,
            content,
            metadata,
        })
    }
}

/// Whether a MIME type can be turned into text
pub fn is_supported_mime(mime_type: &str) -> bool {
    mime_type.starts_with("application/pdf") || mime_type.starts_with("text/")
}

/// Read content from a document based on its MIME type
pub fn read_document_content<P: AsRef<Path>>(file_path: P, mime_type: &str) -> Result<String> {
    let path = file_path.as_ref();

    let raw = match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Processing PDF document: {}", path.display());
            extract_text(path).map_err(|e| {
                RagError::Acquisition(format!(
                    "failed to extract text from PDF {}: {}",
                    path.display(),
                    e
                ))
            })?
        }
        mime if mime.starts_with("text/") => {
            info!("Processing text document: {}", path.display());
            fs::read_to_string(path)?
        }
        _ => {
            return Err(RagError::Acquisition(format!(
                "unsupported document format: {}. Only text and PDF files are supported.",
                mime_type
            )))
        }
    };

    let cleaned = clean_text(&raw);
    if cleaned.is_empty() {
        warn!("Extracted content of {} is empty", path.display());
    }
    Ok(cleaned)
}

fn read_sidecar_metadata(path: &Path) -> Result<Option<DocumentMetadata>> {
    let sidecar = path.with_extension("json");
    if sidecar == path || !sidecar.exists() {
        return Ok(None);
    }
    debug!("Reading metadata from {}", sidecar.display());
    let raw = fs::read_to_string(&sidecar)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Normalize extracted text: whitespace runs, paragraph breaks and typographic quotes
pub fn clean_text(text: &str) -> String {
    normalize_whitespace(&normalize_quotes(text))
}

fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' => '\'',
            other => other,
        })
        .collect()
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
        } else {
            if newline_count > 0 {
                // At most one paragraph break
                if newline_count >= 2 {
                    normalized.push_str("\n\n");
                } else {
                    normalized.push('\n');
                }
                newline_count = 0;
            }

            if !(c == ' ' && prev_char == ' ') {
                normalized.push(c);
            }

            prev_char = c;
        }
    }

    normalized.trim().to_string()
}

/// Document-acquisition collaborator
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Find up to `max_results` documents matching `query`
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>>;
}

/// A directory of already-downloaded papers (PDF or text), with optional
/// JSON sidecar metadata per paper.
#[derive(Debug, Clone)]
pub struct LocalLibrary {
    root: PathBuf,
}

impl LocalLibrary {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        LocalLibrary { root: root.into() }
    }

    /// Load every supported file in the library, in file-name order.
    /// Files that fail to load are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<Document>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| is_supported_mime(from_path(p).first_or_octet_stream().essence_str()))
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            match Document::from_file(&path) {
                Ok(document) => documents.push(document),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(documents)
    }
}

#[async_trait]
impl DocumentSource for LocalLibrary {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>> {
        let library = self.clone();
        let documents = tokio::task::spawn_blocking(move || library.load_all())
            .await
            .map_err(|e| RagError::Acquisition(format!("library scan failed: {}", e)))??;

        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        let matches: Vec<Document> = documents
            .into_iter()
            .filter(|doc| {
                if terms.is_empty() {
                    return true;
                }
                let title = doc.metadata.title.to_lowercase();
                let content = doc.content.to_lowercase();
                terms
                    .iter()
                    .any(|t| title.contains(t.as_str()) || content.contains(t.as_str()))
            })
            .take(max_results)
            .collect();

        info!(
            "Found {} documents for '{}' in {}",
            matches.len(),
            query,
            self.root.display()
        );
        Ok(matches)
    }
}
