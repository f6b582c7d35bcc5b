use crate::chunking::estimate_token_count;
use crate::index::SearchHit;
use log::debug;
use serde::Serialize;
use std::collections::HashSet;

/// Provenance of one passage handed to the generator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub title: String,
    pub chunk_index: usize,
    pub start: usize,
    pub end: usize,
    pub score: f32,
    /// Passage was cut short to fit the token budget
    pub truncated: bool,
}

/// Context payload for answer generation
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Assembles ranked hits into a citation-annotated context.
///
/// Only the best passage of each paper is used, and passages are added in rank
/// order until the estimated token budget would be exceeded. The top passage is
/// always included, trimmed to the budget if it does not fit on its own.
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder {
    max_tokens: usize,
}

impl ContextBuilder {
    pub fn new(max_tokens: usize) -> Self {
        ContextBuilder { max_tokens }
    }

    pub fn build(&self, hits: &[SearchHit]) -> RetrievedContext {
        let mut context = RetrievedContext::default();
        let mut used_papers = HashSet::new();
        let mut total_tokens = 0;

        for hit in hits {
            if used_papers.contains(hit.chunk.document_id.as_str()) {
                continue;
            }

            let header = format!(
                "From paper '{}' ({}):",
                hit.document.title,
                hit.document.journal.as_deref().unwrap_or("Journal")
            );
            let body = hit.chunk.text.trim();
            let mut passage = format!("{}\n{}", header, body);
            let mut tokens = estimate_token_count(&passage);
            let mut truncated = false;
            if total_tokens + tokens > self.max_tokens {
                if !context.sources.is_empty() {
                    break;
                }
                passage = trim_to_budget(&header, body, self.max_tokens);
                tokens = estimate_token_count(&passage);
                truncated = true;
                debug!(
                    "Top passage of '{}' trimmed to fit {} tokens",
                    hit.chunk.document_id, self.max_tokens
                );
            }

            used_papers.insert(hit.chunk.document_id.as_str());
            total_tokens += tokens;
            if !context.text.is_empty() {
                context.text.push_str("\n\n");
            }
            context.text.push_str(&passage);
            context.sources.push(SourceRef {
                document_id: hit.chunk.document_id.clone(),
                title: hit.document.title.clone(),
                chunk_index: hit.chunk.index,
                start: hit.chunk.start,
                end: hit.chunk.end,
                score: hit.score,
                truncated,
            });
        }

        debug!(
            "Built context from {} passages (~{} tokens)",
            context.sources.len(),
            total_tokens
        );
        context
    }
}

/// Header plus as many leading words of `body` as the budget allows
fn trim_to_budget(header: &str, body: &str, max_tokens: usize) -> String {
    let mut used = estimate_token_count(header);
    let mut kept = Vec::new();
    for word in body.split_whitespace() {
        let cost = estimate_token_count(word);
        if used + cost > max_tokens {
            break;
        }
        used += cost;
        kept.push(word);
    }
    format!("{}\n{}", header, kept.join(" "))
}

impl Default for ContextBuilder {
    fn default() -> Self {
        ContextBuilder::new(2048)
    }
}
