//! Question answering over search results.
//!
//! A query that names a section verbatim gets that section back whole, with
//! no generative step. Anything else goes through hybrid search; the
//! resolved passages become a prompt for the [`Generator`]. Generation is
//! time-bounded and any failure yields [`APOLOGY`] instead of an error.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    bounded::call_with_timeout,
    catalog::Snapshot,
    error::Result,
    resolver::{ContentResolver, resolve_content},
    search::{HybridSearchEngine, SearchRequest, SearchResult, SearchStatus},
};

pub const APOLOGY: &str =
    "I'm sorry, I couldn't generate an answer right now. Please try again in a moment.";

pub const NO_CONTEXT: &str = "No indexed content matches this question.";

/// Text generation collaborator.
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// Exact title hit; the section's complete content.
    Verbatim,
    Generated,
    /// No generator configured; the best passages themselves.
    Extractive,
    /// Generation failed or timed out.
    Apology,
    NoContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerSource {
    pub file_name: String,
    pub chunk_id: String,
    pub title: String,
    pub page_start: u32,
    pub page_end: u32,
    pub score: f32,
}

impl From<&SearchResult> for AnswerSource {
    fn from(result: &SearchResult) -> Self {
        Self {
            file_name: result.document.record.file_name.clone(),
            chunk_id: result.chunk.id.clone(),
            title: result.chunk.title.clone(),
            page_start: result.chunk.page_start,
            page_end: result.chunk.page_end,
            score: result.final_score,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub mode: AnswerMode,
    pub sources: Vec<AnswerSource>,
    pub search_status: SearchStatus,
}

#[derive(Debug, Clone)]
pub struct AnswerConfig {
    pub max_passages: usize,
    /// Context budget across all passages in the prompt.
    pub max_context_chars: usize,
    pub generation_timeout: Duration,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            max_passages: 5,
            max_context_chars: 12_000,
            generation_timeout: Duration::from_secs(60),
        }
    }
}

struct Passage<'r> {
    result: &'r SearchResult,
    content: String,
}

pub fn build_prompt(question: &str, passages: &[(String, String)]) -> String {
    let mut prompt = String::from(
        "Answer the question using only the documentation excerpts below. \
         If the excerpts do not contain the answer, say so.\n\n",
    );
    for (i, (heading, content)) in passages.iter().enumerate() {
        prompt.push_str(&format!("[{}] {heading}\n{content}\n\n", i + 1));
    }
    prompt.push_str(&format!("Question: {question}\nAnswer:"));
    prompt
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

fn passage_heading(result: &SearchResult) -> String {
    let chunk = &result.chunk;
    let pages = if chunk.page_start == chunk.page_end {
        format!("p. {}", chunk.page_start)
    } else {
        format!("pp. {}-{}", chunk.page_start, chunk.page_end)
    };
    format!("{} ({}, {pages})", chunk.title, result.document.record.file_name)
}

pub fn answer(
    engine: &HybridSearchEngine<'_>,
    snapshot: &Snapshot,
    question: &str,
    generator: Option<&Arc<dyn Generator>>,
    resolvers: &[Box<dyn ContentResolver>],
    config: &AnswerConfig,
) -> Answer {
    let outcome = engine.search(snapshot, &SearchRequest::new(question, config.max_passages));
    let sources: Vec<AnswerSource> = outcome.results.iter().map(AnswerSource::from).collect();

    if outcome.short_circuited
        && let Some(hit) = outcome.results.first()
    {
        info!(title = %hit.chunk.title, "answering with verbatim section");
        return Answer {
            text: resolve_content(resolvers, &hit.document, &hit.chunk),
            mode: AnswerMode::Verbatim,
            sources: sources.into_iter().take(1).collect(),
            search_status: outcome.status,
        };
    }

    if outcome.results.is_empty() {
        return Answer {
            text: NO_CONTEXT.to_string(),
            mode: AnswerMode::NoContext,
            sources,
            search_status: outcome.status,
        };
    }

    let mut budget = config.max_context_chars;
    let mut passages = Vec::new();
    for result in &outcome.results {
        if budget == 0 {
            break;
        }
        let full = resolve_content(resolvers, &result.document, &result.chunk);
        let content = truncate_chars(&full, budget).to_string();
        budget = budget.saturating_sub(content.chars().count());
        passages.push(Passage { result, content });
    }
    let labelled: Vec<(String, String)> = passages
        .iter()
        .map(|p| (passage_heading(p.result), p.content.clone()))
        .collect();

    let Some(generator) = generator else {
        let text = labelled
            .iter()
            .map(|(heading, content)| format!("## {heading}\n{content}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        return Answer {
            text,
            mode: AnswerMode::Extractive,
            sources,
            search_status: outcome.status,
        };
    };

    let prompt = build_prompt(question, &labelled);
    let worker = Arc::clone(generator);
    let generated = call_with_timeout("answer generation", config.generation_timeout, move |cancel| {
        cancel.ensure_active("answer generation")?;
        worker.generate(&prompt)
    });

    let (text, mode) = match generated {
        Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), AnswerMode::Generated),
        Ok(_) => {
            warn!(generator = generator.name(), "generator returned an empty answer");
            (APOLOGY.to_string(), AnswerMode::Apology)
        }
        Err(e) => {
            warn!(generator = generator.name(), error = %e, "answer generation failed");
            (APOLOGY.to_string(), AnswerMode::Apology)
        }
    };

    Answer {
        text,
        mode,
        sources,
        search_status: outcome.status,
    }
}
