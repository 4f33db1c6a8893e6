use std::{sync::Arc, time::Duration};

use candle_core::Tensor;
use rayon::prelude::*;

use crate::{bounded::call_with_timeout, error::Result};

/// Scores query/passage pairs. Higher is more relevant; scores are only
/// compared within one query.
pub trait CrossEncoder: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, query: &str, passage: &str) -> Result<f32>;

    /// Score many passages for one query. The default fans out over rayon.
    fn score_batch(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        passages
            .par_iter()
            .map(|passage| self.score(query, passage))
            .collect()
    }
}

/// Passages per cross-encoder call; a timed-out run stops between batches.
const RERANK_BATCH: usize = 16;

/// Rerank `passages` for `query` under a time bound.
pub fn rerank_bounded(
    cross_encoder: &Arc<dyn CrossEncoder>,
    query: &str,
    passages: Vec<String>,
    timeout: Duration,
) -> Result<Vec<f32>> {
    if passages.is_empty() {
        return Ok(Vec::new());
    }
    let cross_encoder = Arc::clone(cross_encoder);
    let query = query.to_string();
    call_with_timeout("reranking", timeout, move |cancel| {
        let mut scores = Vec::with_capacity(passages.len());
        for batch in passages.chunks(RERANK_BATCH) {
            cancel.ensure_active("reranking")?;
            scores.extend(cross_encoder.score_batch(&query, batch)?);
        }
        Ok(scores)
    })
}

/// Compute the MaxSim score between a query embedding and a passage
/// embedding, averaged over query tokens so scores fall in `[-1, 1]` for
/// normalized token vectors.
///
/// query_embedding: [Q, D] where Q = query tokens, D = embedding dimension
/// doc_embedding: [T, D] where T = passage tokens, D = embedding dimension
///
/// MaxSim = mean over query tokens of max(query_token . doc_token for all doc tokens)
pub fn maxsim(query_embedding: &Tensor, doc_embedding: &Tensor) -> Result<f32> {
    let query_tokens = query_embedding.dim(0)?.max(1);

    // Compute similarity matrix [Q, T] = query_emb @ doc_emb^T
    let sim_matrix = query_embedding.matmul(&doc_embedding.t()?)?;

    // Take max along dimension 1 (best document token per query token)
    let row_maxes = sim_matrix.max(1)?;

    let score = row_maxes.sum_all()?.to_scalar::<f32>()?;

    Ok(score / query_tokens as f32)
}
