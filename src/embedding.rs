use std::{
    sync::Arc,
    time::Duration,
};

use crate::{
    bounded::call_with_timeout,
    chunk::Chunk,
    doc_id::stable_hash,
    error::{Error, Result},
    normalize::tokens,
};

/// Texts per embedder call; a timed-out run stops between batches.
const EMBED_BATCH: usize = 32;

/// Produces one dense vector per input text.
///
/// Implementations must be shareable across the rayon pool; anything with
/// interior state (such as a lazily loaded model) locks internally.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Scale a vector to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// A row-major matrix of unit-length chunk vectors, one row per chunk
/// ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatrix {
    pub rows: u32,
    pub dimension: u32,
    /// Flat array in row-major order: `data[row * dimension + dim]`.
    pub data: Vec<f32>,
}

impl VectorMatrix {
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dimension = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dimension);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dimension {
                return Err(Error::Config(format!(
                    "embedding {i} has dimension {}, expected {dimension}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len() as u32,
            dimension: dimension as u32,
            data,
        })
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows as usize {
            return None;
        }
        let dimension = self.dimension as usize;
        let start = index * dimension;
        self.data.get(start..start + dimension)
    }
}

/// Embed every chunk's title and content under a time bound.
///
/// Vectors are normalized so inner product equals cosine similarity.
pub fn embed_chunks(
    embedder: &Arc<dyn Embedder>,
    chunks: &[Chunk],
    timeout: Duration,
) -> Result<VectorMatrix> {
    let texts: Vec<String> = chunks.iter().map(Chunk::embedding_text).collect();
    let mut rows = embed_bounded(embedder, texts, timeout)?;
    if rows.len() != chunks.len() {
        return Err(Error::ModelUnavailable {
            model: "embedder",
            reason: format!("returned {} vectors for {} chunks", rows.len(), chunks.len()),
        });
    }
    for row in &mut rows {
        l2_normalize(row);
    }
    VectorMatrix::from_rows(rows)
}

/// Embed a single query under a time bound, normalized.
pub fn embed_query(
    embedder: &Arc<dyn Embedder>,
    query: &str,
    timeout: Duration,
) -> Result<Vec<f32>> {
    let mut rows = embed_bounded(embedder, vec![query.to_string()], timeout)?;
    let mut vector = rows.pop().ok_or_else(|| Error::ModelUnavailable {
        model: "embedder",
        reason: "returned no vector for the query".to_string(),
    })?;
    l2_normalize(&mut vector);
    Ok(vector)
}

fn embed_bounded(
    embedder: &Arc<dyn Embedder>,
    texts: Vec<String>,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let embedder = Arc::clone(embedder);
    call_with_timeout("embedding", timeout, move |cancel| {
        let mut rows = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            cancel.ensure_active("embedding")?;
            rows.extend(embedder.embed(batch)?);
        }
        Ok(rows)
    })
}

/// Deterministic feature-hashing embedder.
///
/// Each word token is hashed into one of `dimension` buckets with a sign
/// taken from the hash, so related texts share buckets without any model
/// download. Useful offline and in tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

pub const DEFAULT_HASHING_DIMENSION: usize = 256;

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let hash = stable_hash(&[token.as_bytes()]);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkType, Provenance};

    fn chunk(title: &str, content: &str) -> Chunk {
        Chunk::new(
            title,
            content,
            ChunkType::Section,
            2,
            1,
            1,
            1.0,
            Provenance::FontDerived {
                section_id: "s1".to_string(),
            },
        )
    }

    #[test]
    fn hashing_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed(&["Recovery plans".to_string()]).unwrap();
        let b = embedder.embed(&["recovery PLANS".to_string()]).unwrap();
        assert_eq!(a, b);
        assert!((dot(&a[0], &a[0]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_texts_score_higher() {
        let embedder = HashingEmbedder::default();
        let rows = embedder
            .embed(&[
                "configure recovery plans".to_string(),
                "recovery plans overview".to_string(),
                "install certificates".to_string(),
            ])
            .unwrap();
        assert!(dot(&rows[0], &rows[1]) > dot(&rows[0], &rows[2]));
    }

    #[test]
    fn matrix_rows_are_addressable() {
        let matrix = VectorMatrix::from_rows(vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(matrix.rows, 2);
        assert_eq!(matrix.row(1), Some(&[0.0, 1.0][..]));
        assert_eq!(matrix.row(2), None);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(VectorMatrix::from_rows(vec![vec![1.0, 0.0], vec![1.0]]).is_err());
    }

    #[test]
    fn embed_chunks_produces_one_row_per_chunk() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(32));
        let chunks = vec![chunk("Ports", "Open 443."), chunk("Certificates", "Use CA certs.")];
        let matrix = embed_chunks(&embedder, &chunks, Duration::from_secs(5)).unwrap();
        assert_eq!(matrix.rows, 2);
        assert_eq!(matrix.dimension, 32);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
