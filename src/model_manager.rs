use std::sync::{Mutex, PoisonError};

use candle_core::{DType, Device, Tensor};
use pylate_rs::ColBERT;
use tracing::{debug, info};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    reranker::{CrossEncoder, maxsim},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "DOCSIFT_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Resolve the model id: explicit value, then `DOCSIFT_MODEL`, then the
/// configured setting, then the default.
pub fn resolve_model_id(explicit: Option<&str>, configured: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(MODEL_ENV_VAR).ok())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string())
}

/// Owns a lazily loaded ColBERT model.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    /// The model is not loaded until the first encode call.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Loads the model on first use, downloading it from the Hugging Face
    /// Hub if it is not cached.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if self.model.is_none() {
            info!(model = %self.model_id, "loading ColBERT model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(|e| Error::ModelUnavailable {
                    model: "colbert",
                    reason: format!("{}: {e}", self.model_id),
                })?;
            self.model = Some(colbert);
        }

        self.model.as_mut().ok_or_else(|| Error::ModelUnavailable {
            model: "colbert",
            reason: "model failed to load".to_string(),
        })
    }

    /// Token-level embeddings, shape `[B, T, D]`.
    pub fn encode_documents(&mut self, texts: &[String]) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        Ok(model.encode(texts, false).map_err(candle_core::Error::from)?)
    }

    /// Token-level query embeddings, shape `[Q, D]`.
    pub fn encode_query(&mut self, query: &str) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        let embeddings = model
            .encode(&[query.to_string()], true)
            .map_err(candle_core::Error::from)?;
        // [1, Q, D] -> [Q, D]
        Ok(embeddings.squeeze(0)?)
    }
}

/// ColBERT used both as a pooled dense embedder and as a late-interaction
/// reranker.
pub struct ColbertModel {
    manager: Mutex<ModelManager>,
    name: String,
}

impl ColbertModel {
    pub fn new(model_id: String) -> Self {
        Self {
            name: format!("colbert:{model_id}"),
            manager: Mutex::new(ModelManager::with_model_id(model_id)),
        }
    }

    fn with_manager<T>(&self, f: impl FnOnce(&mut ModelManager) -> Result<T>) -> Result<T> {
        let mut guard = self.manager.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Mean over the token axis of a `[B, T, D]` tensor, one row per text.
fn mean_pool(embeddings: &Tensor) -> Result<Vec<Vec<f32>>> {
    let pooled = embeddings.to_dtype(DType::F32)?.mean(1)?;
    Ok(pooled.to_vec2::<f32>()?)
}

impl Embedder for ColbertModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.with_manager(|m| m.encode_documents(texts))?;
        debug!(count = texts.len(), "pooled ColBERT embeddings");
        mean_pool(&embeddings)
    }
}

impl CrossEncoder for ColbertModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, query: &str, passage: &str) -> Result<f32> {
        Ok(self
            .score_batch(query, &[passage.to_string()])?
            .pop()
            .unwrap_or(0.0))
    }

    /// Encodes all passages in one batch and scores each with MaxSim.
    fn score_batch(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let (query_emb, doc_embs) = self.with_manager(|m| {
            let q = m.encode_query(query)?;
            let d = m.encode_documents(passages)?;
            Ok((q, d))
        })?;
        let query_emb = query_emb.to_dtype(DType::F32)?;
        let doc_embs = doc_embs.to_dtype(DType::F32)?;
        (0..passages.len())
            .map(|i| maxsim(&query_emb, &doc_embs.get(i)?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_model_id() {
        let manager = ModelManager::with_model_id("custom/model".to_string());
        assert_eq!(manager.model_id(), "custom/model");
        assert!(!manager.is_loaded());
    }

    #[test]
    fn explicit_model_id_wins() {
        assert_eq!(resolve_model_id(Some("a/b"), Some("c/d")), "a/b");
    }

    #[test]
    fn colbert_model_names_itself_after_model() {
        let model = ColbertModel::new(DEFAULT_MODEL_ID.to_string());
        assert_eq!(Embedder::name(&model), "colbert:lightonai/GTE-ModernColBERT-v1");
    }

    #[test]
    fn mean_pool_averages_tokens() {
        let t = Tensor::from_vec(
            vec![1.0f32, 0.0, 3.0, 2.0],
            (1, 2, 2),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(mean_pool(&t).unwrap(), vec![vec![2.0, 1.0]]);
    }
}
