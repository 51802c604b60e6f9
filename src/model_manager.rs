use candle_core::{DType, Device};
use pylate_rs::ColBERT;

use crate::{
    embedding::{Embedder, normalize},
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";

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

/// ColBERT-backed [`Embedder`], loaded from HuggingFace Hub on first use.
///
/// Token embeddings are mean-pooled into one vector per text and scaled to
/// unit length.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::with_model_id(DEFAULT_MODEL_ID.to_string())
    }
}

impl ModelManager {
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        let model = match self.model.take() {
            Some(model) => model,
            None => {
                tracing::info!(
                    model = %self.model_id,
                    "loading embedding model"
                );
                let colbert: ColBERT = ColBERT::from(&self.model_id)
                    .with_device(default_device())
                    .try_into()
                    .map_err(|e| Error::Model(format!("{e}")))?;
                colbert
            }
        };
        Ok(self.model.insert(model))
    }

    /// Encode one text into a pooled, normalized vector.
    pub fn encode_pooled(&mut self, text: &str) -> Result<Vec<f32>> {
        let model = self.ensure_loaded()?;
        // [1, tokens, dim] -> [dim]
        let embeddings = model
            .encode(&[text.to_string()], false)
            .map_err(|e| Error::Model(format!("{e}")))?;
        let mut pooled = embeddings
            .mean(1)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::Model(format!("{e}")))?;
        normalize(&mut pooled);
        Ok(pooled)
    }
}

impl Embedder for ModelManager {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        self.encode_pooled(text)
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("model_id", &self.model_id)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
