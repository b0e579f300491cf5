pub mod backend;
pub mod huggingface;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::Arc;
use log::warn;

use super::{ LlmConfig, LlmType };
use self::backend::RllmEmbeddingClient;
use self::huggingface::HuggingFaceEmbeddingClient;

/// Width every embedding is coerced to before it is compared or stored.
pub const EMBEDDING_DIMENSION: usize = 1024;

#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, Box<dyn StdError + Send + Sync>>;
}

/// Truncates or zero-pads `vector` to exactly `dimension` entries.
pub fn normalize_dimensions(mut vector: Vec<f32>, dimension: usize) -> Vec<f32> {
    vector.resize(dimension, 0.0);
    vector
}

/// Wraps a provider so every vector it returns has a fixed width.
pub struct NormalizedEmbeddingClient {
    inner: Arc<dyn EmbeddingClient>,
    dimension: usize,
}

impl NormalizedEmbeddingClient {
    pub fn new(inner: Arc<dyn EmbeddingClient>, dimension: usize) -> Self {
        Self { inner, dimension }
    }
}

#[async_trait]
impl EmbeddingClient for NormalizedEmbeddingClient {
    async fn embed(
        &self,
        text: &str
    ) -> Result<EmbeddingResponse, Box<dyn StdError + Send + Sync>> {
        let raw = self.inner.embed(text).await?;
        if raw.embedding.is_empty() {
            return Err("Embedding provider returned an empty vector".into());
        }
        if raw.embedding.len() > self.dimension {
            warn!(
                "Truncating {}-dimension embedding to {}",
                raw.embedding.len(),
                self.dimension
            );
        }
        Ok(EmbeddingResponse {
            embedding: normalize_dimensions(raw.embedding, self.dimension),
        })
    }
}

/// Builds the configured provider, already wrapped to `EMBEDDING_DIMENSION`.
pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn EmbeddingClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn EmbeddingClient> = match config.llm_type {
        LlmType::HuggingFace => {
            let specific_client = HuggingFaceEmbeddingClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI => Arc::new(RllmEmbeddingClient::openai(config)?),
        LlmType::Ollama => Arc::new(RllmEmbeddingClient::ollama(config)?),
    };
    Ok(Arc::new(NormalizedEmbeddingClient::new(client, EMBEDDING_DIMENSION)))
}
