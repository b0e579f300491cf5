use async_trait::async_trait;
use ::rllm::{ builder::{ LLMBackend, LLMBuilder }, LLMProvider };
use std::error::Error as StdError;

use super::{ EmbeddingClient, EmbeddingResponse, EMBEDDING_DIMENSION };
use super::super::LlmConfig;

const OPENAI_MODEL: &str = "text-embedding-3-small";
const OLLAMA_URL: &str = "http://localhost:11434";
const OLLAMA_MODEL: &str = "nomic-embed-text";

/// Resolved builder settings for one rllm embedding backend.
#[derive(Debug, PartialEq)]
struct BackendSettings {
    model: String,
    base_url: Option<String>,
    api_key: Option<String>,
    /// Requested output width. Only OpenAI's v3 models honour it.
    dimensions: Option<u32>,
}

impl BackendSettings {
    fn openai(config: &LlmConfig) -> Result<Self, String> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "EMBEDDING_API_KEY is required for openai embeddings".to_string())?;
        Ok(Self {
            model: config.embedding_model.clone().unwrap_or_else(|| OPENAI_MODEL.to_string()),
            base_url: config.base_url.clone(),
            api_key: Some(api_key),
            dimensions: Some(EMBEDDING_DIMENSION as u32),
        })
    }

    fn ollama(config: &LlmConfig) -> Self {
        Self {
            model: config.embedding_model.clone().unwrap_or_else(|| OLLAMA_MODEL.to_string()),
            base_url: Some(config.base_url.clone().unwrap_or_else(|| OLLAMA_URL.to_string())),
            api_key: None,
            dimensions: None,
        }
    }
}

/// Embeddings from any provider rllm supports (OpenAI, Ollama).
pub struct RllmEmbeddingClient {
    provider: &'static str,
    llm: Box<dyn LLMProvider + Send + Sync>,
}

impl RllmEmbeddingClient {
    pub fn openai(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Self::build("openai", LLMBackend::OpenAI, BackendSettings::openai(config)?)
    }

    pub fn ollama(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Self::build("ollama", LLMBackend::Ollama, BackendSettings::ollama(config))
    }

    fn build(
        provider: &'static str,
        backend: LLMBackend,
        settings: BackendSettings
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let mut builder = LLMBuilder::new().backend(backend).model(&settings.model).stream(false);
        if let Some(url) = settings.base_url {
            builder = builder.base_url(url);
        }
        if let Some(key) = settings.api_key {
            builder = builder.api_key(key);
        }
        if let Some(dims) = settings.dimensions {
            builder = builder.embedding_dimensions(dims);
        }

        Ok(Self {
            provider,
            llm: builder.build()?,
        })
    }
}

#[async_trait]
impl EmbeddingClient for RllmEmbeddingClient {
    async fn embed(
        &self,
        text: &str
    ) -> Result<EmbeddingResponse, Box<dyn StdError + Send + Sync>> {
        let embedding = self.llm
            .embed(vec![text.to_string()]).await?
            .pop()
            .ok_or_else(|| format!("{} returned no embedding", self.provider))?;
        Ok(EmbeddingResponse { embedding })
    }
}
