use log::{ debug, info, warn };
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;

use super::{ new_index, VectorIndex, VectorPoint, TEXT_KEY, USER_ID_KEY };
use crate::cli::Args;
use crate::llm::LlmConfig;
use crate::llm::embedding::{
    new_client as new_embedding_client,
    EmbeddingClient,
    NormalizedEmbeddingClient,
    EMBEDDING_DIMENSION,
};

/// Splits a document into paragraphs on blank lines, dropping empty ones.
pub fn chunk_document(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect()
}

/// `{name}-chunk-{index}`, with spaces in the name replaced by underscores.
pub fn chunk_id(name: &str, index: usize) -> String {
    format!("{}-chunk-{}", name.replace(' ', "_"), index)
}

/// Embeds documents chunk by chunk and writes them to the context index.
pub struct DocumentIngester {
    embedding_client: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
}

impl DocumentIngester {
    pub fn new(embedding_client: Arc<dyn EmbeddingClient>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedding_client: Arc::new(
                NormalizedEmbeddingClient::new(embedding_client, EMBEDDING_DIMENSION)
            ),
            index,
        }
    }

    /// `None` when no vector store is configured.
    pub fn from_args(args: &Args) -> Result<Option<Self>, Box<dyn StdError + Send + Sync>> {
        let Some(index) = new_index(args)? else {
            return Ok(None);
        };
        let config = LlmConfig::embedding_from_args(args).map_err(|e|
            format!("Invalid embedding LLM type: {}", e)
        )?;
        let embedding_client = new_embedding_client(&config)?;
        Ok(Some(Self::new(embedding_client, index)))
    }

    /// Indexes `text` under `name` and returns the number of chunks written.
    /// Chunks are tagged with `user_id` so retrieval can be scoped to them.
    pub async fn ingest(
        &self,
        name: &str,
        text: &str,
        user_id: Option<&str>
    ) -> Result<usize, Box<dyn StdError + Send + Sync>> {
        let chunks = chunk_document(text);
        if chunks.is_empty() {
            warn!("Document {} has no text to index", name);
            return Ok(0);
        }

        let mut points = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.into_iter().enumerate() {
            let values = self.embedding_client.embed(&chunk).await?.embedding;
            let mut metadata = BTreeMap::new();
            metadata.insert(TEXT_KEY.to_string(), chunk);
            if let Some(user_id) = user_id {
                metadata.insert(USER_ID_KEY.to_string(), user_id.to_string());
            }
            let id = chunk_id(name, i);
            debug!("Embedded {} ({} dimensions)", id, values.len());
            points.push(VectorPoint { id, values, metadata });
        }

        self.index.upsert(&points).await?;
        info!("Indexed {} chunks from {} (user: {:?})", points.len(), name, user_id);
        Ok(points.len())
    }
}
