pub mod ingest;
pub mod pinecone;
pub mod qdrant;

use async_trait::async_trait;
use log::{ debug, info };
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;

use crate::cli::Args;
use crate::llm::embedding::EmbeddingClient;

pub use self::ingest::DocumentIngester;
pub use self::pinecone::PineconeIndex;
pub use self::qdrant::QdrantIndex;

/// Metadata key holding a chunk's owner.
pub const USER_ID_KEY: &str = "userId";
/// Metadata key holding a chunk's text.
pub const TEXT_KEY: &str = "text";

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub text: Option<String>,
}

/// A chunk ready to be written: its id, vector and string metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
}

/// Exact-match metadata constraints, all of which must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter(pub BTreeMap<String, String>);

impl MetadataFilter {
    pub fn for_user(user_id: &str) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(USER_ID_KEY.to_string(), user_id.to_string());
        Self(fields)
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>
    ) -> Result<Vec<VectorMatch>, Box<dyn StdError + Send + Sync>>;

    /// Inserts or replaces points by id.
    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

/// Builds the index named by `VECTOR_TYPE`, or `None` when it is `none`.
pub fn new_index(args: &Args) -> Result<Option<Arc<dyn VectorIndex>>, Box<dyn StdError + Send + Sync>> {
    let index: Arc<dyn VectorIndex> = match args.vector_type.to_lowercase().as_str() {
        "pinecone" => {
            Arc::new(
                PineconeIndex::new(&args.vector_host, &args.vector_secret, args.vector_namespace.clone())?
            )
        }
        "qdrant" => {
            Arc::new(
                QdrantIndex::new(
                    &args.vector_host,
                    Some(args.vector_secret.clone()),
                    args.vector_index_name.clone()
                )?
            )
        }
        "none" => {
            return Ok(None);
        }
        other => {
            return Err(format!("Unsupported vector store type: {}", other).into());
        }
    };
    Ok(Some(index))
}

/// Supplies context text to ground a reply.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn relevant_context(
        &self,
        query: &str,
        user_id: Option<&str>
    ) -> Result<String, Box<dyn StdError + Send + Sync>>;
}

/// Embeds the query and joins the text of the top matches.
pub struct VectorRetriever {
    embedding_client: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl VectorRetriever {
    pub fn new(
        embedding_client: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        top_k: usize
    ) -> Self {
        Self {
            embedding_client,
            index,
            top_k,
        }
    }
}

#[async_trait]
impl ContextRetriever for VectorRetriever {
    async fn relevant_context(
        &self,
        query: &str,
        user_id: Option<&str>
    ) -> Result<String, Box<dyn StdError + Send + Sync>> {
        let vector = self.embedding_client.embed(query).await?.embedding;
        let filter = user_id.map(MetadataFilter::for_user);
        let matches = self.index.query(&vector, self.top_k, filter.as_ref()).await?;

        info!("Retrieved {} context chunks (user: {:?})", matches.len(), user_id);
        for m in &matches {
            debug!("  - {} (score {:.4})", m.id, m.score);
        }

        Ok(
            matches
                .into_iter()
                .filter_map(|m| m.text)
                .collect::<Vec<_>>()
                .join("\n\n")
        )
    }
}

/// Used when no vector store is configured.
pub struct NoContext;

#[async_trait]
impl ContextRetriever for NoContext {
    async fn relevant_context(
        &self,
        _query: &str,
        _user_id: Option<&str>
    ) -> Result<String, Box<dyn StdError + Send + Sync>> {
        Ok(String::new())
    }
}
