use log::{ debug, info };
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::personas::ModelCategory;
use crate::error::RelayError;
use crate::llm::embedding::EmbeddingClient;

/// Picks the upstream model whose category description is semantically
/// closest to the user's query.
pub struct ModelSelector {
    categories: Vec<ModelCategory>,
    embedding_client: Arc<dyn EmbeddingClient>,
    category_vectors: OnceCell<Vec<Vec<f32>>>,
}

impl ModelSelector {
    pub fn new(
        categories: Vec<ModelCategory>,
        embedding_client: Arc<dyn EmbeddingClient>
    ) -> Result<Self, RelayError> {
        if categories.is_empty() {
            return Err(RelayError::Config("model selector needs at least one category".into()));
        }
        Ok(Self {
            categories,
            embedding_client,
            category_vectors: OnceCell::new(),
        })
    }

    pub async fn select(
        &self,
        query: &str
    ) -> Result<&ModelCategory, Box<dyn StdError + Send + Sync>> {
        let query_vector = self.embedding_client.embed(query).await?.embedding;
        let category_vectors = self.category_vectors().await?;

        let scores: Vec<f32> = category_vectors
            .iter()
            .map(|v| cosine_similarity(&query_vector, v))
            .collect();
        let best = best_match(&scores).unwrap_or(0);
        let chosen = &self.categories[best];

        debug!("Category scores: {:?}", scores);
        info!(
            "Selected {} (score {:.4})",
            chosen.label(),
            scores.get(best).copied().unwrap_or(0.0)
        );
        Ok(chosen)
    }

    /// Category descriptions never change, so their embeddings are computed
    /// once and reused.
    async fn category_vectors(&self) -> Result<&Vec<Vec<f32>>, Box<dyn StdError + Send + Sync>> {
        self.category_vectors.get_or_try_init(|| async {
            let mut vectors = Vec::with_capacity(self.categories.len());
            for category in &self.categories {
                let resp = self.embedding_client.embed(&category.description).await?;
                vectors.push(resp.embedding);
            }
            Ok::<_, Box<dyn StdError + Send + Sync>>(vectors)
        }).await
    }
}

/// Cosine similarity of two vectors; 0.0 when either has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a
        .iter()
        .zip(b)
        .map(|(x, y)| x * y)
        .sum();
    let norm_a = a
        .iter()
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt();
    let norm_b = b
        .iter()
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Index of the highest score. Ties keep the earliest index.
pub fn best_match(scores: &[f32]) -> Option<usize> {
    let mut best = None;
    let mut best_score = f32::NEG_INFINITY;
    for (i, score) in scores.iter().enumerate() {
        if *score > best_score {
            best_score = *score;
            best = Some(i);
        }
    }
    best
}
