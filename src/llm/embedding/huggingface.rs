use async_trait::async_trait;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, AUTHORIZATION } };
use serde::Deserialize;
use serde_json::json;
use std::error::Error as StdError;
use super::{ EmbeddingClient, EmbeddingResponse };
use super::super::{ LlmConfig, CONNECT_TIMEOUT, REQUEST_TIMEOUT };

const DEFAULT_BASE_URL: &str = "https://router.huggingface.co/hf-inference/models";
const DEFAULT_MODEL: &str = "sentence-transformers/paraphrase-multilingual-mpnet-base-v2";

/// Hugging Face inference `feature-extraction` pipeline.
pub struct HuggingFaceEmbeddingClient {
    http: HttpClient,
    url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureExtraction {
    Pooled(Vec<f32>),
    Batch(Vec<Vec<f32>>),
}

impl HuggingFaceEmbeddingClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let url = format!("{}/{}/pipeline/feature-extraction", base.trim_end_matches('/'), model);

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                format!("Invalid API key format: {}", e)
            )?
        );
        let http = HttpClient::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { http, url })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "Hugging Face API key is required for HuggingFaceEmbeddingClient".to_string())?;
        Self::new(api_key, config.embedding_model.clone(), config.base_url.clone())
    }
}

#[async_trait]
impl EmbeddingClient for HuggingFaceEmbeddingClient {
    async fn embed(
        &self,
        text: &str
    ) -> Result<EmbeddingResponse, Box<dyn StdError + Send + Sync>> {
        let resp = self.http
            .post(&self.url)
            .json(&json!({ "inputs": [text] }))
            .send().await?
            .error_for_status()?
            .json::<FeatureExtraction>().await?;

        let embedding = match resp {
            FeatureExtraction::Pooled(vector) => vector,
            FeatureExtraction::Batch(mut vectors) => {
                if vectors.is_empty() {
                    return Err("Hugging Face feature extraction returned no results".into());
                }
                vectors.swap_remove(0)
            }
        };

        Ok(EmbeddingResponse { embedding })
    }
}
