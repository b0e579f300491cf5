use async_trait::async_trait;
use log::debug;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };
use serde_json::{ json, Map, Value };
use std::collections::BTreeMap;
use std::error::Error as StdError;

use super::{ MetadataFilter, VectorIndex, VectorMatch, VectorPoint, TEXT_KEY };
use crate::llm::{ CONNECT_TIMEOUT, REQUEST_TIMEOUT };

const API_VERSION: &str = "2024-07";
/// Pinecone accepts at most 1000 vectors (and 2MB) per upsert.
const UPSERT_BATCH: usize = 100;

/// Pinecone data-plane client for one index host.
pub struct PineconeIndex {
    http: HttpClient,
    query_url: String,
    upsert_url: String,
    namespace: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<PineconeMatch>,
}

#[derive(Deserialize)]
struct PineconeMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl PineconeIndex {
    /// `host` is the index host shown in the Pinecone console, with or
    /// without scheme.
    pub fn new(
        host: &str,
        api_key: &str,
        namespace: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host.trim_end_matches('/'))
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Pinecone-API-Version", HeaderValue::from_static(API_VERSION));
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(api_key).map_err(|e| format!("Invalid Pinecone API key: {}", e))?
        );
        let http = HttpClient::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            query_url: format!("{}/query", base),
            upsert_url: format!("{}/vectors/upsert", base),
            namespace: namespace.filter(|n| !n.is_empty()),
        })
    }
}

fn upsert_request<'a>(points: &'a [VectorPoint], namespace: Option<&'a str>) -> UpsertRequest<'a> {
    UpsertRequest {
        vectors: points
            .iter()
            .map(|p| UpsertVector {
                id: &p.id,
                values: &p.values,
                metadata: &p.metadata,
            })
            .collect(),
        namespace,
    }
}

fn filter_json(filter: &MetadataFilter) -> Value {
    let clauses: Map<String, Value> = filter.0
        .iter()
        .map(|(k, v)| (k.clone(), json!({ "$eq": v })))
        .collect();
    Value::Object(clauses)
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>
    ) -> Result<Vec<VectorMatch>, Box<dyn StdError + Send + Sync>> {
        let req = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            filter: filter.map(filter_json),
            namespace: self.namespace.as_deref(),
        };

        let resp = self.http
            .post(&self.query_url)
            .json(&req)
            .send().await?
            .error_for_status()?
            .json::<QueryResponse>().await?;

        Ok(
            resp.matches
                .into_iter()
                .map(|m| VectorMatch {
                    id: m.id,
                    score: m.score,
                    text: m.metadata
                        .as_ref()
                        .and_then(|meta| meta.get(TEXT_KEY))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
                .collect()
        )
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), Box<dyn StdError + Send + Sync>> {
        for batch in points.chunks(UPSERT_BATCH) {
            let resp = self.http
                .post(&self.upsert_url)
                .json(&upsert_request(batch, self.namespace.as_deref()))
                .send().await?
                .error_for_status()?
                .json::<UpsertResponse>().await?;
            debug!("Pinecone upserted {} of {} vectors", resp.upserted_count, batch.len());
        }
        Ok(())
    }
}
