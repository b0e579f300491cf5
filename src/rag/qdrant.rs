use async_trait::async_trait;
use log::debug;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{ Condition, Filter, PointStruct, SearchPointsBuilder, UpsertPointsBuilder };
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{ value::Kind, Value };
use std::collections::HashMap;
use std::error::Error as StdError;
use uuid::Uuid;

use super::{ MetadataFilter, VectorIndex, VectorMatch, VectorPoint, TEXT_KEY };
use crate::llm::{ CONNECT_TIMEOUT, REQUEST_TIMEOUT };

/// Payload key holding the caller's chunk id. The point id is its UUIDv5.
const CHUNK_ID_KEY: &str = "chunkId";

/// Qdrant collection used as the context index.
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantIndex {
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection: String
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let client = Qdrant::from_url(url)
            .api_key(api_key.filter(|k| !k.is_empty()))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, collection })
    }
}

/// Stable UUID for a chunk id, so re-indexing a document overwrites it.
fn point_uuid(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, chunk_id.as_bytes()).to_string()
}

fn to_point_struct(point: &VectorPoint) -> PointStruct {
    let mut payload: HashMap<String, Value> = point.metadata
        .iter()
        .map(|(key, value)| (key.clone(), value.clone().into()))
        .collect();
    payload.insert(CHUNK_ID_KEY.to_string(), point.id.clone().into());
    PointStruct::new(point_uuid(&point.id), point.values.clone(), payload)
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key).and_then(|value| value.kind.as_ref()) {
        Some(Kind::StringValue(text)) => Some(text.clone()),
        _ => None,
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>
    ) -> Result<Vec<VectorMatch>, Box<dyn StdError + Send + Sync>> {
        let mut search = SearchPointsBuilder::new(
            &self.collection,
            vector.to_vec(),
            top_k as u64
        ).with_payload(true);

        if let Some(filter) = filter {
            let conditions: Vec<Condition> = filter.0
                .iter()
                .map(|(key, value)| Condition::matches(key.clone(), value.clone()))
                .collect();
            search = search.filter(Filter::must(conditions));
        }

        let response = self.client.search_points(search).await?;

        let mut matches = Vec::with_capacity(response.result.len());
        for point in response.result {
            let point_id = match point.id.and_then(|id| id.point_id_options) {
                Some(PointIdOptions::Num(n)) => n.to_string(),
                Some(PointIdOptions::Uuid(uuid)) => uuid,
                None => String::new(),
            };
            let text = payload_string(&point.payload, TEXT_KEY);
            let id = payload_string(&point.payload, CHUNK_ID_KEY).unwrap_or(point_id);
            matches.push(VectorMatch {
                id,
                score: point.score,
                text,
            });
        }
        Ok(matches)
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), Box<dyn StdError + Send + Sync>> {
        if points.is_empty() {
            return Ok(());
        }
        let structs: Vec<PointStruct> = points.iter().map(to_point_struct).collect();
        self.client.upsert_points(UpsertPointsBuilder::new(&self.collection, structs).wait(true)).await?;
        debug!("Qdrant upserted {} points into {}", points.len(), self.collection);
        Ok(())
    }
}
