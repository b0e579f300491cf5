use axum::{
    body::{ Body, Bytes },
    extract::{ Path, Query, State },
    http::{ header, HeaderMap, StatusCode },
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use futures::StreamExt;
use governor::{ RateLimiter, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };
use log::{ error, info, warn };
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{ Any, CorsLayer };

use crate::auth::Claims;
use crate::error::RelayError;
use crate::history::{ HistoryStore, DEFAULT_THREAD_LIMIT };
use crate::models::chat::{ ChatMessage, Thread };
use crate::models::wire::WireFrame;
use crate::rag::DocumentIngester;
use crate::relay::{ ChatRelay, RelaySession };

pub const NDJSON: &str = "application/x-ndjson";

pub type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<ChatRelay>,
    pub history: Option<Arc<dyn HistoryStore>>,
    pub ingester: Option<Arc<DocumentIngester>>,
    pub limiter: Option<Arc<DirectLimiter>>,
}

impl AppState {
    pub fn new(relay: Arc<ChatRelay>) -> Self {
        Self {
            relay,
            history: None,
            ingester: None,
            limiter: None,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_ingester(mut self, ingester: Arc<DocumentIngester>) -> Self {
        self.ingester = Some(ingester);
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<DirectLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    fn history(&self) -> Result<&Arc<dyn HistoryStore>, RelayError> {
        self.history.as_ref().ok_or_else(|| RelayError::NotFound("Thread storage is disabled".into()))
    }

    fn ingester(&self) -> Result<&Arc<DocumentIngester>, RelayError> {
        self.ingester.as_ref().ok_or_else(|| RelayError::NotFound("Document indexing is disabled".into()))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/threads", post(create_thread_handler))
        .route("/api/threads/{id}", get(get_thread_handler))
        .route("/api/documents", post(index_document_handler))
        .layer(cors)
        .with_state(state)
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
}

/// A verified caller may only see their own threads. Callers without an
/// identity (no auth, shared key) are not restricted.
fn can_access(claims: Option<&Claims>, thread: &Thread) -> bool {
    match claims.and_then(|c| c.subject()) {
        Some(subject) => subject == thread.user_id,
        None => true,
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes
) -> Result<Response, RelayError> {
    if let Some(limiter) = &state.limiter {
        if limiter.check().is_err() {
            warn!("Chat request rate limited");
            return Err(RelayError::RateLimited);
        }
    }

    let RelaySession { model, user_id, thread_id, prompt, mut frames } = state.relay.start(
        authorization(&headers),
        &body
    ).await?;

    let history = match (&state.history, thread_id) {
        (Some(store), Some(thread_id)) => {
            match store.get_thread(&thread_id, 1).await {
                Ok(Some(thread)) if user_id.as_deref().map_or(true, |u| u == thread.user_id) => {
                    if let Err(e) = store.add_message(&thread_id, &prompt.stamped()).await {
                        warn!("Failed to save user message to thread {}: {}", thread_id, e);
                    }
                    Some((store.clone(), thread_id))
                }
                Ok(_) => {
                    warn!("Thread {} not found for user {:?}, reply will not be saved", thread_id, user_id);
                    None
                }
                Err(e) => {
                    warn!("Failed to load thread {}: {}", thread_id, e);
                    None
                }
            }
        }
        _ => None,
    };

    let body_stream = async_stream::stream! {
        let mut reply = String::new();
        let mut failure: Option<String> = None;
        while let Some(frame) = frames.next().await {
            match &frame {
                WireFrame::Content(delta) => reply.push_str(delta),
                WireFrame::Error(reason) => failure = Some(reason.clone()),
                WireFrame::Model(_) => {}
            }
            match frame.encode() {
                Ok(bytes) => yield Ok::<Bytes, std::io::Error>(bytes),
                Err(e) => error!("Failed to encode frame: {}", e),
            }
        }
        match &failure {
            None => info!("Reply from {} finished ({} chars)", model, reply.len()),
            Some(reason) => warn!("Reply from {} cut short after {} chars: {}", model, reply.len(), reason),
        }

        if let Some((store, thread_id)) = history {
            let message = match failure {
                None => Some(ChatMessage::assistant(reply).with_model(model).stamped()),
                Some(_) if reply.is_empty() => None,
                Some(_) => Some(ChatMessage::assistant(reply).with_model(model).truncated().stamped()),
            };
            match message {
                Some(message) => {
                    if let Err(e) = store.add_message(&thread_id, &message).await {
                        warn!("Failed to save reply to thread {}: {}", thread_id, e);
                    }
                }
                None => warn!("Empty failed reply not saved to thread {}", thread_id),
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .map_err(|e| RelayError::UpstreamFailure(format!("failed to build response: {}", e)))
}

#[derive(Deserialize)]
struct CreateThreadRequest {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

async fn create_thread_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes
) -> Result<(StatusCode, Json<Thread>), RelayError> {
    let claims = state.relay.authenticate(authorization(&headers)).await?;
    let store = state.history()?;

    let request: CreateThreadRequest = if body.is_empty() {
        CreateThreadRequest { user_id: None }
    } else {
        serde_json
            ::from_slice(&body)
            .map_err(|e| RelayError::BadRequest(format!("Invalid JSON body: {}", e)))?
    };
    let user_id = claims
        .as_ref()
        .and_then(|c| c.subject())
        .map(str::to_string)
        .or(request.user_id)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| RelayError::BadRequest("Invalid request: userId is required".into()))?;

    let thread = store
        .create_thread(&user_id).await
        .map_err(|e| RelayError::History(e.to_string()))?;
    info!("Created thread {} for user {}", thread.id, user_id);
    Ok((StatusCode::CREATED, Json(thread)))
}

#[derive(Deserialize)]
struct ThreadQuery {
    limit: Option<usize>,
}

async fn get_thread_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ThreadQuery>
) -> Result<Json<Thread>, RelayError> {
    let claims = state.relay.authenticate(authorization(&headers)).await?;
    let store = state.history()?;

    let limit = query.limit.unwrap_or(DEFAULT_THREAD_LIMIT);
    let thread = store
        .get_thread(&id, limit).await
        .map_err(|e| RelayError::History(e.to_string()))?
        .filter(|thread| can_access(claims.as_ref(), thread))
        .ok_or_else(|| RelayError::NotFound(format!("Thread not found: {}", id)))?;
    Ok(Json(thread))
}

#[derive(Deserialize)]
struct IndexDocumentRequest {
    name: String,
    text: String,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

async fn index_document_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes
) -> Result<(StatusCode, Json<serde_json::Value>), RelayError> {
    let claims = state.relay.authenticate(authorization(&headers)).await?;
    let ingester = state.ingester()?;

    let request: IndexDocumentRequest = serde_json
        ::from_slice(&body)
        .map_err(|e| RelayError::BadRequest(format!("Invalid JSON body: {}", e)))?;
    if request.name.trim().is_empty() {
        return Err(RelayError::BadRequest("Invalid request: name is required".into()));
    }
    if request.text.trim().is_empty() {
        return Err(RelayError::BadRequest("Invalid request: no document text provided".into()));
    }
    let user_id = claims
        .as_ref()
        .and_then(|c| c.subject())
        .map(str::to_string)
        .or(request.user_id)
        .filter(|u| !u.is_empty());

    let chunks = ingester
        .ingest(&request.name, &request.text, user_id.as_deref()).await
        .map_err(|e| RelayError::UpstreamFailure(format!("indexing failed: {}", e)))?;
    Ok((StatusCode::CREATED, Json(json!({ "name": request.name, "chunks": chunks }))))
}
