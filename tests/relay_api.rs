use async_trait::async_trait;
use axum::body::{ to_bytes, Body, Bytes };
use axum::http::{ header, Request, StatusCode };
use axum::Router;
use chat_relay::auth::{ Claims, Hs256Verifier };
use chat_relay::config::personas::{ ModelCategory, PersonaConfig };
use chat_relay::history::{ HistoryStore, MemoryHistoryStore };
use chat_relay::llm::chat::{ ByteStream, ChatClient };
use chat_relay::llm::embedding::{ EmbeddingClient, EmbeddingResponse, EMBEDDING_DIMENSION };
use chat_relay::models::chat::{ ChatMessage, Role };
use chat_relay::rag::{
    ContextRetriever,
    DocumentIngester,
    MetadataFilter,
    VectorIndex,
    VectorMatch,
    VectorPoint,
};
use chat_relay::relay::ChatRelay;
use chat_relay::selector::ModelSelector;
use chat_relay::server::api::{ router, AppState, NDJSON };
use chat_relay::stream::StreamReassembler;
use serde_json::{ json, Value };
use std::error::Error;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };
use tower::ServiceExt;

const SECRET: &str = "test-secret";

struct CountingEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingClient for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, Box<dyn Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let embedding = match text {
            "general chat" => vec![1.0, 0.0, 0.0],
            "technical help" => vec![0.0, 1.0, 0.0],
            "stories" => vec![0.0, 0.0, 1.0],
            _ => vec![0.2, 0.9, 0.5],
        };
        Ok(EmbeddingResponse { embedding })
    }
}

struct CountingRetriever {
    calls: AtomicUsize,
    users: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl ContextRetriever for CountingRetriever {
    async fn relevant_context(
        &self,
        _query: &str,
        user_id: Option<&str>
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.users.lock().unwrap().push(user_id.map(str::to_string));
        Ok("Headstarter interviews are 30 minutes long.".into())
    }
}

#[derive(Clone, Copy)]
enum Upstream {
    Completes,
    Rejects(&'static str),
    DropsAfter(usize),
}

struct MockUpstream {
    calls: AtomicUsize,
    behavior: Upstream,
    models: Mutex<Vec<String>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl ChatClient for MockUpstream {
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage]
    ) -> Result<ByteStream, Box<dyn Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models.lock().unwrap().push(model.to_string());
        self.prompts.lock().unwrap().push(messages.to_vec());
        let mut chunks: Vec<Result<Bytes, Box<dyn Error + Send + Sync>>> = vec![
            Ok(Bytes::from_static(b": OPENROUTER PROCESSING\n\ndata: {\"choices\":[{\"delta\":{\"con")),
            Ok(Bytes::from_static(b"tent\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo!\"}}]}\n\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n"))
        ];
        match self.behavior {
            Upstream::Completes => {}
            Upstream::Rejects(err) => {
                return Err(err.into());
            }
            Upstream::DropsAfter(kept) => {
                chunks.truncate(kept);
                chunks.push(Err("connection reset by peer".into()));
            }
        }
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[derive(Default)]
struct StoredChunks {
    points: Mutex<Vec<VectorPoint>>,
}

#[async_trait]
impl VectorIndex for StoredChunks {
    async fn query(
        &self,
        _vector: &[f32],
        _top_k: usize,
        _filter: Option<&MetadataFilter>
    ) -> Result<Vec<VectorMatch>, Box<dyn Error + Send + Sync>> {
        Ok(Vec::new())
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.points.lock().unwrap().extend_from_slice(points);
        Ok(())
    }
}

struct Harness {
    embedder: Arc<CountingEmbedder>,
    retriever: Arc<CountingRetriever>,
    upstream: Arc<MockUpstream>,
    history: Arc<MemoryHistoryStore>,
    index: Arc<StoredChunks>,
    app: Router,
}

impl Harness {
    fn new(behavior: Upstream) -> Self {
        let embedder = Arc::new(CountingEmbedder { calls: AtomicUsize::new(0) });
        let retriever = Arc::new(CountingRetriever {
            calls: AtomicUsize::new(0),
            users: Mutex::new(Vec::new()),
        });
        let upstream = Arc::new(MockUpstream {
            calls: AtomicUsize::new(0),
            behavior,
            models: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        });
        let history = Arc::new(MemoryHistoryStore::default());

        let category = |model: &str, description: &str| ModelCategory {
            model: model.into(),
            description: description.into(),
            persona: None,
            display_name: None,
        };
        let personas = Arc::new(PersonaConfig {
            system_prompt: "You are a support assistant.\n{context}".into(),
            categories: vec![
                category("general-model", "general chat"),
                category("tech-model", "technical help"),
                category("story-model", "stories")
            ],
        });
        let selector = Arc::new(
            ModelSelector::new(personas.categories.clone(), embedder.clone()).unwrap()
        );
        let relay = ChatRelay::new(retriever.clone(), selector, upstream.clone(), personas)
            .with_verifier(Arc::new(Hs256Verifier::new(SECRET, None)));

        let index = Arc::new(StoredChunks::default());
        let ingester = DocumentIngester::new(embedder.clone(), index.clone());

        let state = AppState::new(Arc::new(relay))
            .with_history(history.clone())
            .with_ingester(Arc::new(ingester));
        Self {
            embedder,
            retriever,
            upstream,
            history,
            index,
            app: router(state),
        }
    }

    fn collaborator_calls(&self) -> usize {
        self.embedder.calls.load(Ordering::SeqCst) +
            self.retriever.calls.load(Ordering::SeqCst) +
            self.upstream.calls.load(Ordering::SeqCst)
    }
}

fn token_for(user: &str) -> String {
    Hs256Verifier::new(SECRET, None)
        .sign(&(Claims { sub: Some(user.into()), ..Default::default() }))
        .unwrap()
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn streams_model_frame_then_content() {
    let h = Harness::new(Upstream::Completes);
    let token = token_for("u1");
    let resp = h.app
        .clone()
        .oneshot(
            post_json(
                "/api/chat",
                Some(&token),
                json!({ "messages": [{ "role": "user", "content": "hi" }], "userId": "u1" })
            )
        ).await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], NDJSON);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = std::str::from_utf8(&bytes).unwrap();
    let lines: Vec<Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(
        lines,
        vec![
            json!({ "type": "model", "value": "tech-model" }),
            json!({ "type": "content", "value": "Hel" }),
            json!({ "type": "content", "value": "lo!" })
        ]
    );

    assert_eq!(h.retriever.users.lock().unwrap().as_slice(), &[Some("u1".to_string())]);
    assert_eq!(h.upstream.models.lock().unwrap().as_slice(), &["tech-model".to_string()]);
    let prompt = h.upstream.prompts.lock().unwrap()[0].clone();
    assert_eq!(prompt[0].role, Role::System);
    assert!(prompt[0].content.ends_with("Headstarter interviews are 30 minutes long."));
    assert_eq!(prompt[1], ChatMessage::user("hi"));

    let mut reassembler = StreamReassembler::new();
    reassembler.push_chunk(&bytes);
    reassembler.finish();
    assert_eq!(reassembler.model(), Some("tech-model"));
    assert_eq!(reassembler.content(), "Hello!");
}

#[tokio::test]
async fn missing_token_is_rejected_without_side_effects() {
    let h = Harness::new(Upstream::Completes);
    let resp = h.app
        .clone()
        .oneshot(post_json("/api/chat", None, json!([{ "role": "user", "content": "hi" }]))).await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await, json!({ "error": "Unauthorized: No token provided" }));
    assert_eq!(h.collaborator_calls(), 0);

    let resp = h.app
        .clone()
        .oneshot(post_json("/api/chat", Some("forged"), json!([{ "role": "user", "content": "hi" }]))).await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await, json!({ "error": "Unauthorized: Invalid token" }));
    assert_eq!(h.collaborator_calls(), 0);
}

#[tokio::test]
async fn invalid_bodies_are_bad_requests() {
    let h = Harness::new(Upstream::Completes);
    let token = token_for("u1");
    for body in [json!([]), json!({ "messages": [{ "role": "user" }] }), json!("hi")] {
        let resp = h.app.clone().oneshot(post_json("/api/chat", Some(&token), body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].as_str().unwrap().starts_with("Invalid request"));
    }
    assert_eq!(h.collaborator_calls(), 0);
}

#[tokio::test]
async fn upstream_rejection_is_a_json_500() {
    let h = Harness::new(Upstream::Rejects("Chat completion returned 429 Too Many Requests"));
    let token = token_for("u1");
    let resp = h.app
        .clone()
        .oneshot(post_json("/api/chat", Some(&token), json!([{ "role": "user", "content": "hi" }]))).await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = body_json(resp).await["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("Upstream failure"), "{}", error);
}

#[tokio::test]
async fn threads_record_the_exchange_for_their_owner() {
    let h = Harness::new(Upstream::Completes);
    let token = token_for("u1");

    let resp = h.app
        .clone()
        .oneshot(post_json("/api/threads", Some(&token), json!({}))).await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let thread = body_json(resp).await;
    assert_eq!(thread["userId"], "u1");
    let thread_id = thread["id"].as_str().unwrap().to_string();

    let resp = h.app
        .clone()
        .oneshot(
            post_json(
                "/api/chat",
                Some(&token),
                json!({ "messages": [{ "role": "user", "content": "hi" }], "threadId": thread_id })
            )
        ).await
        .unwrap();
    to_bytes(resp.into_body(), usize::MAX).await.unwrap();

    let stored = h.history.get_thread(&thread_id, 10).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 2);
    assert_eq!(stored.messages[0].content, "hi");
    assert_eq!(stored.messages[1].role, Role::Assistant);
    assert_eq!(stored.messages[1].content, "Hello!");
    assert_eq!(stored.messages[1].model.as_deref(), Some("tech-model"));

    let read = |token: String| {
        Request::builder()
            .uri(format!("/api/threads/{}", thread_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    };
    let resp = h.app.clone().oneshot(read(token.clone())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["messages"].as_array().unwrap().len(), 2);

    let resp = h.app.clone().oneshot(read(token_for("someone-else"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

async fn thread_for(h: &Harness, token: &str) -> String {
    let resp = h.app
        .clone()
        .oneshot(post_json("/api/threads", Some(token), json!({}))).await
        .unwrap();
    body_json(resp).await["id"].as_str().unwrap().to_string()
}

async fn chat_in_thread(h: &Harness, token: &str, thread_id: &str) -> StreamReassembler {
    let resp = h.app
        .clone()
        .oneshot(
            post_json(
                "/api/chat",
                Some(token),
                json!({ "messages": [{ "role": "user", "content": "hi" }], "threadId": thread_id })
            )
        ).await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let mut reassembler = StreamReassembler::new();
    reassembler.push_chunk(&bytes);
    reassembler.finish();
    reassembler
}

#[tokio::test]
async fn interrupted_reply_is_saved_as_truncated() {
    let h = Harness::new(Upstream::DropsAfter(2));
    let token = token_for("u1");
    let thread_id = thread_for(&h, &token).await;

    let reply = chat_in_thread(&h, &token, &thread_id).await;
    assert_eq!(reply.content(), "Hello!");
    assert!(reply.error().is_some());

    let stored = h.history.get_thread(&thread_id, 10).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 2);
    assert_eq!(stored.messages[1].content, "Hello!");
    assert!(stored.messages[1].truncated);
}

#[tokio::test]
async fn reply_that_fails_before_any_content_is_not_saved() {
    let h = Harness::new(Upstream::DropsAfter(0));
    let token = token_for("u1");
    let thread_id = thread_for(&h, &token).await;

    let reply = chat_in_thread(&h, &token, &thread_id).await;
    assert_eq!(reply.model(), Some("tech-model"));
    assert_eq!(reply.content(), "");
    assert!(reply.error().is_some());

    let stored = h.history.get_thread(&thread_id, 10).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 1);
    assert_eq!(stored.messages[0].role, Role::User);
}

#[tokio::test]
async fn completed_reply_is_not_marked_truncated() {
    let h = Harness::new(Upstream::Completes);
    let token = token_for("u1");
    let thread_id = thread_for(&h, &token).await;

    chat_in_thread(&h, &token, &thread_id).await;
    let stored = h.history.get_thread(&thread_id, 10).await.unwrap().unwrap();
    assert!(!stored.messages[1].truncated);
}

#[tokio::test]
async fn documents_are_chunked_and_stored_for_their_owner() {
    let h = Harness::new(Upstream::Completes);
    let token = token_for("u1");
    let resp = h.app
        .clone()
        .oneshot(
            post_json(
                "/api/documents",
                Some(&token),
                json!({
                    "name": "support faq.txt",
                    "text": "Interviews last 30 minutes.\n\nResults arrive by email.\n\n",
                    "userId": "spoofed"
                })
            )
        ).await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(body_json(resp).await, json!({ "name": "support faq.txt", "chunks": 2 }));

    let points = h.index.points.lock().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].id, "support_faq.txt-chunk-0");
    assert_eq!(points[1].metadata["text"], "Results arrive by email.");
    assert!(points.iter().all(|p| p.values.len() == EMBEDDING_DIMENSION));
    assert!(points.iter().all(|p| p.metadata["userId"] == "u1"));
}

#[tokio::test]
async fn documents_require_auth_and_text() {
    let h = Harness::new(Upstream::Completes);
    let body = json!({ "name": "faq.txt", "text": "Interviews last 30 minutes." });

    let resp = h.app.clone().oneshot(post_json("/api/documents", None, body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let token = token_for("u1");
    let resp = h.app
        .clone()
        .oneshot(post_json("/api/documents", Some(&token), json!({ "name": "faq.txt", "text": " \n\n " }))).await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(h.index.points.lock().unwrap().is_empty());
}

#[tokio::test]
async fn health_check() {
    let h = Harness::new(Upstream::Completes);
    let resp = h.app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({ "status": "ok" }));
}
