use log::{ info, warn };
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{ bearer_token, ApiKeyVerifier, AuthError, Claims, Hs256Verifier, TokenVerifier };
use crate::cli::Args;
use crate::config::personas::{ load_personas, PersonaConfig };
use crate::error::RelayError;
use crate::llm::LlmConfig;
use crate::llm::chat::{ ChatClient, OpenAIChatClient };
use crate::llm::embedding::new_client as new_embedding_client;
use crate::models::chat::{ ChatMessage, ChatRequest };
use crate::rag::{ new_index, ContextRetriever, NoContext, VectorRetriever };
use crate::selector::ModelSelector;
use crate::stream::{ multiplex, FrameStream };

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// A reply that has been accepted and is ready to stream.
pub struct RelaySession {
    pub model: String,
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    /// The newest message of the request, as sent by the user.
    pub prompt: ChatMessage,
    pub frames: FrameStream,
}

/// Orchestrates one chat turn: verify, validate, retrieve context, pick a
/// model, compose the prompt and open the upstream stream.
pub struct ChatRelay {
    verifier: Option<Arc<dyn TokenVerifier>>,
    retriever: Arc<dyn ContextRetriever>,
    selector: Arc<ModelSelector>,
    chat_client: Arc<dyn ChatClient>,
    personas: Arc<PersonaConfig>,
    idle_timeout: Option<Duration>,
    retrieval_fallback: bool,
}

impl ChatRelay {
    pub fn new(
        retriever: Arc<dyn ContextRetriever>,
        selector: Arc<ModelSelector>,
        chat_client: Arc<dyn ChatClient>,
        personas: Arc<PersonaConfig>
    ) -> Self {
        Self {
            verifier: None,
            retriever,
            selector,
            chat_client,
            personas,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            retrieval_fallback: false,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// `None` waits on a silent upstream forever.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// When set, a failed context lookup continues with empty context.
    pub fn with_retrieval_fallback(mut self, enabled: bool) -> Self {
        self.retrieval_fallback = enabled;
        self
    }

    pub fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let personas = load_personas(args.prompts_path.as_deref())?;

        let embedding_config = LlmConfig::embedding_from_args(args).map_err(|e|
            format!("Invalid embedding LLM type: {}", e)
        )?;
        let embedding_client = new_embedding_client(&embedding_config)?;
        info!(
            "Embedding client configured: Type={}, Model={:?}, BaseURL={:?}",
            args.embedding_llm_type,
            embedding_config.embedding_model.as_deref().unwrap_or("adapter default"),
            embedding_config.base_url.as_deref().unwrap_or("adapter default")
        );

        let selector = Arc::new(
            ModelSelector::new(personas.categories.clone(), embedding_client.clone())?
        );

        let retriever: Arc<dyn ContextRetriever> = match new_index(args)? {
            Some(index) => Arc::new(VectorRetriever::new(embedding_client.clone(), index, args.rag_top_k)),
            None => {
                warn!("No vector store configured, replies will not use retrieved context");
                Arc::new(NoContext)
            }
        };
        info!("Context retrieval: {} (top_k={})", args.vector_type, args.rag_top_k);

        let chat_client: Arc<dyn ChatClient> = Arc::new(
            OpenAIChatClient::new(
                args.chat_api_key.clone(),
                args.chat_base_url.clone(),
                args.chat_referer.clone(),
                args.chat_title.clone()
            )?
        );

        let idle_timeout = match args.upstream_idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let mut relay = ChatRelay::new(retriever, selector, chat_client, personas)
            .with_idle_timeout(idle_timeout)
            .with_retrieval_fallback(args.retrieval_fallback);

        match args.auth_mode.to_lowercase().as_str() {
            "none" => {
                warn!("AUTH_MODE=none, chat requests are not authenticated");
            }
            "hs256" => {
                if args.auth_secret.is_empty() {
                    return Err(RelayError::Config("AUTH_SECRET is required for hs256".into()).into());
                }
                relay = relay.with_verifier(
                    Arc::new(Hs256Verifier::new(args.auth_secret.as_bytes(), args.auth_issuer.clone()))
                );
            }
            "api-key" => {
                if args.auth_secret.is_empty() {
                    return Err(RelayError::Config("AUTH_SECRET is required for api-key".into()).into());
                }
                relay = relay.with_verifier(Arc::new(ApiKeyVerifier::new(args.auth_secret.clone())));
            }
            other => {
                return Err(RelayError::Config(format!("Unsupported auth mode: {}", other)).into());
            }
        }

        Ok(relay)
    }

    /// Checks the `Authorization` header value. `Ok(None)` means no verifier
    /// is configured.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>
    ) -> Result<Option<Claims>, RelayError> {
        let Some(verifier) = &self.verifier else {
            return Ok(None);
        };
        let token = bearer_token(authorization).ok_or(AuthError::MissingToken)?;
        let claims = verifier.verify(token).await.map_err(|e| {
            if let AuthError::InvalidToken(reason) = &e {
                warn!("Rejected request: {}", reason);
            }
            e
        })?;
        Ok(Some(claims))
    }

    /// Runs everything up to the first upstream byte. Any error returned here
    /// happens before a response has started.
    pub async fn start(
        &self,
        authorization: Option<&str>,
        body: &[u8]
    ) -> Result<RelaySession, RelayError> {
        let claims = self.authenticate(authorization).await?;

        let request = ChatRequest::parse(body)?;
        let user_id = claims
            .as_ref()
            .and_then(|c| c.subject())
            .map(str::to_string)
            .or(request.user_id.clone());
        let query = request.last_content();

        let context = match self.retriever.relevant_context(query, user_id.as_deref()).await {
            Ok(context) => context,
            Err(e) if self.retrieval_fallback => {
                warn!("Context retrieval failed, continuing without context: {}", e);
                String::new()
            }
            Err(e) => {
                return Err(RelayError::UpstreamFailure(format!("context retrieval failed: {}", e)));
            }
        };

        let model = self.selector
            .select(query).await
            .map_err(|e| RelayError::UpstreamFailure(format!("model selection failed: {}", e)))?
            .model.clone();

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage::system(self.personas.system_prompt_for(&model, &context)));
        messages.extend(request.messages.iter().cloned());

        let upstream = self.chat_client
            .stream_chat(&model, &messages).await
            .map_err(|e| RelayError::UpstreamFailure(format!("chat completion failed: {}", e)))?;
        info!("Relaying reply from {} (user: {:?})", model, user_id);

        let prompt = request.messages.last().cloned().unwrap_or_else(|| ChatMessage::user(query));
        Ok(RelaySession {
            frames: Box::pin(multiplex(upstream, model.clone(), self.idle_timeout)),
            model,
            user_id,
            thread_id: request.thread_id,
            prompt,
        })
    }
}
