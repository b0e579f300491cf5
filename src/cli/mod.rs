use clap::{ Parser, Subcommand };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    // --- Server Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Chat requests allowed per second across all clients. 0 disables limiting.
    #[arg(long, env = "RATE_LIMIT_PER_SECOND", default_value = "0")]
    pub rate_limit_per_second: u32,

    /// Seconds without an upstream chunk before a reply is cut off. 0 waits forever.
    #[arg(long, env = "UPSTREAM_IDLE_TIMEOUT_SECS", default_value = "60")]
    pub upstream_idle_timeout_secs: u64,

    // --- Chat Upstream Args ---
    /// Full chat-completions URL of an OpenAI-compatible provider. Defaults to OpenRouter.
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    /// API Key for the chat provider
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Sent as HTTP-Referer (OpenRouter attribution)
    #[arg(long, env = "CHAT_REFERER")]
    pub chat_referer: Option<String>,

    /// Sent as X-Title (OpenRouter attribution)
    #[arg(long, env = "CHAT_TITLE")]
    pub chat_title: Option<String>,

    // --- Embedding LLM Provider Args ---
    /// Type of LLM provider for text embedding (huggingface, openai, ollama)
    #[arg(long, env = "EMBEDDING_LLM_TYPE", default_value = "huggingface")]
    pub embedding_llm_type: String,

    /// Base URL for the Embedding LLM provider API
    #[arg(long, env = "EMBEDDING_BASE_URL")]
    pub embedding_base_url: Option<String>,

    /// API Key for the Embedding LLM provider
    #[arg(long, env = "EMBEDDING_API_KEY", default_value = "")]
    pub embedding_api_key: String,

    /// Model name for text embedding
    #[arg(long, env = "EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    // --- Vector Store Args ---
    /// Vector database type (pinecone, qdrant, none)
    #[arg(short = 't', long, env = "VECTOR_TYPE", default_value = "none")]
    pub vector_type: String,

    /// Vector database host (Pinecone index host or Qdrant gRPC URL)
    #[arg(long, env = "VECTOR_HOST", default_value = "http://localhost:6334")]
    pub vector_host: String,

    /// API key for the vector database
    #[arg(short = 'k', env = "VECTOR_SECRET", long, default_value = "")]
    pub vector_secret: String,

    /// Collection name (Qdrant)
    #[arg(long, env = "VECTOR_INDEX_NAME", default_value = "default_index")]
    pub vector_index_name: String,

    /// Namespace (Pinecone)
    #[arg(long, env = "VECTOR_NAMESPACE")]
    pub vector_namespace: Option<String>,

    /// Number of context chunks to retrieve per request.
    #[arg(long, env = "RAG_TOP_K", default_value = "3")]
    pub rag_top_k: usize,

    /// Continue with empty context when retrieval fails instead of failing the request.
    #[arg(long, env = "RETRIEVAL_FALLBACK", default_value = "false")]
    pub retrieval_fallback: bool,

    // --- Auth Args ---
    /// How chat requests are authenticated (none, hs256, api-key)
    #[arg(long, env = "AUTH_MODE", default_value = "none")]
    pub auth_mode: String,

    /// HMAC secret (hs256) or shared key (api-key)
    #[arg(long, env = "AUTH_SECRET", default_value = "")]
    pub auth_secret: String,

    /// Required `iss` claim for hs256 tokens
    #[arg(long, env = "AUTH_ISSUER")]
    pub auth_issuer: Option<String>,

    // --- History Store Args ---
    /// Thread store type (redis, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "memory")]
    pub history_type: String,

    /// Thread store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis thread keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "thread:")]
    pub history_redis_prefix: String,

    // --- Persona Args ---
    /// Path to a personas JSON file. Built-in personas are used when unset.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the relay server (default)
    Serve,
    /// Send one message to a running relay and print the reply as it streams
    Chat {
        /// Base URL of the relay
        #[arg(long, env = "RELAY_URL", default_value = "http://127.0.0.1:4000")]
        url: String,

        /// Bearer token sent with the request
        #[arg(long, env = "RELAY_TOKEN")]
        token: Option<String>,

        #[arg(long)]
        user: Option<String>,

        /// Thread to append the exchange to
        #[arg(long)]
        thread: Option<String>,

        message: String,
    },
    /// Split a text file on blank lines, embed each chunk and write it to the vector store
    Index {
        /// Text file to index
        path: String,

        /// Name used for chunk ids. Defaults to the file name.
        #[arg(long)]
        name: Option<String>,

        /// Owner recorded on every chunk
        #[arg(long)]
        user: Option<String>,
    },
}
