pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod rag;
pub mod relay;
pub mod selector;
pub mod server;
pub mod stream;

use cli::{ Args, Command };
use client::RelayClient;
use history::initialize_history_store;
use log::{ info, warn };
use models::chat::ChatMessage;
use rag::DocumentIngester;
use relay::ChatRelay;
use server::Server;
use server::api::AppState;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    match args.command.clone() {
        Some(Command::Chat { url, token, user, thread, message }) => {
            chat(url, token, user, thread, message).await
        }
        Some(Command::Index { path, name, user }) => index(&args, path, name, user).await,
        Some(Command::Serve) | None => serve(args).await,
    }
}

async fn serve(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("Chat Upstream: {}", args.chat_base_url.as_deref().unwrap_or("openrouter (default)"));
    info!("Embedding LLM Type: {}", args.embedding_llm_type);
    info!("Vector Store Type: {}", args.vector_type);
    info!("Vector Store Host: {}", args.vector_host);
    info!("Auth Mode: {}", args.auth_mode);
    info!("History Store Type: {}", args.history_type);
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("built-in"));
    info!("Upstream Idle Timeout: {}s", args.upstream_idle_timeout_secs);
    info!("-------------------------");

    let relay = Arc::new(ChatRelay::from_args(&args)?);
    let history = initialize_history_store(&args)?;
    let mut state = AppState::new(relay).with_history(history);
    match DocumentIngester::from_args(&args)? {
        Some(ingester) => {
            state = state.with_ingester(Arc::new(ingester));
        }
        None => warn!("No vector store configured, document indexing is disabled"),
    }

    let server = Server::new(args.server_addr.clone(), state, args);
    server.run().await
}

async fn index(
    args: &Args,
    path: String,
    name: Option<String>,
    user: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let ingester = DocumentIngester::from_args(args)?.ok_or_else(||
        "VECTOR_TYPE must name a vector store to index documents".to_string()
    )?;
    let text = std::fs
        ::read_to_string(&path)
        .map_err(|e| format!("Failed to read document '{}': {}", path, e))?;
    let name = name.unwrap_or_else(|| {
        std::path::Path
            ::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone())
    });

    let chunks = ingester.ingest(&name, &text, user.as_deref()).await?;
    info!("Indexed {} chunks from {}", chunks, path);
    Ok(())
}

async fn chat(
    url: String,
    token: Option<String>,
    user: Option<String>,
    thread: Option<String>,
    message: String
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let client = RelayClient::new(url, token);
    let mut messages = vec![ChatMessage::user(message)];
    let mut printed = 0;
    let mut announced = false;

    let reply = client.send(&mut messages, user.as_deref(), thread.as_deref(), |update| {
        let mut stdout = std::io::stdout();
        if !announced {
            if let Some(model) = &update.model {
                let _ = writeln!(stdout, "[{}]", model);
                announced = true;
            }
        }
        if let Some(fresh) = update.content.get(printed..) {
            let _ = write!(stdout, "{}", fresh);
            printed = update.content.len();
        }
        let _ = stdout.flush();
    }).await?;
    println!();

    if let Some(error) = reply.error() {
        warn!("Reply was cut short: {}", error);
        return Err(error.to_string().into());
    }
    Ok(())
}
