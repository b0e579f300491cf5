use async_trait::async_trait;
use futures::TryStreamExt;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::Serialize;
use std::error::Error as StdError;
use std::time::Duration;

use super::{ ByteStream, ChatClient };
use crate::llm::{ CONNECT_TIMEOUT, STREAM_OPEN_TIMEOUT };
use crate::models::chat::ChatMessage;

const DEFAULT_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Streaming client for any OpenAI-compatible `/chat/completions` endpoint
/// (OpenRouter by default).
pub struct OpenAIChatClient {
    http: HttpClient,
    url: String,
    open_timeout: Duration,
}

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    stream: bool,
}

impl OpenAIChatClient {
    /// `referer` and `title` become OpenRouter's `HTTP-Referer` / `X-Title`
    /// attribution headers.
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        referer: Option<String>,
        title: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let url = base_url.unwrap_or_else(|| DEFAULT_CHAT_URL.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !api_key.is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                    format!("Invalid API key format: {}", e)
                )?
            );
        }
        if let Some(referer) = referer.filter(|r| !r.is_empty()) {
            headers.insert(
                "HTTP-Referer",
                HeaderValue::from_str(&referer).map_err(|e| format!("Invalid referer: {}", e))?
            );
        }
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            headers.insert(
                "X-Title",
                HeaderValue::from_str(&title).map_err(|e| format!("Invalid title: {}", e))?
            );
        }

        let http = HttpClient::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        info!("Chat upstream configured: {}", url);
        Ok(Self {
            http,
            url,
            open_timeout: STREAM_OPEN_TIMEOUT,
        })
    }

    /// Limit on waiting for the completion's response headers.
    pub fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage]
    ) -> Result<ByteStream, Box<dyn StdError + Send + Sync>> {
        let req = OpenAIChatRequest {
            model,
            messages: messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
        };

        debug!("Opening completion stream: model={}, messages={}", model, messages.len());
        let resp = tokio::time
            ::timeout(self.open_timeout, self.http.post(&self.url).json(&req).send()).await
            .map_err(|_| format!("Chat completion did not respond within {:?}", self.open_timeout))??;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Chat completion returned {}: {}", status, body.trim()).into());
        }

        let body = resp
            .bytes_stream()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>);
        Ok(Box::pin(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn silent_upstream_fails_after_the_open_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let client = OpenAIChatClient::new(
            "key".into(),
            Some(format!("http://{}/v1/chat/completions", addr)),
            None,
            None
        )
            .unwrap()
            .with_open_timeout(Duration::from_millis(100));

        let err = match client.stream_chat("m", &[ChatMessage::user("hi")]).await {
            Ok(_) => panic!("silent upstream should time out"),
            Err(e) => e.to_string(),
        };
        assert!(err.contains("did not respond within"), "{}", err);
        server.abort();
    }
}
