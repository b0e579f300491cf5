use futures::StreamExt;
use log::debug;
use reqwest::{ Client as HttpClient, StatusCode };
use serde_json::{ json, Value };

use crate::error::RelayError;
use crate::models::chat::ChatMessage;
use crate::stream::StreamReassembler;

/// HTTP client for a running relay.
pub struct RelayClient {
    http: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Posts the conversation and streams the reply into `messages`.
    ///
    /// After every chunk the trailing assistant message is replaced with the
    /// reply so far and `on_update` is called with it.
    pub async fn send<F>(
        &self,
        messages: &mut Vec<ChatMessage>,
        user_id: Option<&str>,
        thread_id: Option<&str>,
        mut on_update: F
    ) -> Result<StreamReassembler, RelayError>
        where F: FnMut(&ChatMessage)
    {
        let mut body = json!({ "messages": messages });
        if let Some(user_id) = user_id {
            body["userId"] = json!(user_id);
        }
        if let Some(thread_id) = thread_id {
            body["threadId"] = json!(thread_id);
        }

        let mut request = self.http.post(format!("{}/api/chat", self.base_url)).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let resp = request
            .send().await
            .map_err(|e| RelayError::UpstreamFailure(format!("relay unreachable: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(error_from_response(status, &text));
        }

        let mut reassembler = StreamReassembler::new();
        let mut chunks = resp.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| RelayError::UpstreamFailure(format!("reply interrupted: {}", e)))?;
            debug!("Received {} bytes", chunk.len());
            reassembler.push_chunk(&chunk);
            reassembler.apply_to(messages);
            if let Some(last) = messages.last() {
                on_update(last);
            }
        }
        reassembler.finish();
        reassembler.apply_to(messages);
        Ok(reassembler)
    }
}

fn error_from_response(status: StatusCode, body: &str) -> RelayError {
    let message = serde_json
        ::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("relay returned {}", status));
    RelayError::from_status(status, message)
}
