use serde::{ Deserialize, Serialize };
use serde_json::Value;

use crate::error::RelayError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// The reply stream ended with an error before the model finished.
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            model: None,
            timestamp: None,
            truncated: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(chrono::Utc::now().timestamp());
        self
    }
}

/// A user's conversation, oldest message first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub messages: Vec<ChatMessage>,
}

/// Body of `POST /api/chat`.
///
/// Accepts either a bare message array or `{messages, userId, threadId}`.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
}

impl ChatRequest {
    pub fn parse(body: &[u8]) -> Result<Self, RelayError> {
        let value: Value = serde_json
            ::from_slice(body)
            .map_err(|e| RelayError::BadRequest(format!("Invalid JSON body: {}", e)))?;

        let (raw_messages, user_id, thread_id) = match value {
            Value::Array(items) => (items, None, None),
            Value::Object(mut map) => {
                let messages = match map.remove("messages") {
                    Some(Value::Array(items)) => items,
                    _ => {
                        return Err(
                            RelayError::BadRequest("Invalid request: messages must be an array".into())
                        );
                    }
                };
                let user_id = optional_string(&map, "userId")?;
                let thread_id = optional_string(&map, "threadId")?;
                (messages, user_id, thread_id)
            }
            _ => {
                return Err(
                    RelayError::BadRequest(
                        "Invalid request: expected a message array or an object".into()
                    )
                );
            }
        };

        let last = raw_messages
            .last()
            .ok_or_else(|| RelayError::BadRequest("Invalid request: messages is empty".into()))?;
        if !last.get("content").map(Value::is_string).unwrap_or(false) {
            return Err(
                RelayError::BadRequest("Invalid request: last message must have string content".into())
            );
        }

        let messages = raw_messages
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                serde_json
                    ::from_value::<ChatMessage>(raw)
                    .map_err(|e| RelayError::BadRequest(format!("Invalid message at index {}: {}", i, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            messages,
            user_id,
            thread_id,
        })
    }

    /// Content of the newest message. Parsing guarantees one exists.
    pub fn last_content(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

fn optional_string(
    map: &serde_json::Map<String, Value>,
    key: &str
) -> Result<Option<String>, RelayError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(RelayError::BadRequest(format!("Invalid request: {} must be a string", key))),
    }
}
