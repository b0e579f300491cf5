use async_trait::async_trait;
use crate::models::chat::{ ChatMessage, Thread };
use crate::history::HistoryStore;
use std::error::Error;
use log::error;
use redis::{ Client, AsyncCommands };
use uuid::Uuid;

/// One Redis list per thread, newest message at the head, plus an owner key.
pub struct RedisHistoryStore {
    client: Client,
    key_prefix: String,
}

impl RedisHistoryStore {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn messages_key(&self, thread_id: &str) -> String {
        format!("{}{}", self.key_prefix, thread_id)
    }

    fn owner_key(&self, thread_id: &str) -> String {
        format!("{}{}:owner", self.key_prefix, thread_id)
    }
}

/// Inclusive LRANGE stop index for the newest `limit` entries.
fn lrange_stop(limit: usize) -> Option<isize> {
    if limit == 0 {
        return None;
    }
    Some(isize::try_from(limit).unwrap_or(isize::MAX).saturating_sub(1))
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn create_thread(&self, user_id: &str) -> Result<Thread, Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let id = Uuid::new_v4().to_string();
        let _: () = conn.set(self.owner_key(&id), user_id).await?;
        Ok(Thread {
            id,
            user_id: user_id.to_string(),
            messages: Vec::new(),
        })
    }

    async fn add_message(
        &self,
        thread_id: &str,
        message: &ChatMessage
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let mut message = message.clone();
        if message.timestamp.is_none() {
            message = message.stamped();
        }
        let json_msg = serde_json::to_string(&message)?;
        let _: i64 = conn.lpush(self.messages_key(thread_id), &json_msg).await?;
        Ok(())
    }

    async fn get_thread(
        &self,
        thread_id: &str,
        limit: usize
    ) -> Result<Option<Thread>, Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let owner: Option<String> = conn.get(self.owner_key(thread_id)).await?;
        let Some(user_id) = owner else {
            return Ok(None);
        };

        let json_entries: Vec<String> = match lrange_stop(limit) {
            Some(stop) => conn.lrange(self.messages_key(thread_id), 0, stop).await?,
            None => Vec::new(),
        };
        let mut messages = Vec::with_capacity(json_entries.len());

        for json_entry in &json_entries {
            match serde_json::from_str::<ChatMessage>(json_entry) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    error!("Error parsing history entry: {}", e);
                }
            }
        }
        messages.reverse();

        Ok(
            Some(Thread {
                id: thread_id.to_string(),
                user_id,
                messages,
            })
        )
    }
}
