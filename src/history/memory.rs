use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::history::HistoryStore;
use crate::models::chat::{ ChatMessage, Thread };

/// Process-local thread store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryHistoryStore {
    threads: RwLock<HashMap<String, Thread>>,
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn create_thread(&self, user_id: &str) -> Result<Thread, Box<dyn Error + Send + Sync>> {
        let thread = Thread {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            messages: Vec::new(),
        };
        self.threads.write().await.insert(thread.id.clone(), thread.clone());
        Ok(thread)
    }

    async fn add_message(
        &self,
        thread_id: &str,
        message: &ChatMessage
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut threads = self.threads.write().await;
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| format!("Unknown thread: {}", thread_id))?;
        let mut message = message.clone();
        if message.timestamp.is_none() {
            message = message.stamped();
        }
        thread.messages.push(message);
        Ok(())
    }

    async fn get_thread(
        &self,
        thread_id: &str,
        limit: usize
    ) -> Result<Option<Thread>, Box<dyn Error + Send + Sync>> {
        let threads = self.threads.read().await;
        Ok(
            threads.get(thread_id).map(|thread| {
                let skip = thread.messages.len().saturating_sub(limit);
                Thread {
                    id: thread.id.clone(),
                    user_id: thread.user_id.clone(),
                    messages: thread.messages[skip..].to_vec(),
                }
            })
        )
    }
}
