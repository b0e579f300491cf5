mod memory;
mod redis;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;

use crate::cli::Args;
use crate::models::chat::{ ChatMessage, Thread };

pub use self::memory::MemoryHistoryStore;
pub use self::redis::RedisHistoryStore;

/// Default page size when reading a thread back.
pub const DEFAULT_THREAD_LIMIT: usize = 100;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn create_thread(&self, user_id: &str) -> Result<Thread, Box<dyn Error + Send + Sync>>;

    async fn add_message(
        &self,
        thread_id: &str,
        message: &ChatMessage
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Returns the newest `limit` messages of a thread, oldest first, or
    /// `None` when the thread does not exist.
    async fn get_thread(
        &self,
        thread_id: &str,
        limit: usize
    ) -> Result<Option<Thread>, Box<dyn Error + Send + Sync>>;
}

pub fn create_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "redis" => {
            let store = RedisHistoryStore::new(&args.history_host, &args.history_redis_prefix)?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryHistoryStore::default())),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    info!("Chat threads will be stored in: {} at {}", args.history_type, args.history_host);
    create_history_store(args)
}
