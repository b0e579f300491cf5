pub mod openai;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::error::Error as StdError;
use std::pin::Pin;

use crate::models::chat::ChatMessage;

pub use self::openai::OpenAIChatClient;

pub type ByteStream = Pin<
    Box<dyn Stream<Item = Result<Bytes, Box<dyn StdError + Send + Sync>>> + Send>
>;

/// Upstream chat-completion provider.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Starts a streaming completion and returns the raw SSE body.
    ///
    /// A non-success status must be reported here, before any body bytes are
    /// handed out.
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage]
    ) -> Result<ByteStream, Box<dyn StdError + Send + Sync>>;
}
