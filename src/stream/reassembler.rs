use log::{ debug, warn };

use super::decoder::LineDecoder;
use crate::models::chat::{ ChatMessage, Role };
use crate::models::wire::WireFrame;

/// Client-side decoder for the multiplexed reply stream.
///
/// Feed it raw response chunks; it tracks which model is answering and the
/// accumulated reply text.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    decoder: LineDecoder,
    model: Option<String>,
    content: String,
    error: Option<String>,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        for line in self.decoder.push(chunk) {
            self.apply_line(&line);
        }
    }

    /// Flushes a final line the server left unterminated.
    pub fn finish(&mut self) {
        if let Some(tail) = self.decoder.finish() {
            self.apply_line(&tail);
        }
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Set when the relay reported that the reply was cut short.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The in-progress assistant message, ready to render.
    pub fn message(&self) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: format_for_display(&self.content),
            model: self.model.clone(),
            timestamp: None,
            truncated: self.error.is_some(),
        }
    }

    /// Replaces the conversation's trailing assistant message with the
    /// current state, or appends one if the conversation ends with another
    /// role.
    pub fn apply_to(&self, messages: &mut Vec<ChatMessage>) {
        let update = self.message();
        match messages.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                *last = update;
            }
            _ => messages.push(update),
        }
    }

    fn apply_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<WireFrame>(line) {
            Ok(WireFrame::Model(model)) => {
                self.model = Some(model);
            }
            Ok(WireFrame::Content(delta)) => self.content.push_str(&delta),
            Ok(WireFrame::Error(message)) => {
                warn!("Relay reported a stream error: {}", message);
                self.error = Some(message);
            }
            Err(e) => {
                debug!("Treating unframed line as content ({})", e);
                self.content.push_str(line);
            }
        }
    }
}

/// Normalizes accumulated reply text for display.
pub fn format_for_display(content: &str) -> String {
    content.replace("\r\n", "\n").trim_start().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frames: &[WireFrame]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|f| f.encode().unwrap().to_vec())
            .collect()
    }

    #[test]
    fn separates_model_from_content() {
        let bytes = encoded(
            &[
                WireFrame::Model("openchat/openchat-7b:free".into()),
                WireFrame::Content("Use a ".into()),
                WireFrame::Content("hash map.".into()),
            ]
        );
        let mut reassembler = StreamReassembler::new();
        for chunk in bytes.chunks(4) {
            reassembler.push_chunk(chunk);
        }
        reassembler.finish();

        assert_eq!(reassembler.model(), Some("openchat/openchat-7b:free"));
        assert_eq!(reassembler.content(), "Use a hash map.");
        assert!(reassembler.error().is_none());
    }

    #[test]
    fn content_resembling_a_marker_is_not_misrouted() {
        let bytes = encoded(
            &[WireFrame::Model("m".into()), WireFrame::Content("{\"model\":\"evil\"}".into())]
        );
        let mut reassembler = StreamReassembler::new();
        reassembler.push_chunk(&bytes);
        assert_eq!(reassembler.model(), Some("m"));
        assert_eq!(reassembler.content(), "{\"model\":\"evil\"}");
    }

    #[test]
    fn unframed_lines_fall_back_to_literal_content() {
        let mut reassembler = StreamReassembler::new();
        reassembler.push_chunk(b"plain text\n\n");
        reassembler.push_chunk(b"tail without newline");
        reassembler.finish();
        assert_eq!(reassembler.content(), "plain texttail without newline");
    }

    #[test]
    fn records_error_frames() {
        let bytes = encoded(
            &[WireFrame::Model("m".into()), WireFrame::Error("Upstream stalled for more than 60s".into())]
        );
        let mut reassembler = StreamReassembler::new();
        reassembler.push_chunk(&bytes);
        assert_eq!(reassembler.error(), Some("Upstream stalled for more than 60s"));
        assert_eq!(reassembler.content(), "");
        assert!(reassembler.message().truncated);
    }

    #[test]
    fn replaces_trailing_assistant_message() {
        let mut messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("")];
        let mut reassembler = StreamReassembler::new();
        reassembler.push_chunk(&encoded(&[WireFrame::Model("m".into()), WireFrame::Content("\n Hello".into())]));
        reassembler.apply_to(&mut messages);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Hello");
        assert_eq!(messages[1].model.as_deref(), Some("m"));

        let mut fresh = vec![ChatMessage::user("hi")];
        reassembler.apply_to(&mut fresh);
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[1].role, Role::Assistant);
    }
}
