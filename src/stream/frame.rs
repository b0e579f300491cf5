use serde::Deserialize;

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One classified upstream SSE line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// `choices[0].delta.content`, empty when the chunk carried none.
    Data(String),
    Done,
    Malformed { payload: String, error: String },
}

#[derive(Deserialize)]
struct CompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Classifies a decoded line. Returns `None` for anything that is not a
/// `data:` record (comments, `event:` lines, keep-alive blanks).
pub fn parse_line(line: &str) -> Option<StreamFrame> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_SENTINEL {
        return Some(StreamFrame::Done);
    }

    let frame = match serde_json::from_str::<CompletionChunk>(payload) {
        Ok(chunk) => {
            let content = chunk.choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta)
                .and_then(|delta| delta.content)
                .unwrap_or_default();
            StreamFrame::Data(content)
        }
        Err(e) =>
            StreamFrame::Malformed {
                payload: payload.to_string(),
                error: e.to_string(),
            },
    };
    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_delta_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_line(line), Some(StreamFrame::Data("Hel".into())));
    }

    #[test]
    fn missing_content_defaults_to_empty() {
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_line(role_only), Some(StreamFrame::Data(String::new())));

        let null_content = r#"data: {"choices":[{"delta":{"content":null},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_line(null_content), Some(StreamFrame::Data(String::new())));

        assert_eq!(parse_line(r#"data: {"choices":[]}"#), Some(StreamFrame::Data(String::new())));
    }

    #[test]
    fn done_sentinel_and_non_data_lines() {
        assert_eq!(parse_line("data: [DONE]"), Some(StreamFrame::Done));
        assert_eq!(parse_line("data:[DONE]"), Some(StreamFrame::Done));
        assert_eq!(parse_line(": OPENROUTER PROCESSING"), None);
        assert_eq!(parse_line("event: message"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn broken_json_is_malformed() {
        match parse_line("data: {\"choices\":[") {
            Some(StreamFrame::Malformed { payload, .. }) => assert_eq!(payload, "{\"choices\":["),
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(
            matches!(
                parse_line(r#"data: {"error":{"message":"rate limited"}}"#),
                Some(StreamFrame::Malformed { .. })
            )
        );
    }
}
