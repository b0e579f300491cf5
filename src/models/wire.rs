use bytes::Bytes;
use serde::{ Serialize, Deserialize };

/// One line of the multiplexed stream sent to chat clients.
///
/// Encoded as a JSON object followed by `\n`. The `model` frame is always the
/// first frame of a response and appears exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum WireFrame {
    #[serde(rename = "model")] Model(String),
    #[serde(rename = "content")] Content(String),
    #[serde(rename = "error")] Error(String),
}

impl WireFrame {
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_tagged_json_lines() {
        let bytes = WireFrame::Model("meta-llama/llama-3.1-8b-instruct:free".into()).encode().unwrap();
        assert_eq!(
            &bytes[..],
            b"{\"type\":\"model\",\"value\":\"meta-llama/llama-3.1-8b-instruct:free\"}\n"
        );
    }

    #[test]
    fn content_that_looks_like_a_marker_stays_content() {
        let frame = WireFrame::Content("{\"model\":\"x\"}\nsecond line".into());
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);

        let decoded: WireFrame = serde_json::from_slice(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(decoded, frame);
    }
}
