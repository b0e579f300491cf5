pub mod chat;
pub mod embedding;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;
use std::time::Duration;

use crate::cli::Args;

/// TCP connect limit for every outbound provider client.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Whole-request limit for unary calls (embeddings, vector queries).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a completion may take to return its response headers.
pub const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    HuggingFace,
    OpenAI,
    Ollama,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLlmTypeError {
    message: String,
}

impl fmt::Display for ParseLlmTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseLlmTypeError {}
impl FromStr for LlmType {
    type Err = ParseLlmTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "huggingface" | "hf" => Ok(LlmType::HuggingFace),
            "openai" => Ok(LlmType::OpenAI),
            "ollama" => Ok(LlmType::Ollama),
            _ =>
                Err(ParseLlmTypeError {
                    message: format!("Invalid LLM type: '{}'", s),
                }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub llm_type: LlmType,
    pub api_key: Option<String>,
    pub embedding_model: Option<String>,
    pub base_url: Option<String>,
}

impl LlmConfig {
    /// The `EMBEDDING_*` settings.
    pub fn embedding_from_args(args: &Args) -> Result<Self, ParseLlmTypeError> {
        Ok(Self {
            llm_type: args.embedding_llm_type.parse()?,
            base_url: args.embedding_base_url.clone(),
            api_key: Some(args.embedding_api_key.clone()).filter(|k| !k.is_empty()),
            embedding_model: args.embedding_model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_names_case_insensitively() {
        assert_eq!("HuggingFace".parse::<LlmType>(), Ok(LlmType::HuggingFace));
        assert_eq!("hf".parse::<LlmType>(), Ok(LlmType::HuggingFace));
        assert_eq!("OPENAI".parse::<LlmType>(), Ok(LlmType::OpenAI));
        assert!("anthropic".parse::<LlmType>().is_err());
    }

    #[test]
    fn embedding_config_drops_empty_keys() {
        use clap::Parser;

        let args = Args::try_parse_from([
            "chat-relay",
            "--embedding-llm-type",
            "ollama",
            "--embedding-api-key",
            "",
        ]).unwrap();
        let config = LlmConfig::embedding_from_args(&args).unwrap();
        assert_eq!(config.llm_type, LlmType::Ollama);
        assert!(config.api_key.is_none());

        let args = Args::try_parse_from(["chat-relay", "--embedding-llm-type", "cohere"]).unwrap();
        assert!(LlmConfig::embedding_from_args(&args).is_err());
    }
}
