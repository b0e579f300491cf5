use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::sync::Arc;
use log::{ info, warn };

/// Placeholder replaced with retrieved context in every persona prompt.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

#[derive(Debug)]
pub enum PersonaError {
    NoCategories,
    EmptyModel(usize),
    DuplicateModel(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PersonaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonaError::NoCategories => write!(f, "At least one model category is required"),
            PersonaError::EmptyModel(i) => write!(f, "Model category #{} has no model identifier", i),
            PersonaError::DuplicateModel(m) => write!(f, "Model '{}' is declared more than once", m),
            PersonaError::IoError(e) => write!(f, "Persona file IO error: {}", e),
            PersonaError::JsonError(e) => write!(f, "Persona JSON parsing error: {}", e),
        }
    }
}

impl Error for PersonaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PersonaError::IoError(e) => Some(e),
            PersonaError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PersonaError {
    fn from(err: std::io::Error) -> Self {
        PersonaError::IoError(err)
    }
}

impl From<serde_json::Error> for PersonaError {
    fn from(err: serde_json::Error) -> Self {
        PersonaError::JsonError(err)
    }
}

/// An upstream model and the kind of question it should answer.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ModelCategory {
    pub model: String,
    pub description: String,
    /// Overrides the shared system prompt when this model answers.
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl ModelCategory {
    /// Human-readable name for logs, falling back to the model id.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.model)
    }
}

/// System prompts and model categories. Loaded once and shared read-only.
#[derive(Deserialize, Debug, Clone)]
pub struct PersonaConfig {
    pub system_prompt: String,
    pub categories: Vec<ModelCategory>,
}

impl PersonaConfig {
    pub fn validate(&self) -> Result<(), PersonaError> {
        if self.categories.is_empty() {
            return Err(PersonaError::NoCategories);
        }
        for (i, category) in self.categories.iter().enumerate() {
            if category.model.trim().is_empty() {
                return Err(PersonaError::EmptyModel(i));
            }
            if self.categories[..i].iter().any(|c| c.model == category.model) {
                return Err(PersonaError::DuplicateModel(category.model.clone()));
            }
        }

        let templates = std::iter
            ::once(&self.system_prompt)
            .chain(self.categories.iter().filter_map(|c| c.persona.as_ref()));
        for template in templates {
            if !template.contains(CONTEXT_PLACEHOLDER) {
                warn!(
                    "Persona prompt has no {} placeholder; retrieved context will be dropped",
                    CONTEXT_PLACEHOLDER
                );
            }
        }
        Ok(())
    }

    pub fn category(&self, model: &str) -> Option<&ModelCategory> {
        self.categories.iter().find(|c| c.model == model)
    }

    /// The system message text for `model`, with `context` filled in.
    pub fn system_prompt_for(&self, model: &str, context: &str) -> String {
        let template = self
            .category(model)
            .and_then(|c| c.persona.as_deref())
            .unwrap_or(&self.system_prompt);
        template.replace(CONTEXT_PLACEHOLDER, context)
    }
}

impl Default for PersonaConfig {
    fn default() -> Self {
        let support = "You are an intelligent and friendly customer support assistant for Headstarter, a platform that facilitates AI-powered interviews for software engineering job candidates. Provide clear, helpful and concise answers in a professional and supportive tone. Guide users through troubleshooting steps and escalate unresolved issues to human support when necessary.";
        let context_block = "\n\nUse the following context when it is relevant:\n{context}";

        Self {
            system_prompt: format!("{}{}", support, context_block),
            categories: vec![
                ModelCategory {
                    model: "meta-llama/llama-3.1-8b-instruct:free".to_string(),
                    description: "General conversation, questions about the platform, accounts, interviews, scheduling and everyday support requests.".to_string(),
                    persona: Some(
                        format!("{} You are Lani the Llama, warm and upbeat.{}", support, context_block)
                    ),
                    display_name: Some("Lani the Llama".to_string()),
                },
                ModelCategory {
                    model: "openchat/openchat-7b:free".to_string(),
                    description: "Technical questions about programming, software engineering, algorithms, data structures, debugging code and coding interview practice.".to_string(),
                    persona: Some(
                        format!("{} You are Byte the Tech Owl, precise and fond of short code examples.{}", support, context_block)
                    ),
                    display_name: Some("Byte the Tech Owl".to_string()),
                },
                ModelCategory {
                    model: "gryphe/mythomist-7b:free".to_string(),
                    description: "Creative writing, storytelling, brainstorming, imaginative and playful requests.".to_string(),
                    persona: Some(
                        format!("{} You are Myra the Myth Weaver, imaginative and story-driven.{}", support, context_block)
                    ),
                    display_name: Some("Myra the Myth Weaver".to_string()),
                }
            ],
        }
    }
}

/// Loads personas from `path`, or the built-in set when no path is given.
pub fn load_personas(path: Option<&str>) -> Result<Arc<PersonaConfig>, Box<dyn Error + Send + Sync>> {
    let config = match path {
        Some(path) => {
            let file_content = fs
                ::read_to_string(path)
                .map_err(|e| format!("Failed to read personas file '{}': {}", path, e))?;
            let config: PersonaConfig = serde_json
                ::from_str(&file_content)
                .map_err(|e| format!("Failed to parse personas file '{}': {}", path, e))?;
            info!("Loaded {} model categories from {}", config.categories.len(), path);
            config
        }
        None => {
            info!("No personas file configured, using built-in personas");
            PersonaConfig::default()
        }
    };
    config.validate()?;
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_personas_are_valid() {
        let config = PersonaConfig::default();
        config.validate().unwrap();
        assert_eq!(config.categories.len(), 3);
    }

    #[test]
    fn substitutes_context_into_model_persona() {
        let config = PersonaConfig {
            system_prompt: "base: {context}".into(),
            categories: vec![
                ModelCategory {
                    model: "a".into(),
                    description: "first".into(),
                    persona: Some("persona a: {context}".into()),
                    display_name: None,
                },
                ModelCategory {
                    model: "b".into(),
                    description: "second".into(),
                    persona: None,
                    display_name: None,
                }
            ],
        };
        assert_eq!(config.system_prompt_for("a", "docs"), "persona a: docs");
        assert_eq!(config.system_prompt_for("b", "docs"), "base: docs");
        assert_eq!(config.system_prompt_for("unknown", ""), "base: ");
    }

    #[test]
    fn rejects_empty_and_duplicate_categories() {
        let mut config = PersonaConfig {
            system_prompt: "{context}".into(),
            categories: Vec::new(),
        };
        assert!(matches!(config.validate(), Err(PersonaError::NoCategories)));

        let category = ModelCategory {
            model: "a".into(),
            description: "d".into(),
            persona: None,
            display_name: None,
        };
        config.categories = vec![category.clone(), category];
        assert!(matches!(config.validate(), Err(PersonaError::DuplicateModel(_))));
    }

    #[test]
    fn parses_json_file_shape() {
        let json =
            r#"{"system_prompt":"help {context}","categories":[{"model":"x","description":"anything"}]}"#;
        let config: PersonaConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.categories[0].persona, None);
        assert_eq!(config.categories[0].label(), "x");
    }

    #[test]
    fn labels_prefer_display_names() {
        let config = PersonaConfig::default();
        let labels: Vec<&str> = config.categories.iter().map(ModelCategory::label).collect();
        assert!(labels.contains(&"Byte the Tech Owl"));
    }
}
