pub mod transport;

use rig::client::Nothing;
use rig::completion::Chat;
use rig::message::Message as RigMessage;
use rig::prelude::CompletionClient;
use rig::providers::ollama;
use tracing::error;

use crate::errors::AppError;
use crate::models::{AgentConfig, Author, ChatMessage};

pub use transport::LocalAgentTransport;

const DESCRIPTION_PREAMBLE: &str = "You write catalog descriptions for AI agents. \
                                    Reply with one short paragraph, no headings, no quotes.";
const FALLBACK_PREAMBLE: &str = "You are a helpful AI assistant. Be concise and accurate.";

/// Builds a rig [`RigMessage`] history list from session [`ChatMessage`] records.
fn to_rig_history(messages: &[ChatMessage]) -> Vec<RigMessage> {
    messages
        .iter()
        .map(|m| match &m.author {
            Author::User => RigMessage::user(&m.content),
            Author::Agent => RigMessage::assistant(&m.content),
            Author::Participant { name } => RigMessage::user(format!("{name}: {}", m.content)),
        })
        .collect()
}

/// Runs agent turns and description prompts against a local Ollama model via rig.
/// A fresh rig agent is built per call so edits to the configuration apply on the next run.
#[derive(Clone)]
pub struct OllamaAgentService {
    client: ollama::Client,
    base_url: String,
    model: String,
}

impl OllamaAgentService {
    pub fn new(base_url: &str, model: &str) -> Result<Self, AppError> {
        let client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(base_url)
            .build()
            .map_err(|e| AppError::Unexpected(format!("Failed to build Ollama client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            model: model.to_string(),
        })
    }

    /// Answers `user_message` as the configured agent, replaying `history` as context.
    pub async fn reply(
        &self,
        agent: &AgentConfig,
        history: &[ChatMessage],
        user_message: &str,
    ) -> Result<String, AppError> {
        let prompt = agent.rendered_prompt();
        let preamble = if prompt.trim().is_empty() { FALLBACK_PREAMBLE } else { prompt.as_str() };

        let mut builder = self
            .client
            .agent(&self.model)
            .preamble(preamble)
            .temperature(f64::from(agent.model_config.temperature));
        if agent.model_config.max_tokens > 0 {
            builder = builder.max_tokens(u64::from(agent.model_config.max_tokens));
        }
        let rig_agent = builder.build();

        rig_agent
            .chat(user_message, to_rig_history(history))
            .await
            .map_err(|e| self.classify(&e.to_string(), agent.name.as_str()))
    }

    pub async fn generate_description(&self, seed: &str) -> Result<String, AppError> {
        let rig_agent = self.client.agent(&self.model).preamble(DESCRIPTION_PREAMBLE).build();
        let request = if seed.trim().is_empty() {
            "Describe a general-purpose assistant agent.".to_string()
        } else {
            format!("Write a description for an agent based on: {seed}")
        };

        let description = rig_agent
            .chat(request.as_str(), Vec::new())
            .await
            .map_err(|e| match self.classify(&e.to_string(), "description") {
                AppError::Unexpected(message) => AppError::GenerationFailed { message },
                other => other,
            })?;
        Ok(description.trim().to_string())
    }

    fn classify(&self, msg: &str, context: &str) -> AppError {
        error!("Ollama inference failed for {context}: {msg}");
        if msg.contains("Connection refused") || msg.contains("connect") {
            AppError::OllamaUnavailable { host: self.base_url.clone() }
        } else if msg.contains("model") {
            AppError::ModelNotFound { model_name: self.model.clone() }
        } else {
            AppError::Unexpected(msg.to_string())
        }
    }
}
