use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::AppError;

pub const MAX_NAME_LENGTH: usize = 64;
pub const MAX_PROMPT_LENGTH: usize = 8000;
pub const MAX_TOKENS_LIMIT: u32 = 16000;

// ── Agent configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    #[default]
    Chat,
    TextGeneration,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Chat => "chat",
            AgentType::TextGeneration => "text_generation",
        }
    }
}

impl TryFrom<String> for AgentType {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "chat" => Ok(AgentType::Chat),
            "text_generation" => Ok(AgentType::TextGeneration),
            other => Err(format!("Unknown agent type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgentModel {
    #[default]
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "gpt-3.5-turbo-16k")]
    Gpt35Turbo16k,
    #[serde(rename = "gpt-4")]
    Gpt4,
}

impl AgentModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentModel::Gpt35Turbo => "gpt-3.5-turbo",
            AgentModel::Gpt35Turbo16k => "gpt-3.5-turbo-16k",
            AgentModel::Gpt4 => "gpt-4",
        }
    }
}

impl std::fmt::Display for AgentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for AgentModel {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "gpt-3.5-turbo" => Ok(AgentModel::Gpt35Turbo),
            "gpt-3.5-turbo-16k" => Ok(AgentModel::Gpt35Turbo16k),
            "gpt-4" => Ok(AgentModel::Gpt4),
            other => Err(format!("Unknown model: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { max_tokens: 1024, temperature: 0.7 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub key: String,
    pub value: String,
}

/// Ordered key/value rows backing the prompt variables.
///
/// The list always holds at least one row: removing the last row leaves a
/// single empty one behind, so editors never have to re-create it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Variable>", into = "Vec<Variable>")]
pub struct VariableList {
    rows: Vec<Variable>,
}

impl Default for VariableList {
    fn default() -> Self {
        Self { rows: vec![Variable::default()] }
    }
}

impl From<Vec<Variable>> for VariableList {
    fn from(rows: Vec<Variable>) -> Self {
        if rows.is_empty() {
            Self::default()
        } else {
            Self { rows }
        }
    }
}

impl From<VariableList> for Vec<Variable> {
    fn from(list: VariableList) -> Self {
        list.rows
    }
}

impl VariableList {
    pub fn rows(&self) -> &[Variable] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Appends an empty row and returns its index.
    pub fn add(&mut self) -> usize {
        self.rows.push(Variable::default());
        self.rows.len() - 1
    }

    pub fn rename_key(&mut self, index: usize, key: impl Into<String>) -> Result<(), AppError> {
        self.row_mut(index)?.key = key.into();
        Ok(())
    }

    pub fn set_value(&mut self, index: usize, value: impl Into<String>) -> Result<(), AppError> {
        self.row_mut(index)?.value = value.into();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Variable, AppError> {
        if index >= self.rows.len() {
            return Err(AppError::VariableIndex { index, len: self.rows.len() });
        }
        let removed = self.rows.remove(index);
        if self.rows.is_empty() {
            self.rows.push(Variable::default());
        }
        Ok(removed)
    }

    /// Non-empty trimmed keys with their values, in row order.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rows
            .iter()
            .map(|v| (v.key.trim(), v.value.as_str()))
            .filter(|(key, _)| !key.is_empty())
    }

    fn row_mut(&mut self, index: usize) -> Result<&mut Variable, AppError> {
        let len = self.rows.len();
        self.rows.get_mut(index).ok_or(AppError::VariableIndex { index, len })
    }
}

/// Everything the editor form binds to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// `None` until the agent has been persisted once.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub agent_type: AgentType,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub variables: VariableList,
    #[serde(default)]
    pub model: AgentModel,
    #[serde(default)]
    pub model_config: ModelConfig,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

impl AgentConfig {
    /// Rejects malformed configurations before they reach any collaborator.
    pub fn validate(&self) -> Result<(), AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::EmptyField { field_name: "name".to_string() });
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "name".to_string(),
                max_length: MAX_NAME_LENGTH,
                actual_length: name.chars().count(),
            });
        }
        if self.prompt.chars().count() > MAX_PROMPT_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "prompt".to_string(),
                max_length: MAX_PROMPT_LENGTH,
                actual_length: self.prompt.chars().count(),
            });
        }
        if self.model_config.max_tokens > MAX_TOKENS_LIMIT {
            return Err(AppError::OutOfRange {
                field_name: "model_config.max_tokens".to_string(),
                message: format!("must be at most {MAX_TOKENS_LIMIT}"),
            });
        }
        let temperature = self.model_config.temperature;
        if !(0.0..=1.0).contains(&temperature) {
            return Err(AppError::OutOfRange {
                field_name: "model_config.temperature".to_string(),
                message: format!("{temperature} is not within 0.0..=1.0"),
            });
        }
        if !self.icon.is_empty() && !self.icon.starts_with("data:") {
            return Err(AppError::OutOfRange {
                field_name: "icon".to_string(),
                message: "expected a data URL".to_string(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for (key, _) in self.variables.bindings() {
            if !seen.insert(key) {
                return Err(AppError::DuplicateVariable { key: key.to_string() });
            }
        }
        Ok(())
    }

    /// The prompt with `{{key}}` placeholders substituted from the variables.
    pub fn rendered_prompt(&self) -> String {
        self.variables
            .bindings()
            .fold(self.prompt.clone(), |prompt, (key, value)| {
                prompt.replace(&format!("{{{{{key}}}}}"), value)
            })
    }
}

/// A persisted agent as listed in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub cover: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateDescriptionRequest {
    #[serde(default)]
    pub seed: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateDescriptionResponse {
    pub description: String,
}

// ── Chat ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Author {
    User,
    Agent,
    Participant { name: String },
}

/// One conversation turn. Never mutated once appended to a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub author: Author,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// The user message this one answers, for agent replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl ChatMessage {
    pub fn new(author: Author, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author,
            content: content.into(),
            timestamp: Utc::now(),
            reply_to: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Author::User, content)
    }

    pub fn agent_reply(reply_to: &str, content: impl Into<String>) -> Self {
        Self { reply_to: Some(reply_to.to_string()), ..Self::new(Author::Agent, content) }
    }
}

// ── Session WebSocket protocol ────────────────────────────────────────────────

/// Intent sent by the editor over the session socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsCommand {
    Start,
    SendMessage { content: String },
    CancelReceive,
    Save,
    GenerateDescription,
    CancelGeneration,
    /// `data` is the image file's content, base64-encoded.
    SetIcon { file_name: String, data: String },
    UpdateForm { agent: AgentConfig },
    AddVariable,
    RenameVariable { index: usize, key: String },
    SetVariableValue { index: usize, value: String },
    RemoveVariable { index: usize },
}
