use thiserror::Error;

/// Top-level application error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Database errors ──────────────────────────────────────────────────────
    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Record not found: {entity_type} with id '{id}'")]
    RecordNotFound { entity_type: String, id: String },

    // ── AI Agent errors ──────────────────────────────────────────────────────
    #[error("Ollama service unavailable at {host}")]
    OllamaUnavailable { host: String },

    #[error("Model '{model_name}' not found in Ollama")]
    ModelNotFound { model_name: String },

    #[error("Description generation failed: {message}")]
    GenerationFailed { message: String },

    // ── Transport errors ─────────────────────────────────────────────────────
    #[error("Connecting session '{session_id}' failed: {message}")]
    ConnectFailed { session_id: String, message: String },

    #[error("Connecting session '{session_id}' timed out after {seconds}s")]
    ConnectTimedOut { session_id: String, seconds: u64 },

    #[error("Sending message '{message_id}' failed: {message}")]
    SendFailed { message_id: String, message: String },

    #[error("Session is not connected")]
    NotConnected,

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    #[error("Field '{field_name}' is out of range: {message}")]
    OutOfRange { field_name: String, message: String },

    #[error("Variable key '{key}' is used more than once")]
    DuplicateVariable { key: String },

    #[error("No variable row at index {index} (rows: {len})")]
    VariableIndex { index: usize, len: usize },

    // ── Icon errors ──────────────────────────────────────────────────────────
    #[error("Icon '{file_name}' rejected: {message}")]
    InvalidIcon { file_name: String, message: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Coarse error family, used to pick the user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transport,
    Persistence,
    Generation,
    System,
}

impl AppError {
    pub fn db_query(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseQueryFailed { message: message.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::RecordNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. }
                | AppError::FieldTooLong { .. }
                | AppError::OutOfRange { .. }
                | AppError::DuplicateVariable { .. }
                | AppError::VariableIndex { .. }
                | AppError::InvalidIcon { .. }
        )
    }

    pub fn is_agent_unavailable(&self) -> bool {
        matches!(self, AppError::OllamaUnavailable { .. } | AppError::ModelNotFound { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            e if e.is_validation() => ErrorKind::Validation,
            AppError::DatabaseQueryFailed { .. } | AppError::RecordNotFound { .. } => {
                ErrorKind::Persistence
            }
            AppError::ConnectFailed { .. }
            | AppError::ConnectTimedOut { .. }
            | AppError::SendFailed { .. }
            | AppError::NotConnected => ErrorKind::Transport,
            AppError::OllamaUnavailable { .. }
            | AppError::ModelNotFound { .. }
            | AppError::GenerationFailed { .. } => ErrorKind::Generation,
            _ => ErrorKind::System,
        }
    }
}
