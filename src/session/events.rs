use serde::Serialize;
use tokio::sync::mpsc;

use crate::errors::{AppError, ErrorKind};
use crate::models::{AgentConfig, ChatMessage};
use crate::session::state::{ReceiveView, RunState};

/// Results of asynchronous collaborator calls, applied back on the owning task.
#[derive(Debug)]
pub enum SessionEvent {
    Connected { attempt: u64 },
    ConnectFailed { attempt: u64, error: AppError },
    Inbound { epoch: u64, message: ChatMessage },
    SendFailed { operation: u64, error: AppError },
    CancelFailed { operation: u64, error: AppError },
    Saved { request: u64, submitted: AgentConfig, saved: AgentConfig },
    SaveFailed { request: u64, error: AppError },
    DescriptionGenerated { request: u64, description: String },
    DescriptionFailed { request: u64, error: AppError },
}

/// Receiving half of a controller's event queue.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

/// A user-visible message produced by the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NotificationLevel::Success, kind: None, message: message.into() }
    }

    pub fn warning(error: &AppError, context: &str) -> Self {
        Self {
            level: NotificationLevel::Warning,
            kind: Some(error.kind()),
            message: format!("{context}: {error}"),
        }
    }

    pub fn error(error: &AppError, context: &str) -> Self {
        Self {
            level: NotificationLevel::Error,
            kind: Some(error.kind()),
            message: format!("{context}: {error}"),
        }
    }
}

/// Read-only state handed to the rendering layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub run_state: RunState,
    pub is_connecting: bool,
    pub is_receiving: bool,
    pub is_dirty: bool,
    pub is_saving: bool,
    pub is_generating: bool,
    pub block_input: bool,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receive: Option<ReceiveView>,
    pub agent: AgentConfig,
}
