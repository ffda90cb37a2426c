use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::models::{Author, ChatMessage};

/// Lifecycle of the agent's live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Connecting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveStatus {
    Pending,
    Completed,
    Cancelled,
    /// The outbound send never reached the transport.
    Failed,
}

/// The agent's in-progress answer to the most recently sent message.
#[derive(Debug, Clone)]
pub struct ReceiveOperation {
    pub id: u64,
    pub target_message_id: String,
    pub status: ReceiveStatus,
    cancel: CancellationToken,
}

impl ReceiveOperation {
    pub fn new(id: u64, target_message_id: impl Into<String>) -> Self {
        Self {
            id,
            target_message_id: target_message_id.into(),
            status: ReceiveStatus::Pending,
            cancel: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// An agent message replying to our target settles this operation.
    pub fn is_answered_by(&self, message: &ChatMessage) -> bool {
        message.author == Author::Agent
            && message.reply_to.as_deref() == Some(self.target_message_id.as_str())
    }

    pub(crate) fn settle(mut self, status: ReceiveStatus) -> Self {
        if status == ReceiveStatus::Cancelled {
            self.cancel.cancel();
        }
        self.status = status;
        self
    }
}

/// Read-only view of a receive operation for the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiveView {
    pub id: u64,
    pub target_message_id: String,
    pub status: ReceiveStatus,
}

impl From<&ReceiveOperation> for ReceiveView {
    fn from(op: &ReceiveOperation) -> Self {
        Self {
            id: op.id,
            target_message_id: op.target_message_id.clone(),
            status: op.status,
        }
    }
}

/// Chronological, append-only record of the conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    entries: Vec<ChatMessage>,
}

impl ConversationLog {
    pub fn append(&mut self, message: ChatMessage) {
        self.entries.push(message);
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts the log over for a freshly established session.
    pub(crate) fn begin_new_session(&mut self) {
        self.entries.clear();
    }
}
