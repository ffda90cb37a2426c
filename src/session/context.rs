use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::AppError;
use crate::models::{AgentConfig, ChatMessage};
use crate::session::events::SessionEvent;
use crate::session::form::AgentForm;

/// Stores agent configurations.
#[async_trait]
pub trait AgentPersistence: Send + Sync {
    async fn create_agent(&self, config: AgentConfig) -> Result<AgentConfig, AppError>;
    async fn update_agent(&self, id: &str, config: AgentConfig) -> Result<AgentConfig, AppError>;
}

/// Writes an agent description from a short seed text.
#[async_trait]
pub trait DescriptionGenerator: Send + Sync {
    async fn generate_description(&self, seed: &str) -> Result<String, AppError>;
}

/// The channel carrying messages between the editor and the running agent.
///
/// `connect` on an already connected transport replaces the live session only
/// once the new one is established; on failure the old session stays usable.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        session_id: &str,
        agent: AgentConfig,
        inbound: InboundSink,
    ) -> Result<(), AppError>;

    async fn disconnect(&self);

    async fn send(&self, message: ChatMessage) -> Result<(), AppError>;

    /// Best effort: the agent may still deliver a reply afterwards.
    async fn request_cancel(&self, message_id: &str) -> Result<(), AppError>;
}

/// Where a transport delivers inbound messages for one connection.
#[derive(Debug, Clone)]
pub struct InboundSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl InboundSink {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { epoch, tx }
    }

    /// Returns `false` once the owning session is gone.
    pub fn deliver(&self, message: ChatMessage) -> bool {
        self.tx
            .send(SessionEvent::Inbound { epoch: self.epoch, message })
            .is_ok()
    }
}

/// Everything a session controller is wired to, handed over at construction.
pub struct SessionContext {
    pub session_id: String,
    pub form: AgentForm,
    pub transport: Arc<dyn Transport>,
    pub persistence: Arc<dyn AgentPersistence>,
    pub generator: Arc<dyn DescriptionGenerator>,
    pub connect_timeout: Duration,
}
