use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::agent::OllamaAgentService;
use crate::errors::AppError;
use crate::models::{AgentConfig, ChatMessage};
use crate::session::{InboundSink, Transport};

type History = Arc<Mutex<Vec<ChatMessage>>>;

struct LiveSession {
    session_id: String,
    agent: AgentConfig,
    inbound: InboundSink,
    history: History,
    in_flight: HashMap<String, AbortHandle>,
}

impl LiveSession {
    fn abort_all(&mut self) {
        for (message_id, handle) in self.in_flight.drain() {
            debug!("Aborting reply to {message_id}");
            handle.abort();
        }
    }
}

/// In-process transport: the "remote" agent is an Ollama call made on this server.
///
/// Each sent message spawns one reply generation; its result comes back
/// through the session's inbound sink, tagged with `reply_to`.
pub struct LocalAgentTransport {
    service: OllamaAgentService,
    live: Mutex<Option<LiveSession>>,
}

impl LocalAgentTransport {
    pub fn new(service: OllamaAgentService) -> Self {
        Self { service, live: Mutex::new(None) }
    }

    fn live(&self) -> MutexGuard<'_, Option<LiveSession>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a reply task registered while `send` awaits it. Dropping the guard,
/// including when the `send` future itself is dropped, aborts the task and
/// forgets its entry.
struct InFlightReply<'a> {
    transport: &'a LocalAgentTransport,
    message_id: String,
    handle: AbortHandle,
}

impl<'a> InFlightReply<'a> {
    fn register(transport: &'a LocalAgentTransport, message_id: &str, handle: AbortHandle) -> Self {
        if let Some(live) = transport.live().as_mut() {
            live.in_flight.insert(message_id.to_string(), handle.clone());
        }
        Self { transport, message_id: message_id.to_string(), handle }
    }
}

impl Drop for InFlightReply<'_> {
    fn drop(&mut self) {
        self.handle.abort();
        if let Some(live) = self.transport.live().as_mut() {
            live.in_flight.remove(&self.message_id);
        }
    }
}

fn snapshot(history: &History) -> Vec<ChatMessage> {
    history.lock().map(|h| h.clone()).unwrap_or_default()
}

#[async_trait]
impl Transport for LocalAgentTransport {
    async fn connect(
        &self,
        session_id: &str,
        agent: AgentConfig,
        inbound: InboundSink,
    ) -> Result<(), AppError> {
        agent.validate().map_err(|e| AppError::ConnectFailed {
            session_id: session_id.to_string(),
            message: e.to_string(),
        })?;

        let session = LiveSession {
            session_id: session_id.to_string(),
            agent,
            inbound,
            history: History::default(),
            in_flight: HashMap::new(),
        };
        if let Some(mut previous) = self.live().replace(session) {
            previous.abort_all();
        }
        info!("Agent session {session_id} connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(mut session) = self.live().take() {
            session.abort_all();
            info!("Agent session {} disconnected", session.session_id);
        }
    }

    async fn send(&self, message: ChatMessage) -> Result<(), AppError> {
        let (agent, history, inbound) = {
            let guard = self.live();
            let live = guard.as_ref().ok_or(AppError::NotConnected)?;
            (live.agent.clone(), live.history.clone(), live.inbound.clone())
        };

        let service = self.service.clone();
        let context = snapshot(&history);
        let content = message.content.clone();
        let handle = tokio::spawn(async move { service.reply(&agent, &context, &content).await });
        let in_flight = InFlightReply::register(self, &message.id, handle.abort_handle());

        let outcome = handle.await;
        drop(in_flight);

        match outcome {
            Ok(Ok(text)) => {
                let reply = ChatMessage::agent_reply(&message.id, text);
                if let Ok(mut h) = history.lock() {
                    h.push(message);
                    h.push(reply.clone());
                }
                if !inbound.deliver(reply) {
                    debug!("Reply dropped, session already closed");
                }
                Ok(())
            }
            Ok(Err(e)) => Err(AppError::SendFailed { message_id: message.id, message: e.to_string() }),
            Err(e) if e.is_cancelled() => {
                debug!("Reply to {} cancelled", message.id);
                Ok(())
            }
            Err(e) => {
                warn!("Reply task for {} failed: {e}", message.id);
                Err(AppError::SendFailed {
                    message_id: message.id,
                    message: "reply task failed".to_string(),
                })
            }
        }
    }

    async fn request_cancel(&self, message_id: &str) -> Result<(), AppError> {
        let mut guard = self.live();
        let live = guard.as_mut().ok_or(AppError::NotConnected)?;
        match live.in_flight.remove(message_id) {
            Some(handle) => {
                handle.abort();
                info!("Cancelled reply to {message_id}");
            }
            None => debug!("No reply in flight for {message_id}"),
        }
        Ok(())
    }
}
