use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::LocalAgentTransport;
use crate::models::{AgentConfig, ChatMessage, WsCommand};
use crate::routes::api_routes::error_response;
use crate::routes::AppState;
use crate::session::{
    AgentForm, BlockReason, Notification, SendOutcome, SessionContext, SessionController,
    SessionSnapshot,
};

#[derive(Debug, Deserialize)]
pub struct SessionParams {
    pub agent_id: Option<String>,
}

/// Server → editor frames on the session socket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    Snapshot { session: SessionSnapshot },
    Notification { notification: Notification },
    Blocked { reason: BlockReason },
    Error { message: String },
}

type WsSink = SplitSink<WebSocket, Message>;

/// GET `/ws/agents/session` — upgrades to a WebSocket hosting one editor session.
pub async fn ws_session_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SessionParams>,
    State(state): State<AppState>,
) -> Response {
    let agent = match params.agent_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => match state.agents.get_agent(id).await {
            Ok(agent) => agent,
            Err(e) => return error_response(&e),
        },
        None => AgentConfig::default(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, agent))
}

/// Handles a single editor session.
///
/// Protocol:
/// - Client sends JSON commands tagged by `type` (`start`, `send_message`, `save`, …)
/// - After every command or collaborator result the server sends a `snapshot`,
///   followed by any `notification`s; rejected sends also yield `blocked`.
async fn handle_socket(socket: WebSocket, state: AppState, agent: AgentConfig) {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!("Session {session_id} opened for agent {:?}", agent.id);

    let service = Arc::new(state.agents.clone());
    let ctx = SessionContext {
        session_id: session_id.clone(),
        form: AgentForm::new(agent),
        transport: Arc::new(LocalAgentTransport::new(state.agents.agent().clone())),
        persistence: service.clone(),
        generator: service,
        connect_timeout: state.connect_timeout,
    };
    let (mut controller, mut events) = SessionController::new(ctx);
    let (mut sink, mut stream) = socket.split();

    if publish(&mut sink, &mut controller, None).await.is_err() {
        controller.shutdown().await;
        return;
    }

    loop {
        let extra = tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(t))) => t.to_string(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Session {session_id}: receive error: {e}");
                        break;
                    }
                };
                match serde_json::from_str::<WsCommand>(&text) {
                    Ok(command) => handle_command(&mut controller, command),
                    Err(e) => Some(WsEvent::Error { message: format!("Invalid command: {e}") }),
                }
            }
            Some(event) = events.recv() => {
                controller.apply(event);
                None
            }
        };

        if publish(&mut sink, &mut controller, extra).await.is_err() {
            warn!("Session {session_id}: client went away");
            break;
        }
    }

    controller.shutdown().await;
}

/// Applies one editor intent; returns an extra frame to send, if any.
fn handle_command(controller: &mut SessionController, command: WsCommand) -> Option<WsEvent> {
    let edited = match command {
        WsCommand::Start => {
            controller.start_or_restart();
            Ok(())
        }
        WsCommand::SendMessage { content } => {
            return match controller.send_message(ChatMessage::user(content)) {
                SendOutcome::Accepted { .. } => None,
                SendOutcome::Blocked(reason) => Some(WsEvent::Blocked { reason }),
            };
        }
        WsCommand::CancelReceive => {
            controller.cancel_receive();
            Ok(())
        }
        WsCommand::Save => {
            controller.save_configuration();
            Ok(())
        }
        WsCommand::GenerateDescription => {
            controller.generate_description();
            Ok(())
        }
        WsCommand::CancelGeneration => {
            controller.cancel_generation();
            Ok(())
        }
        WsCommand::SetIcon { file_name, data } => {
            controller.set_icon(&file_name, &data);
            Ok(())
        }
        WsCommand::UpdateForm { agent } => {
            controller.form_mut().replace(agent);
            Ok(())
        }
        WsCommand::AddVariable => {
            controller.form_mut().variables_mut().add();
            Ok(())
        }
        WsCommand::RenameVariable { index, key } => {
            controller.form_mut().variables_mut().rename_key(index, key)
        }
        WsCommand::SetVariableValue { index, value } => {
            controller.form_mut().variables_mut().set_value(index, value)
        }
        WsCommand::RemoveVariable { index } => {
            controller.form_mut().variables_mut().remove(index).map(|_| ())
        }
    };
    edited.err().map(|e| WsEvent::Error { message: e.to_string() })
}

async fn publish(
    sink: &mut WsSink,
    controller: &mut SessionController,
    extra: Option<WsEvent>,
) -> Result<(), axum::Error> {
    if let Some(event) = extra {
        send_event(sink, &event).await?;
    }
    send_event(sink, &WsEvent::Snapshot { session: controller.snapshot() }).await?;
    for notification in controller.take_notifications() {
        send_event(sink, &WsEvent::Notification { notification }).await?;
    }
    Ok(())
}

/// Helper: serialize a `WsEvent` and send it over the socket.
async fn send_event(sink: &mut WsSink, event: &WsEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!("Failed to encode session event: {e}");
            Ok(())
        }
    }
}
