use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::avatar;
use crate::errors::AppError;
use crate::models::ChatMessage;
use crate::session::context::{InboundSink, SessionContext};
use crate::session::events::{Notification, SessionEvent, SessionEvents, SessionSnapshot};
use crate::session::form::AgentForm;
use crate::session::state::{
    ConversationLog, ReceiveOperation, ReceiveStatus, ReceiveView, RunState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    Restarting,
    /// A connection attempt is already outstanding; nothing new was spawned.
    AlreadyConnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    NotRunning,
    Dirty,
    Receiving,
    EmptyContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted { operation: u64 },
    Blocked(BlockReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Dispatched,
    AlreadySaving,
    Invalid,
}

#[derive(Debug, Clone, Copy)]
struct ConnectAttempt {
    id: u64,
    previous: RunState,
}

#[derive(Debug)]
struct Background {
    id: u64,
    cancel: CancellationToken,
}

/// Owns the run lifecycle, the conversation log and the single in-flight receive.
///
/// Every method runs to completion on the owning task. Collaborator calls are
/// spawned and report back as [`SessionEvent`]s, which the owner feeds to
/// [`SessionController::apply`] in arrival order.
pub struct SessionController {
    ctx: SessionContext,
    events: mpsc::UnboundedSender<SessionEvent>,
    next_id: u64,
    run_state: RunState,
    connecting: Option<ConnectAttempt>,
    live_epoch: Option<u64>,
    log: ConversationLog,
    pending: Option<ReceiveOperation>,
    last_receive: Option<ReceiveOperation>,
    saving: Option<u64>,
    generating: Option<Background>,
    notifications: VecDeque<Notification>,
}

impl SessionController {
    pub fn new(ctx: SessionContext) -> (Self, SessionEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Self {
            ctx,
            events: tx,
            next_id: 0,
            run_state: RunState::Idle,
            connecting: None,
            live_epoch: None,
            log: ConversationLog::default(),
            pending: None,
            last_receive: None,
            saving: None,
            generating: None,
            notifications: VecDeque::new(),
        };
        (controller, SessionEvents::new(rx))
    }

    // ── Read side ─────────────────────────────────────────────────────────────

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.is_some()
    }

    pub fn is_receiving(&self) -> bool {
        self.pending.is_some()
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn form(&self) -> &AgentForm {
        &self.ctx.form
    }

    pub fn form_mut(&mut self) -> &mut AgentForm {
        &mut self.ctx.form
    }

    /// The pending operation, or else the most recently settled one.
    pub fn receive(&self) -> Option<&ReceiveOperation> {
        self.pending.as_ref().or(self.last_receive.as_ref())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let is_dirty = self.ctx.form.is_dirty();
        SessionSnapshot {
            run_state: self.run_state,
            is_connecting: self.is_connecting(),
            is_receiving: self.is_receiving(),
            is_dirty,
            is_saving: self.saving.is_some(),
            is_generating: self.generating.is_some(),
            block_input: is_dirty || self.run_state != RunState::Running,
            messages: self.log.entries().to_vec(),
            receive: self.receive().map(ReceiveView::from),
            agent: self.ctx.form.current().clone(),
        }
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    // ── Intents ───────────────────────────────────────────────────────────────

    pub fn start_or_restart(&mut self) -> StartOutcome {
        if self.connecting.is_some() {
            debug!("Session {}: start ignored, already connecting", self.ctx.session_id);
            return StartOutcome::AlreadyConnecting;
        }

        let previous = self.run_state;
        let restart = previous == RunState::Running;
        if restart && self.cancel_receive() {
            info!("Session {}: restart cancelled the pending receive", self.ctx.session_id);
        }

        let attempt = self.allocate_id();
        self.connecting = Some(ConnectAttempt { id: attempt, previous });
        self.run_state = RunState::Connecting;
        info!("Session {}: connect attempt {attempt} (restart: {restart})", self.ctx.session_id);

        let transport = self.ctx.transport.clone();
        let session_id = self.ctx.session_id.clone();
        let agent = self.ctx.form.current().clone();
        let sink = InboundSink::new(attempt, self.events.clone());
        let timeout = self.ctx.connect_timeout;
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, transport.connect(&session_id, agent, sink))
                .await
                .unwrap_or_else(|_| {
                    Err(AppError::ConnectTimedOut {
                        session_id: session_id.clone(),
                        seconds: timeout.as_secs(),
                    })
                });
            let event = match result {
                Ok(()) => SessionEvent::Connected { attempt },
                Err(error) => SessionEvent::ConnectFailed { attempt, error },
            };
            let _ = events.send(event);
        });

        if restart {
            StartOutcome::Restarting
        } else {
            StartOutcome::Started
        }
    }

    pub fn send_message(&mut self, message: ChatMessage) -> SendOutcome {
        let blocked = if self.run_state != RunState::Running {
            Some(BlockReason::NotRunning)
        } else if self.pending.is_some() {
            Some(BlockReason::Receiving)
        } else if self.ctx.form.is_dirty() {
            Some(BlockReason::Dirty)
        } else if message.content.trim().is_empty() {
            Some(BlockReason::EmptyContent)
        } else {
            None
        };
        if let Some(reason) = blocked {
            debug!("Session {}: send blocked ({reason:?})", self.ctx.session_id);
            return SendOutcome::Blocked(reason);
        }

        let operation = self.allocate_id();
        let op = ReceiveOperation::new(operation, message.id.clone());
        let token = op.token();
        self.log.append(message.clone());
        self.pending = Some(op);
        debug!("Session {}: sent {} (receive {operation})", self.ctx.session_id, message.id);

        let transport = self.ctx.transport.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = transport.send(message) => {
                    if let Err(error) = result {
                        let _ = events.send(SessionEvent::SendFailed { operation, error });
                    }
                }
            }
        });

        SendOutcome::Accepted { operation }
    }

    /// Settles the pending receive as cancelled and asks the transport to stop
    /// the reply. Returns `false` when nothing was pending.
    pub fn cancel_receive(&mut self) -> bool {
        let Some(op) = self.pending.take() else {
            return false;
        };
        let operation = op.id;
        let target = op.target_message_id.clone();
        self.last_receive = Some(op.settle(ReceiveStatus::Cancelled));
        info!("Session {}: receive {operation} cancelled", self.ctx.session_id);

        let transport = self.ctx.transport.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(error) = transport.request_cancel(&target).await {
                let _ = events.send(SessionEvent::CancelFailed { operation, error });
            }
        });
        true
    }

    pub fn save_configuration(&mut self) -> SaveOutcome {
        if self.saving.is_some() {
            return SaveOutcome::AlreadySaving;
        }
        let submitted = self.ctx.form.current().clone();
        if let Err(error) = submitted.validate() {
            self.notifications.push_back(Notification::error(&error, "Invalid agent"));
            return SaveOutcome::Invalid;
        }

        let request = self.allocate_id();
        self.saving = Some(request);

        let persistence = self.ctx.persistence.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match submitted.id.clone() {
                Some(id) => persistence.update_agent(&id, submitted.clone()).await,
                None => persistence.create_agent(submitted.clone()).await,
            };
            let event = match result {
                Ok(saved) => SessionEvent::Saved { request, submitted, saved },
                Err(error) => SessionEvent::SaveFailed { request, error },
            };
            let _ = events.send(event);
        });
        SaveOutcome::Dispatched
    }

    /// Returns `false` while a generation is already running.
    pub fn generate_description(&mut self) -> bool {
        if self.generating.is_some() {
            return false;
        }
        let request = self.allocate_id();
        let cancel = CancellationToken::new();
        self.generating = Some(Background { id: request, cancel: cancel.clone() });

        let seed = self.ctx.form.current().description.clone();
        let generator = self.ctx.generator.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = generator.generate_description(&seed) => {
                    let event = match result {
                        Ok(description) => SessionEvent::DescriptionGenerated { request, description },
                        Err(error) => SessionEvent::DescriptionFailed { request, error },
                    };
                    let _ = events.send(event);
                }
            }
        });
        true
    }

    pub fn cancel_generation(&mut self) -> bool {
        match self.generating.take() {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stores an uploaded image as the form's icon. A rejected upload only
    /// notifies and leaves the form as it was.
    pub fn set_icon(&mut self, file_name: &str, data: &str) -> bool {
        match avatar::icon_from_upload(file_name, data) {
            Ok(data_url) => {
                self.ctx.form.edit(|agent| agent.icon = data_url);
                true
            }
            Err(error) => {
                warn!("Session {}: icon upload rejected: {error}", self.ctx.session_id);
                self.notifications.push_back(Notification::error(&error, "Upload failed"));
                false
            }
        }
    }

    /// Cancels outstanding work and tears the transport session down.
    pub async fn shutdown(mut self) {
        if let Some(op) = self.pending.take() {
            op.settle(ReceiveStatus::Cancelled);
        }
        if let Some(task) = self.generating.take() {
            task.cancel.cancel();
        }
        if self.live_epoch.is_some() || self.connecting.is_some() {
            self.ctx.transport.disconnect().await;
        }
        info!("Session {} closed", self.ctx.session_id);
    }

    // ── Collaborator results ─────────────────────────────────────────────────

    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { attempt } => self.on_connected(attempt),
            SessionEvent::ConnectFailed { attempt, error } => self.on_connect_failed(attempt, error),
            SessionEvent::Inbound { epoch, message } => self.on_transport_message(epoch, message),
            SessionEvent::SendFailed { operation, error } => self.on_send_failed(operation, error),
            SessionEvent::CancelFailed { operation, error } => {
                warn!("Session {}: cancel of receive {operation} failed: {error}", self.ctx.session_id);
                self.notifications
                    .push_back(Notification::warning(&error, "Agent may still be replying"));
            }
            SessionEvent::Saved { request, submitted, saved } => {
                if self.saving != Some(request) {
                    debug!("Session {}: stale save result {request}", self.ctx.session_id);
                    return;
                }
                self.saving = None;
                info!("Session {}: agent {:?} saved", self.ctx.session_id, saved.id);
                self.ctx.form.commit(&submitted, saved);
                self.notifications.push_back(Notification::success("Agent saved"));
            }
            SessionEvent::SaveFailed { request, error } => {
                if self.saving != Some(request) {
                    return;
                }
                self.saving = None;
                warn!("Session {}: save failed: {error}", self.ctx.session_id);
                self.notifications.push_back(Notification::error(&error, "Save failed"));
            }
            SessionEvent::DescriptionGenerated { request, description } => {
                if Self::finish(&mut self.generating, request) {
                    self.ctx.form.edit(|agent| agent.description = description);
                }
            }
            SessionEvent::DescriptionFailed { request, error } => {
                if Self::finish(&mut self.generating, request) {
                    warn!("Session {}: description generation failed: {error}", self.ctx.session_id);
                    self.notifications.push_back(Notification::error(&error, "Generate failed"));
                }
            }
        }
    }

    fn on_connected(&mut self, attempt: u64) {
        let Some(current) = self.connecting.filter(|c| c.id == attempt) else {
            debug!("Session {}: stale connect result {attempt}", self.ctx.session_id);
            return;
        };
        self.connecting = None;
        if current.previous == RunState::Running {
            self.log.begin_new_session();
        }
        self.live_epoch = Some(attempt);
        self.run_state = RunState::Running;
        info!("Session {}: running (attempt {attempt})", self.ctx.session_id);
    }

    fn on_connect_failed(&mut self, attempt: u64, error: AppError) {
        let Some(current) = self.connecting.filter(|c| c.id == attempt) else {
            debug!("Session {}: stale connect failure {attempt}", self.ctx.session_id);
            return;
        };
        self.connecting = None;
        self.run_state = current.previous;
        warn!(
            "Session {}: connect attempt {attempt} failed, back to {:?}: {error}",
            self.ctx.session_id, current.previous
        );
        self.notifications.push_back(Notification::error(&error, "Connection failed"));
    }

    fn on_transport_message(&mut self, epoch: u64, message: ChatMessage) {
        if self.live_epoch != Some(epoch) {
            debug!(
                "Session {}: dropped message {} from closed connection {epoch}",
                self.ctx.session_id, message.id
            );
            return;
        }
        let completes = self.pending.as_ref().is_some_and(|op| op.is_answered_by(&message));
        self.log.append(message);
        if completes {
            if let Some(op) = self.pending.take() {
                debug!("Session {}: receive {} completed", self.ctx.session_id, op.id);
                self.last_receive = Some(op.settle(ReceiveStatus::Completed));
            }
        }
    }

    fn on_send_failed(&mut self, operation: u64, error: AppError) {
        if self.pending.as_ref().map(|op| op.id) != Some(operation) {
            debug!("Session {}: ignoring send failure for settled {operation}", self.ctx.session_id);
            return;
        }
        if let Some(op) = self.pending.take() {
            self.last_receive = Some(op.settle(ReceiveStatus::Failed));
        }
        warn!("Session {}: send for receive {operation} failed: {error}", self.ctx.session_id);
        self.notifications.push_back(Notification::error(&error, "Message not delivered"));
    }

    fn finish(slot: &mut Option<Background>, request: u64) -> bool {
        if slot.as_ref().map(|task| task.id) == Some(request) {
            *slot = None;
            true
        } else {
            false
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::models::AgentConfig;
    use crate::session::context::{AgentPersistence, DescriptionGenerator, Transport};
    use crate::session::events::NotificationLevel;

    #[derive(Default)]
    struct FakeTransport {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        fail_connect: Mutex<bool>,
        fail_send: Mutex<bool>,
        hold_connect: Option<Arc<Notify>>,
        sink: Mutex<Option<InboundSink>>,
        sent: Mutex<Vec<ChatMessage>>,
        cancels: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn deliver(&self, message: ChatMessage) {
            let sink = self.sink.lock().unwrap().clone().expect("connected");
            assert!(sink.deliver(message));
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self, _: &str, _: AgentConfig, inbound: InboundSink) -> Result<(), AppError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.hold_connect {
                gate.notified().await;
            }
            if *self.fail_connect.lock().unwrap() {
                return Err(AppError::ConnectFailed {
                    session_id: "s1".into(),
                    message: "refused".into(),
                });
            }
            *self.sink.lock().unwrap() = Some(inbound);
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        async fn send(&self, message: ChatMessage) -> Result<(), AppError> {
            if *self.fail_send.lock().unwrap() {
                return Err(AppError::SendFailed { message_id: message.id, message: "down".into() });
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn request_cancel(&self, message_id: &str) -> Result<(), AppError> {
            self.cancels.lock().unwrap().push(message_id.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeStore {
        fail: Mutex<bool>,
        creates: AtomicUsize,
        updates: AtomicUsize,
    }

    #[async_trait]
    impl AgentPersistence for FakeStore {
        async fn create_agent(&self, config: AgentConfig) -> Result<AgentConfig, AppError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock().unwrap() {
                return Err(AppError::Unexpected("db offline".into()));
            }
            Ok(AgentConfig { id: Some("agent-1".into()), ..config })
        }

        async fn update_agent(&self, id: &str, config: AgentConfig) -> Result<AgentConfig, AppError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(AgentConfig { id: Some(id.to_string()), ..config })
        }
    }

    struct FakeGenerator {
        reply: Result<String, String>,
    }

    #[async_trait]
    impl DescriptionGenerator for FakeGenerator {
        async fn generate_description(&self, seed: &str) -> Result<String, AppError> {
            match &self.reply {
                Ok(text) => Ok(format!("{text} ({seed})")),
                Err(message) => Err(AppError::GenerationFailed { message: message.clone() }),
            }
        }
    }

    struct Harness {
        controller: SessionController,
        events: SessionEvents,
        transport: Arc<FakeTransport>,
        store: Arc<FakeStore>,
    }

    impl Harness {
        fn new(transport: FakeTransport) -> Self {
            Self::with_generator(transport, Ok("A helpful agent".into()))
        }

        fn with_generator(transport: FakeTransport, reply: Result<String, String>) -> Self {
            let transport = Arc::new(transport);
            let store = Arc::new(FakeStore::default());
            let agent = AgentConfig { name: "Helper".into(), ..AgentConfig::default() };
            let ctx = SessionContext {
                session_id: "s1".into(),
                form: AgentForm::new(agent),
                transport: transport.clone(),
                persistence: store.clone(),
                generator: Arc::new(FakeGenerator { reply }),
                connect_timeout: Duration::from_secs(5),
            };
            let (controller, events) = SessionController::new(ctx);
            Self { controller, events, transport, store }
        }

        async fn pump(&mut self) {
            let event = self.events.recv().await.expect("event");
            self.controller.apply(event);
        }

        async fn running() -> Self {
            let mut h = Self::new(FakeTransport::default());
            assert_eq!(h.controller.start_or_restart(), StartOutcome::Started);
            h.pump().await;
            assert_eq!(h.controller.run_state(), RunState::Running);
            h
        }
    }

    fn message(id: &str, content: &str) -> ChatMessage {
        ChatMessage { id: id.into(), ..ChatMessage::user(content) }
    }

    fn reply(id: &str, to: &str, content: &str) -> ChatMessage {
        ChatMessage { id: id.into(), ..ChatMessage::agent_reply(to, content) }
    }

    #[tokio::test]
    async fn idle_session_rejects_send() {
        let mut h = Harness::new(FakeTransport::default());
        let outcome = h.controller.send_message(message("m1", "hi"));

        assert_eq!(outcome, SendOutcome::Blocked(BlockReason::NotRunning));
        assert!(h.controller.log().is_empty());
        assert_eq!(h.controller.run_state(), RunState::Idle);
        assert!(h.controller.snapshot().block_input);
    }

    #[tokio::test]
    async fn send_while_running_starts_receive() {
        let mut h = Harness::running().await;
        let outcome = h.controller.send_message(message("m1", "hi"));

        assert!(matches!(outcome, SendOutcome::Accepted { .. }));
        assert_eq!(h.controller.log().len(), 1);
        assert!(h.controller.is_receiving());
        let op = h.controller.receive().unwrap();
        assert_eq!(op.target_message_id, "m1");
        assert_eq!(op.status, ReceiveStatus::Pending);
    }

    #[tokio::test]
    async fn sends_while_receiving_are_all_rejected() {
        let mut h = Harness::running().await;
        h.controller.send_message(message("m1", "hi"));

        for i in 0..5 {
            let outcome = h.controller.send_message(message(&format!("x{i}"), "again"));
            assert_eq!(outcome, SendOutcome::Blocked(BlockReason::Receiving));
        }
        assert_eq!(h.controller.log().len(), 1);
    }

    #[tokio::test]
    async fn dirty_form_and_empty_content_block_input() {
        let mut h = Harness::running().await;

        assert_eq!(
            h.controller.send_message(message("m0", "   ")),
            SendOutcome::Blocked(BlockReason::EmptyContent)
        );

        h.controller.form_mut().edit(|a| a.prompt = "changed".into());
        assert_eq!(
            h.controller.send_message(message("m1", "hi")),
            SendOutcome::Blocked(BlockReason::Dirty)
        );
        assert!(h.controller.snapshot().block_input);
        assert!(h.controller.log().is_empty());
    }

    #[tokio::test]
    async fn matching_reply_completes_receive() {
        let mut h = Harness::running().await;
        h.controller.send_message(message("m1", "hi"));

        h.transport.deliver(reply("r1", "m1", "hello"));
        h.pump().await;

        let ids: Vec<_> = h.controller.log().entries().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "r1"]);
        assert!(!h.controller.is_receiving());
        assert_eq!(h.controller.receive().unwrap().status, ReceiveStatus::Completed);
    }

    #[tokio::test]
    async fn unrelated_inbound_keeps_receive_pending() {
        let mut h = Harness::running().await;
        h.controller.send_message(message("m1", "hi"));

        h.transport.deliver(ChatMessage::new(
            crate::models::Author::Participant { name: "ana".into() },
            "me too",
        ));
        h.pump().await;

        assert_eq!(h.controller.log().len(), 2);
        assert!(h.controller.is_receiving());
    }

    #[tokio::test]
    async fn late_reply_after_cancel_is_logged_but_not_resurrected() {
        let mut h = Harness::running().await;
        h.controller.send_message(message("m1", "hi"));

        assert!(h.controller.cancel_receive());
        assert!(!h.controller.is_receiving());
        assert_eq!(h.controller.receive().unwrap().status, ReceiveStatus::Cancelled);
        assert!(!h.controller.cancel_receive());

        h.transport.deliver(reply("r1", "m1", "hello"));
        h.pump().await;

        assert_eq!(h.controller.log().len(), 2);
        assert!(!h.controller.is_receiving());
        assert_eq!(h.controller.receive().unwrap().status, ReceiveStatus::Cancelled);

        for _ in 0..10 {
            if !h.transport.cancels.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.transport.cancels.lock().unwrap().as_slice(), ["m1"]);
    }

    #[tokio::test]
    async fn stale_reply_does_not_complete_newer_receive() {
        let mut h = Harness::running().await;
        h.controller.send_message(message("m1", "hi"));
        h.controller.cancel_receive();
        h.controller.send_message(message("m2", "still there?"));

        h.transport.deliver(reply("r1", "m1", "late"));
        h.pump().await;

        assert!(h.controller.is_receiving());
        assert_eq!(h.controller.receive().unwrap().target_message_id, "m2");
    }

    #[tokio::test]
    async fn rapid_starts_make_one_connection_attempt() {
        let gate = Arc::new(Notify::new());
        let transport = FakeTransport { hold_connect: Some(gate.clone()), ..Default::default() };
        let mut h = Harness::new(transport);

        assert_eq!(h.controller.start_or_restart(), StartOutcome::Started);
        assert_eq!(h.controller.start_or_restart(), StartOutcome::AlreadyConnecting);
        assert!(h.controller.is_connecting());
        assert_eq!(h.controller.run_state(), RunState::Connecting);

        gate.notify_one();
        h.pump().await;

        assert_eq!(h.transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(h.controller.run_state(), RunState::Running);
        assert!(!h.controller.is_connecting());
    }

    #[tokio::test]
    async fn failed_start_reverts_to_idle() {
        let transport = FakeTransport { fail_connect: Mutex::new(true), ..Default::default() };
        let mut h = Harness::new(transport);

        h.controller.start_or_restart();
        h.pump().await;

        assert_eq!(h.controller.run_state(), RunState::Idle);
        assert!(!h.controller.is_connecting());
        let notes = h.controller.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].level, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn connect_timeout_clears_connecting() {
        let transport = FakeTransport { hold_connect: Some(Arc::new(Notify::new())), ..Default::default() };
        let mut h = Harness::new(transport);
        h.controller.ctx.connect_timeout = Duration::from_millis(20);

        h.controller.start_or_restart();
        h.pump().await;

        assert_eq!(h.controller.run_state(), RunState::Idle);
        assert!(!h.controller.is_connecting());
        assert_eq!(h.controller.start_or_restart(), StartOutcome::Started);
    }

    #[tokio::test]
    async fn restart_clears_log_and_cancels_receive() {
        let mut h = Harness::running().await;
        h.controller.send_message(message("m1", "hi"));

        assert_eq!(h.controller.start_or_restart(), StartOutcome::Restarting);
        assert!(!h.controller.is_receiving());
        assert_eq!(h.controller.receive().unwrap().status, ReceiveStatus::Cancelled);
        h.pump().await;

        assert_eq!(h.controller.run_state(), RunState::Running);
        assert!(h.controller.log().is_empty());
    }

    #[tokio::test]
    async fn failed_restart_still_cancels_reply_at_transport() {
        let mut h = Harness::running().await;
        h.controller.send_message(message("m1", "hi"));

        *h.transport.fail_connect.lock().unwrap() = true;
        h.controller.start_or_restart();
        h.pump().await;
        assert_eq!(h.controller.run_state(), RunState::Running);

        for _ in 0..10 {
            if !h.transport.cancels.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.transport.cancels.lock().unwrap().as_slice(), ["m1"]);
    }

    #[tokio::test]
    async fn failed_restart_keeps_running_and_log() {
        let mut h = Harness::running().await;
        h.controller.send_message(message("m1", "hi"));
        h.transport.deliver(reply("r1", "m1", "hello"));
        h.pump().await;

        *h.transport.fail_connect.lock().unwrap() = true;
        h.controller.start_or_restart();
        h.pump().await;

        assert_eq!(h.controller.run_state(), RunState::Running);
        assert_eq!(h.controller.log().len(), 2);
    }

    #[tokio::test]
    async fn messages_from_replaced_connection_are_dropped() {
        let mut h = Harness::running().await;
        let old_sink = h.transport.sink.lock().unwrap().clone().unwrap();

        h.controller.start_or_restart();
        h.pump().await;

        old_sink.deliver(reply("r0", "m0", "ghost"));
        h.pump().await;
        assert!(h.controller.log().is_empty());
    }

    #[tokio::test]
    async fn send_failure_unblocks_input() {
        let mut h = Harness::running().await;
        *h.transport.fail_send.lock().unwrap() = true;

        h.controller.send_message(message("m1", "hi"));
        h.pump().await;

        assert!(!h.controller.is_receiving());
        assert_eq!(h.controller.receive().unwrap().status, ReceiveStatus::Failed);
        assert_eq!(h.controller.log().len(), 1);
        assert_eq!(h.controller.take_notifications().len(), 1);
    }

    #[tokio::test]
    async fn save_creates_then_updates() {
        let mut h = Harness::new(FakeTransport::default());
        h.controller.form_mut().edit(|a| a.prompt = "Be kind".into());

        assert_eq!(h.controller.save_configuration(), SaveOutcome::Dispatched);
        assert_eq!(h.controller.save_configuration(), SaveOutcome::AlreadySaving);
        assert!(h.controller.snapshot().is_saving);
        h.pump().await;

        assert!(!h.controller.form().is_dirty());
        assert_eq!(h.controller.form().current().id.as_deref(), Some("agent-1"));

        h.controller.form_mut().edit(|a| a.prompt = "Be brief".into());
        h.controller.save_configuration();
        h.pump().await;

        assert_eq!(h.store.creates.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.updates.load(Ordering::SeqCst), 1);
        assert_eq!(h.controller.take_notifications().len(), 2);
    }

    #[tokio::test]
    async fn failed_save_leaves_form_dirty() {
        let mut h = Harness::new(FakeTransport::default());
        *h.store.fail.lock().unwrap() = true;
        h.controller.form_mut().edit(|a| a.prompt = "Be kind".into());

        h.controller.save_configuration();
        h.pump().await;

        assert!(h.controller.form().is_dirty());
        let notes = h.controller.take_notifications();
        assert!(notes[0].message.starts_with("Save failed"));
    }

    #[tokio::test]
    async fn invalid_config_is_never_dispatched() {
        let mut h = Harness::new(FakeTransport::default());
        h.controller.form_mut().edit(|a| a.name.clear());

        assert_eq!(h.controller.save_configuration(), SaveOutcome::Invalid);
        assert!(!h.controller.snapshot().is_saving);
        assert_eq!(h.store.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generated_description_fills_form() {
        let mut h = Harness::new(FakeTransport::default());
        h.controller.form_mut().edit(|a| a.description = "math tutor".into());

        assert!(h.controller.generate_description());
        assert!(!h.controller.generate_description());
        h.pump().await;

        assert_eq!(h.controller.form().current().description, "A helpful agent (math tutor)");
        assert!(!h.controller.snapshot().is_generating);
    }

    #[tokio::test]
    async fn generation_failure_only_notifies() {
        let mut h = Harness::with_generator(FakeTransport::default(), Err("offline".into()));
        h.controller.generate_description();
        h.pump().await;

        assert!(!h.controller.form().is_dirty());
        assert_eq!(h.controller.take_notifications().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_generation_never_reports() {
        let mut h = Harness::new(FakeTransport::default());
        h.controller.generate_description();
        assert!(h.controller.cancel_generation());

        h.controller.apply(SessionEvent::DescriptionGenerated { request: 1, description: "x".into() });
        assert!(!h.controller.form().is_dirty());
    }

    #[tokio::test]
    async fn uploaded_icon_becomes_data_url() {
        let mut h = Harness::new(FakeTransport::default());
        assert!(h.controller.set_icon("avatar.png", "aGk="));

        assert_eq!(h.controller.form().current().icon, "data:image/png;base64,aGk=");
        assert!(h.controller.form().is_dirty());
    }

    #[tokio::test]
    async fn rejected_icon_leaves_form_clean() {
        let mut h = Harness::new(FakeTransport::default());
        assert!(!h.controller.set_icon("avatar.exe", "aGk="));

        assert!(!h.controller.form().is_dirty());
        let notes = h.controller.take_notifications();
        assert!(notes[0].message.starts_with("Upload failed"));
    }

    #[tokio::test]
    async fn log_only_grows_within_a_session() {
        let mut h = Harness::running().await;
        let mut seen = Vec::new();
        for i in 0..3 {
            h.controller.send_message(message(&format!("m{i}"), "hi"));
            h.transport.deliver(reply(&format!("r{i}"), &format!("m{i}"), "ok"));
            h.pump().await;
            let entries = h.controller.log().entries();
            assert_eq!(&entries[..seen.len()], seen.as_slice());
            seen = entries.to_vec();
        }
        assert_eq!(seen.len(), 6);
    }

    #[tokio::test]
    async fn shutdown_disconnects_transport() {
        let h = Harness::running().await;
        let transport = h.transport.clone();
        h.controller.shutdown().await;
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    }
}
