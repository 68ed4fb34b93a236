use std::{collections::HashMap, sync::Arc, time::Duration};

use serde_json::Value;
use shared::{
    domain::{ChatStatus, GameActionOperation, ParticipantId, SendId, SpaceId},
    protocol::{
        ClientRequest, OutgoingSegment, Participant, ParticipantUpdate, PermissionPromptEntry,
        ServerEvent, ServerMessage, SpaceSnapshot,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

pub mod chat_stream;
pub mod clock;
pub mod error;
pub mod markup;
pub mod pending;
pub mod permission;
pub mod restriction;
pub mod snapshot;
pub mod snapshot_store;
pub mod status;
pub mod transport;

pub use chat_stream::{ChatMessageStream, IngestOutcome, ProcessedMessage};
pub use clock::{Clock, MessageIdClock, SystemClock};
pub use error::SendError;
pub use markup::{MarkupParser, PlainMarkupParser};
pub use pending::{PendingMessageRegistry, PendingSentMessage, SendOptions};
pub use permission::{PermissionBatch, PermissionPrompt, PermissionRequest};
pub use restriction::{PassthroughRestriction, RestrictionEvaluator, RestrictionVerdict};
pub use snapshot::{MemorySnapshotStore, NullSnapshotStore, RestoreSnapshot, SnapshotStore};
pub use snapshot_store::DurableSnapshotStore;
pub use status::StatusTracker;
pub use transport::{MissingTransport, Transport, WsTransport};

const DEFAULT_EDIT_WINDOW: Duration = Duration::from_secs(300);
const DEFAULT_MAX_CHAT_LENGTH: usize = 1_000;
const DEFAULT_MAX_MESSAGES: usize = 600;
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a sent message stays editable/deletable.
    pub edit_window: Duration,
    pub max_chat_length: usize,
    /// Visible history retention cap; oldest entries are trimmed past it.
    pub max_messages: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            edit_window: DEFAULT_EDIT_WINDOW,
            max_chat_length: DEFAULT_MAX_CHAT_LENGTH,
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }
}

impl EngineConfig {
    fn edit_window_ms(&self) -> i64 {
        self.edit_window.as_millis() as i64
    }

    /// Cadence of the expired-pending sweep. The sweep is cache hygiene;
    /// expiry is re-checked lazily on every read.
    pub fn sweep_interval(&self) -> Duration {
        self.edit_window / 2
    }
}

/// Change notifications the UI subscribes to. The channel is the only
/// outward fan-out; consumers pull fresh state through the read surface
/// when they see one of these.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Something in the pull-visible state changed; re-read what you show.
    GlobalStateChanged,
    /// At least one new visible message arrived in the last batch.
    MessageNotify,
    ParticipantEntered {
        participant: Participant,
    },
    StatusChanged {
        participant_id: ParticipantId,
        status: ChatStatus,
    },
    PermissionPrompt(PermissionPrompt),
    /// A dispatched request failed after the fact; informational only.
    Warning(String),
}

struct EngineState {
    space_id: Option<SpaceId>,
    self_id: Option<ParticipantId>,
    participants: HashMap<ParticipantId, Participant>,
    stream: ChatMessageStream,
    pending: PendingMessageRegistry,
    watermark: i64,
    id_clock: MessageIdClock,
    statuses: StatusTracker,
}

/// Composition root: owns the message stream, the pending registry, the
/// status map and the watermark, exposes the handler surface the transport
/// calls into and the command surface the UI calls into.
///
/// Every handler and command locks the single state mutex and runs to
/// completion, so the reconciliation algorithms always see exclusive state.
/// Outgoing requests are validated synchronously and dispatched from
/// spawned tasks; late failures surface as [`EngineEvent::Warning`] and
/// never roll local state back.
pub struct ReconciliationEngine {
    transport: Arc<dyn Transport>,
    restrictions: Arc<dyn RestrictionEvaluator>,
    markup: Arc<dyn MarkupParser>,
    snapshots: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    inner: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
}

impl ReconciliationEngine {
    pub fn new() -> Arc<Self> {
        Self::new_with_dependencies(
            EngineConfig::default(),
            Arc::new(MissingTransport),
            Arc::new(PassthroughRestriction),
            Arc::new(PlainMarkupParser),
            Arc::new(MemorySnapshotStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn new_with_transport(transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::new_with_dependencies(
            EngineConfig::default(),
            transport,
            Arc::new(PassthroughRestriction),
            Arc::new(PlainMarkupParser),
            Arc::new(MemorySnapshotStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn new_with_dependencies(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        restrictions: Arc<dyn RestrictionEvaluator>,
        markup: Arc<dyn MarkupParser>,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            inner: Mutex::new(EngineState {
                space_id: None,
                self_id: None,
                participants: HashMap::new(),
                stream: ChatMessageStream::new(config.max_messages),
                pending: PendingMessageRegistry::new(config.edit_window_ms()),
                watermark: 0,
                id_clock: MessageIdClock::new(),
                statuses: StatusTracker::new(),
            }),
            transport,
            restrictions,
            markup,
            snapshots,
            clock,
            config,
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Fan a tagged server event out to the matching handler.
    pub async fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Load { space } => self.on_load(space).await,
            ServerEvent::Update { updates } => self.on_update(updates).await,
            ServerEvent::Messages { messages } => self.on_message(messages).await,
            ServerEvent::Status {
                participant_id,
                status,
            } => self.on_status(participant_id, status).await,
            ServerEvent::PermissionPrompt { source, entries } => {
                self.on_permission_prompt(source, entries).await
            }
            ServerEvent::Error(err) => {
                warn!(code = ?err.code, "server: pushed error: {}", err.message);
                let _ = self.events.send(EngineEvent::Warning(err.message));
            }
        }
    }

    /// The server placed this client in a space: adopt the roster and
    /// rebuild chat state from the matching restore snapshot, if any.
    pub async fn on_load(&self, space: SpaceSnapshot) {
        let mut state = self.inner.lock().await;
        self.reset_context(&mut state, space.space_id).await;
        state.self_id = Some(space.self_id);
        state.participants = space
            .participants
            .into_iter()
            .map(|participant| (participant.id, participant))
            .collect();
        info!(
            space = space_label(&state.space_id),
            participants = state.participants.len(),
            "session: space loaded"
        );
        let _ = self.events.send(EngineEvent::GlobalStateChanged);
    }

    /// UI-initiated context switch. All per-space state is discarded; the
    /// snapshot for the new space (when one exists) takes its place.
    pub async fn enter_space(&self, space_id: Option<SpaceId>) {
        let mut state = self.inner.lock().await;
        if state.space_id == space_id {
            return;
        }
        self.reset_context(&mut state, space_id).await;
        let _ = self.events.send(EngineEvent::GlobalStateChanged);
    }

    pub async fn on_message(&self, messages: Vec<ServerMessage>) {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        let outcome = state
            .stream
            .ingest(&messages, state.watermark, state.space_id.as_ref());
        state.watermark = outcome.new_watermark;

        if outcome.changed {
            self.save_snapshot(state).await;
            let _ = self.events.send(EngineEvent::GlobalStateChanged);
        }
        if outcome.notify_needed {
            let _ = self.events.send(EngineEvent::MessageNotify);
        }
    }

    /// Roster deltas. A sub-update naming a participant we do not know is an
    /// internal inconsistency: it is logged and skipped, never fatal to the
    /// rest of the batch.
    pub async fn on_update(&self, updates: Vec<ParticipantUpdate>) {
        let mut state = self.inner.lock().await;
        let mut applied = false;

        for update in updates {
            match update {
                ParticipantUpdate::Entered { participant } => {
                    state
                        .participants
                        .insert(participant.id, participant.clone());
                    let _ = self
                        .events
                        .send(EngineEvent::ParticipantEntered { participant });
                    applied = true;
                }
                ParticipantUpdate::Updated { participant } => {
                    if !state.participants.contains_key(&participant.id) {
                        error!(
                            participant = participant.id.0,
                            "roster: update references unknown participant; skipping"
                        );
                        continue;
                    }
                    state.participants.insert(participant.id, participant);
                    applied = true;
                }
                ParticipantUpdate::Left { id } => {
                    if state.participants.remove(&id).is_none() {
                        error!(
                            participant = id.0,
                            "roster: departure references unknown participant; skipping"
                        );
                        continue;
                    }
                    state.statuses.remove(id);
                    applied = true;
                }
            }
        }

        if applied {
            let _ = self.events.send(EngineEvent::GlobalStateChanged);
        }
    }

    pub async fn on_status(&self, participant_id: ParticipantId, status: ChatStatus) {
        let mut state = self.inner.lock().await;
        let self_id = state.self_id;
        if state.statuses.apply_remote(self_id, participant_id, status) {
            let _ = self.events.send(EngineEvent::StatusChanged {
                participant_id,
                status,
            });
        }
    }

    pub async fn on_permission_prompt(
        &self,
        source: ParticipantId,
        entries: Vec<PermissionPromptEntry>,
    ) {
        match permission::aggregate(source, entries) {
            Some(prompt) => {
                let _ = self.events.send(EngineEvent::PermissionPrompt(prompt));
            }
            None => {
                debug!(source = source.0, "permissions: dropping empty prompt");
            }
        }
    }

    /// The send pipeline. Every failure here is raised before an id is
    /// allocated or a request dispatched, so a rejected send leaves no
    /// trace in the registry, the id clock, or on the wire.
    pub async fn send_message(
        self: &Arc<Self>,
        text: &str,
        options: SendOptions,
    ) -> Result<SendId, SendError> {
        let mut state = self.inner.lock().await;
        let now = self.clock.now_ms();

        if let Some(edit_id) = options.editing {
            if state.pending.get_live(edit_id, now).is_none() {
                return Err(SendError::MessageNotFound);
            }
        }

        if let Some(target) = options.target {
            if !state.participants.contains_key(&target) {
                return Err(SendError::TargetNotPresent);
            }
            if state.self_id == Some(target) {
                return Err(SendError::SelfTarget);
            }
            if !options.mode.is_addressable() {
                return Err(SendError::IncompatibleMode);
            }
        }

        if text.chars().count() > self.config.max_chat_length {
            return Err(SendError::TooLong {
                limit: self.config.max_chat_length,
            });
        }

        let segments = if options.raw {
            vec![OutgoingSegment::raw(text, options.mode)]
        } else {
            self.markup.parse(text, options.mode)
        };

        for segment in &segments {
            if let RestrictionVerdict::Blocked { reason } =
                self.restrictions.check_message(segment)
            {
                return Err(SendError::Restricted { reason });
            }
        }

        let id = state.id_clock.next(now);
        if !segments.is_empty() {
            state.pending.record(id, text, now, options.clone());
        }
        if let Some(edit_id) = options.editing {
            state.pending.remove(edit_id);
        }

        self.dispatch(
            ClientRequest::SendChatMessage {
                id,
                messages: segments,
                edit_id: options.editing,
            },
            "send",
        );
        self.save_snapshot(&state).await;
        let _ = self.events.send(EngineEvent::GlobalStateChanged);
        Ok(id)
    }

    /// Delete a recently sent message. The delete request consumes a fresh
    /// send id of its own; the return value is that id.
    pub async fn delete_message(self: &Arc<Self>, id: SendId) -> Result<SendId, SendError> {
        let mut state = self.inner.lock().await;
        let now = self.clock.now_ms();

        if state.pending.get_live(id, now).is_none() {
            return Err(SendError::MessageNotFound);
        }
        state.pending.remove(id);
        let request_id = state.id_clock.next(now);

        self.dispatch(ClientRequest::delete_chat_message(request_id, id), "delete");
        self.save_snapshot(&state).await;
        let _ = self.events.send(EngineEvent::GlobalStateChanged);
        Ok(request_id)
    }

    pub async fn message_edit(&self, id: SendId) -> Option<PendingSentMessage> {
        let state = self.inner.lock().await;
        state.pending.get_live(id, self.clock.now_ms()).cloned()
    }

    /// Time left before `id` stops being editable, if it still is.
    pub async fn message_edit_timeout(&self, id: SendId) -> Option<Duration> {
        let state = self.inner.lock().await;
        state
            .pending
            .remaining_ms(id, self.clock.now_ms())
            .map(|ms| Duration::from_millis(ms.max(0) as u64))
    }

    pub async fn last_message_edit(&self) -> Option<SendId> {
        let state = self.inner.lock().await;
        state.pending.last_editable(self.clock.now_ms())
    }

    pub async fn request_game_action(
        self: &Arc<Self>,
        operation: GameActionOperation,
        action: Option<Value>,
    ) -> Result<(), SendError> {
        if let RestrictionVerdict::Blocked { reason } =
            self.restrictions.check_action(operation, action.as_ref())
        {
            return Err(SendError::Restricted { reason });
        }

        self.dispatch(
            ClientRequest::RequestGameAction { operation, action },
            "game action",
        );
        Ok(())
    }

    /// Update our own status; only broadcasts when the `(status, target)`
    /// pair actually changed. Debouncing is the caller's concern.
    pub async fn set_status(self: &Arc<Self>, status: ChatStatus, target: Option<ParticipantId>) {
        let mut state = self.inner.lock().await;
        let Some(self_id) = state.self_id else {
            debug!("status: ignoring status change outside a session");
            return;
        };
        if !state.statuses.set_local(self_id, status, target) {
            return;
        }
        drop(state);

        let client = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = client
                .transport
                .send(ClientRequest::SetStatus { status, target })
                .await
            {
                warn!("status: broadcast failed: {err}");
            }
        });
    }

    /// Periodic expired-pending sweep at half the edit window. Purely cache
    /// hygiene: every read re-checks expiry on its own.
    pub fn spawn_sweep_task(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(client.config.sweep_interval());
            loop {
                interval.tick().await;
                let mut state = client.inner.lock().await;
                let removed = state.pending.sweep(client.clock.now_ms());
                if removed > 0 {
                    debug!(removed, "session: swept expired pending messages");
                    client.save_snapshot(&state).await;
                }
            }
        })
    }

    pub async fn messages(&self) -> Vec<ProcessedMessage> {
        self.inner.lock().await.stream.messages().to_vec()
    }

    pub async fn statuses(&self) -> HashMap<ParticipantId, ChatStatus> {
        self.inner.lock().await.statuses.statuses().clone()
    }

    pub async fn participants(&self) -> Vec<Participant> {
        self.inner
            .lock()
            .await
            .participants
            .values()
            .cloned()
            .collect()
    }

    pub async fn space_id(&self) -> Option<SpaceId> {
        self.inner.lock().await.space_id.clone()
    }

    pub async fn watermark(&self) -> i64 {
        self.inner.lock().await.watermark
    }

    async fn reset_context(&self, state: &mut EngineState, space_id: Option<SpaceId>) {
        state.space_id = space_id;
        state.participants.clear();
        state.statuses.clear();
        state.stream.clear();
        state.pending = PendingMessageRegistry::new(self.config.edit_window_ms());
        state.watermark = 0;

        match self.snapshots.load(state.space_id.as_ref()).await {
            Ok(Some(snapshot)) => {
                state.pending.restore(snapshot.sent, self.clock.now_ms());
                state.stream.restore(snapshot.messages);
                state.watermark = state.stream.latest_time();
                debug!(
                    space = space_label(&state.space_id),
                    messages = state.stream.len(),
                    pending = state.pending.len(),
                    "session: restored snapshot"
                );
            }
            Ok(None) => {}
            Err(err) => {
                warn!("session: snapshot restore failed: {err}");
            }
        }
    }

    fn dispatch(self: &Arc<Self>, request: ClientRequest, label: &'static str) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            match client.transport.request(request).await {
                Ok(ack) if ack.is_ok() => {}
                Ok(ack) => {
                    warn!(result = %ack.result, "{label}: server rejected request");
                    let _ = client.events.send(EngineEvent::Warning(format!(
                        "{label} rejected: {}",
                        ack.result
                    )));
                }
                Err(err) => {
                    warn!("{label}: request failed: {err}");
                    let _ = client
                        .events
                        .send(EngineEvent::Warning(format!("{label} failed: {err}")));
                }
            }
        });
    }

    async fn save_snapshot(&self, state: &EngineState) {
        let snapshot = RestoreSnapshot {
            space_id: state.space_id.clone(),
            messages: state.stream.messages().to_vec(),
            sent: state
                .pending
                .entries()
                .map(|(id, entry)| (id, entry.clone()))
                .collect(),
        };
        if let Err(err) = self.snapshots.save(&snapshot).await {
            warn!("session: snapshot save failed: {err}");
        }
    }
}

fn space_label(space_id: &Option<SpaceId>) -> &str {
    space_id.as_ref().map_or("local", |id| id.0.as_str())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
