use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::{SendId, SpaceId};
use tokio::sync::Mutex;

use crate::{chat_stream::ProcessedMessage, pending::PendingSentMessage};

/// The session-scoped copy of chat state used to survive short disconnects
/// and reloads. Rewritten after every mutation of the message list or the
/// pending registry; read once when (re-)entering a space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<SpaceId>,
    pub messages: Vec<ProcessedMessage>,
    pub sent: Vec<(SendId, PendingSentMessage)>,
}

/// Where restore snapshots live. `load` only hands a snapshot back when the
/// stored space id matches the one being entered; callers must still
/// re-filter the pending entries against the edit window, since they may
/// have expired while the session was away.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &RestoreSnapshot) -> Result<()>;
    async fn load(&self, space_id: Option<&SpaceId>) -> Result<Option<RestoreSnapshot>>;
}

/// In-memory store: one slot, the lifetime of the process. The default for
/// tests and embedded use.
#[derive(Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<RestoreSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &RestoreSnapshot) -> Result<()> {
        *self.slot.lock().await = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self, space_id: Option<&SpaceId>) -> Result<Option<RestoreSnapshot>> {
        let slot = self.slot.lock().await;
        Ok(slot
            .as_ref()
            .filter(|snapshot| snapshot.space_id.as_ref() == space_id)
            .cloned())
    }
}

/// Session persistence disabled: saves vanish, loads find nothing.
pub struct NullSnapshotStore;

#[async_trait]
impl SnapshotStore for NullSnapshotStore {
    async fn save(&self, _snapshot: &RestoreSnapshot) -> Result<()> {
        Ok(())
    }

    async fn load(&self, _space_id: Option<&SpaceId>) -> Result<Option<RestoreSnapshot>> {
        Ok(None)
    }
}
