use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::domain::SpaceId;
use storage::Storage;

use crate::snapshot::{RestoreSnapshot, SnapshotStore};

/// SQLite-backed snapshot store for desktop builds: one row per session key,
/// overwritten on every save, so state survives a process restart within the
/// same session.
pub struct DurableSnapshotStore {
    store: Storage,
    session_key: String,
}

impl DurableSnapshotStore {
    pub async fn initialize(
        database_url: &str,
        session_key: impl Into<String>,
    ) -> Result<Arc<Self>> {
        let store = Storage::new(database_url)
            .await
            .with_context(|| format!("failed to initialize snapshot storage at '{database_url}'"))?;
        Ok(Arc::new(Self {
            store,
            session_key: session_key.into(),
        }))
    }

    /// Fresh key for a new session; distinct concurrent sessions sharing one
    /// database file never see each other's snapshots.
    pub fn random_session_key() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn sqlite_url_for_data_dir(base_dir: &Path) -> String {
        format!("sqlite://{}", base_dir.join("chat_session_state.sqlite3").display())
    }
}

#[async_trait]
impl SnapshotStore for DurableSnapshotStore {
    async fn save(&self, snapshot: &RestoreSnapshot) -> Result<()> {
        let payload = serde_json::to_string(snapshot).context("failed to serialize snapshot")?;
        self.store
            .save_session_snapshot(&self.session_key, snapshot.space_id.as_ref(), &payload)
            .await
    }

    async fn load(&self, space_id: Option<&SpaceId>) -> Result<Option<RestoreSnapshot>> {
        let Some(stored) = self.store.load_session_snapshot(&self.session_key).await? else {
            return Ok(None);
        };

        if stored.space_id.as_ref() != space_id {
            return Ok(None);
        }

        let snapshot: RestoreSnapshot = serde_json::from_str(&stored.payload_json)
            .context("failed to deserialize stored snapshot")?;
        Ok(Some(snapshot))
    }
}
