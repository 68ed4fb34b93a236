use std::collections::HashMap;

use shared::domain::{ChatStatus, ParticipantId};

/// Participant id → coarse chat status, server-driven except for this
/// client's own entry.
#[derive(Debug, Default)]
pub struct StatusTracker {
    statuses: HashMap<ParticipantId, ChatStatus>,
    last_broadcast: Option<(ChatStatus, Option<ParticipantId>)>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update this client's own status. Returns whether the
    /// `(status, target)` pair differs from the last broadcast, i.e. whether
    /// the caller should push a status update to the server.
    pub fn set_local(
        &mut self,
        self_id: ParticipantId,
        status: ChatStatus,
        target: Option<ParticipantId>,
    ) -> bool {
        self.apply(self_id, status);
        let broadcast = (status, target);
        if self.last_broadcast == Some(broadcast) {
            return false;
        }
        self.last_broadcast = Some(broadcast);
        true
    }

    /// Apply a server-pushed status. The echo of our own status is ignored;
    /// the local entry is authoritative. Returns whether the map changed.
    pub fn apply_remote(
        &mut self,
        self_id: Option<ParticipantId>,
        participant_id: ParticipantId,
        status: ChatStatus,
    ) -> bool {
        if self_id == Some(participant_id) {
            return false;
        }
        self.apply(participant_id, status)
    }

    pub fn status_of(&self, participant_id: ParticipantId) -> ChatStatus {
        self.statuses
            .get(&participant_id)
            .copied()
            .unwrap_or(ChatStatus::None)
    }

    pub fn statuses(&self) -> &HashMap<ParticipantId, ChatStatus> {
        &self.statuses
    }

    pub fn typing_participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.statuses
            .iter()
            .filter(|(_, status)| **status == ChatStatus::Typing)
            .map(|(id, _)| *id)
    }

    pub fn remove(&mut self, participant_id: ParticipantId) {
        self.statuses.remove(&participant_id);
    }

    pub fn clear(&mut self) {
        self.statuses.clear();
        self.last_broadcast = None;
    }

    fn apply(&mut self, participant_id: ParticipantId, status: ChatStatus) -> bool {
        match status {
            ChatStatus::None => self.statuses.remove(&participant_id).is_some(),
            _ => self.statuses.insert(participant_id, status) != Some(status),
        }
    }
}
