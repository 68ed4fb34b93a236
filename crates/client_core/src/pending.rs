use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use shared::domain::{ChatMode, ParticipantId, SendId};

/// Options attached to an outgoing chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    pub mode: ChatMode,
    /// Whisper target; only valid for addressable modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ParticipantId>,
    /// Skip markup parsing and send the text as a single raw segment.
    #[serde(default)]
    pub raw: bool,
    /// When set, this send replaces the pending message with that id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editing: Option<SendId>,
}

/// A message this client has sent that is still inside its edit window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSentMessage {
    pub text: String,
    /// Send timestamp in wall-clock milliseconds; the edit window counts
    /// from here.
    pub time: i64,
    pub options: SendOptions,
}

/// Client-side record of recently sent messages, keyed by their send ids.
///
/// Expiry is checked lazily on every read; the periodic sweep only keeps the
/// map from accumulating dead entries between interactions.
#[derive(Debug)]
pub struct PendingMessageRegistry {
    entries: HashMap<SendId, PendingSentMessage>,
    edit_window_ms: i64,
}

impl PendingMessageRegistry {
    pub fn new(edit_window_ms: i64) -> Self {
        Self {
            entries: HashMap::new(),
            edit_window_ms,
        }
    }

    pub fn edit_window_ms(&self) -> i64 {
        self.edit_window_ms
    }

    pub fn record(&mut self, id: SendId, text: impl Into<String>, time: i64, options: SendOptions) {
        self.entries.insert(
            id,
            PendingSentMessage {
                text: text.into(),
                time,
                options,
            },
        );
    }

    /// Unfiltered lookup; callers decide whether the window still applies.
    pub fn get(&self, id: SendId) -> Option<&PendingSentMessage> {
        self.entries.get(&id)
    }

    /// Lookup that only returns entries still inside the edit window.
    pub fn get_live(&self, id: SendId, now: i64) -> Option<&PendingSentMessage> {
        self.entries
            .get(&id)
            .filter(|entry| self.is_live(entry, now))
    }

    /// Milliseconds of edit window left for `id`, if it is still live.
    pub fn remaining_ms(&self, id: SendId, now: i64) -> Option<i64> {
        self.get_live(id, now)
            .map(|entry| entry.time + self.edit_window_ms - now)
    }

    pub fn remove(&mut self, id: SendId) -> Option<PendingSentMessage> {
        self.entries.remove(&id)
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn sweep(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        let window = self.edit_window_ms;
        self.entries
            .retain(|_, entry| now - entry.time < window);
        before - self.entries.len()
    }

    /// Id of the most recently sent entry still inside the window.
    pub fn last_editable(&self, now: i64) -> Option<SendId> {
        self.entries
            .iter()
            .filter(|(_, entry)| self.is_live(entry, now))
            .max_by_key(|(id, entry)| (entry.time, *id))
            .map(|(id, _)| *id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (SendId, &PendingSentMessage)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Reload entries from a restore snapshot, dropping any that expired
    /// while the session was away.
    pub fn restore(&mut self, entries: Vec<(SendId, PendingSentMessage)>, now: i64) {
        self.entries.clear();
        for (id, entry) in entries {
            if now - entry.time < self.edit_window_ms {
                self.entries.insert(id, entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, entry: &PendingSentMessage, now: i64) -> bool {
        now - entry.time < self.edit_window_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: i64 = 10_000;

    fn registry_with_entry(id: i64, time: i64) -> PendingMessageRegistry {
        let mut registry = PendingMessageRegistry::new(WINDOW);
        registry.record(SendId(id), "hello", time, SendOptions::default());
        registry
    }

    #[test]
    fn entry_is_live_strictly_inside_the_window() {
        let registry = registry_with_entry(1, 1_000);
        assert!(registry.get_live(SendId(1), 1_000 + WINDOW - 1).is_some());
        assert!(registry.get_live(SendId(1), 1_000 + WINDOW).is_none());
    }

    #[test]
    fn remaining_ms_counts_down_to_the_boundary() {
        let registry = registry_with_entry(1, 1_000);
        assert_eq!(registry.remaining_ms(SendId(1), 1_000), Some(WINDOW));
        assert_eq!(
            registry.remaining_ms(SendId(1), 1_000 + WINDOW - 1),
            Some(1)
        );
        assert_eq!(registry.remaining_ms(SendId(1), 1_000 + WINDOW), None);
    }

    #[test]
    fn record_overwrites_existing_entry() {
        let mut registry = registry_with_entry(1, 1_000);
        registry.record(SendId(1), "edited", 2_000, SendOptions::default());
        let entry = registry.get(SendId(1)).expect("entry");
        assert_eq!(entry.text, "edited");
        assert_eq!(entry.time, 2_000);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sweep_drops_only_expired_entries() {
        let mut registry = PendingMessageRegistry::new(WINDOW);
        registry.record(SendId(1), "old", 0, SendOptions::default());
        registry.record(SendId(2), "fresh", 9_000, SendOptions::default());

        let removed = registry.sweep(10_000);
        assert_eq!(removed, 1);
        assert!(registry.get(SendId(1)).is_none());
        assert!(registry.get(SendId(2)).is_some());
    }

    #[test]
    fn last_editable_prefers_the_most_recent_live_entry() {
        let mut registry = PendingMessageRegistry::new(WINDOW);
        registry.record(SendId(1), "first", 1_000, SendOptions::default());
        registry.record(SendId(2), "second", 2_000, SendOptions::default());

        assert_eq!(registry.last_editable(3_000), Some(SendId(2)));
        registry.remove(SendId(2));
        assert_eq!(registry.last_editable(3_000), Some(SendId(1)));
        assert_eq!(registry.last_editable(1_000 + WINDOW), None);
    }

    #[test]
    fn restore_filters_entries_that_expired_while_away() {
        let mut registry = PendingMessageRegistry::new(WINDOW);
        registry.restore(
            vec![
                (
                    SendId(1),
                    PendingSentMessage {
                        text: "stale".into(),
                        time: 0,
                        options: SendOptions::default(),
                    },
                ),
                (
                    SendId(2),
                    PendingSentMessage {
                        text: "live".into(),
                        time: 9_500,
                        options: SendOptions::default(),
                    },
                ),
            ],
            10_000,
        );

        assert_eq!(registry.len(), 1);
        assert!(registry.get(SendId(2)).is_some());
    }
}
