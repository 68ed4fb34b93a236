use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use shared::{
    domain::{MessageId, MessageKind, SpaceId},
    protocol::ServerMessage,
};
use tracing::debug;

/// A server message folded into the visible list, tagged with the space it
/// was received under. Entries are replaced rather than mutated when an edit
/// or delete resolves against them, so consumers can rely on referential
/// comparison of list items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedMessage {
    pub message: ServerMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<SpaceId>,
    #[serde(default)]
    pub edited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Highest message time folded into the list so far; never decreases.
    pub new_watermark: i64,
    /// Set once per batch when a visible entry was newly added. Tombstones,
    /// coalescing bumps, and watermark-dropped duplicates do not notify.
    pub notify_needed: bool,
    /// Whether the visible list changed at all (drives snapshot rewrites).
    pub changed: bool,
}

/// The ordered, de-duplicated, display-ready message list.
///
/// Batches fold in through [`ChatMessageStream::ingest`]; everything at or
/// below the caller's watermark is dropped, which makes overlapping
/// redeliveries after a reconnect a no-op.
#[derive(Debug)]
pub struct ChatMessageStream {
    messages: Vec<ProcessedMessage>,
    /// Next insert position per edited message id, so a burst of edits of
    /// one message chains into the same visual slot.
    insert_cursors: HashMap<MessageId, usize>,
    max_messages: usize,
}

impl ChatMessageStream {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            insert_cursors: HashMap::new(),
            max_messages: max_messages.max(1),
        }
    }

    pub fn messages(&self) -> &[ProcessedMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Highest message time in the list; the restore watermark.
    pub fn latest_time(&self) -> i64 {
        self.messages
            .iter()
            .map(|entry| entry.message.time)
            .max()
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.insert_cursors.clear();
    }

    /// Replace the list wholesale from a restore snapshot. Insert cursors are
    /// transient reconciliation state and start over.
    pub fn restore(&mut self, messages: Vec<ProcessedMessage>) {
        self.messages = messages;
        self.insert_cursors.clear();
        self.trim_to_max();
    }

    pub fn ingest(
        &mut self,
        batch: &[ServerMessage],
        watermark: i64,
        space_id: Option<&SpaceId>,
    ) -> IngestOutcome {
        let mut outcome = IngestOutcome {
            new_watermark: watermark,
            notify_needed: false,
            changed: false,
        };

        for message in batch {
            if message.time <= watermark {
                continue;
            }
            outcome.new_watermark = outcome.new_watermark.max(message.time);

            if message.kind == MessageKind::Deleted {
                outcome.changed |= self.apply_delete(message, space_id);
            } else if let Some(insert_id) = message.insert_id.clone() {
                if self.apply_edit(message, insert_id, space_id) {
                    outcome.changed = true;
                    outcome.notify_needed = true;
                }
            } else if message.kind.is_action() {
                let (changed, appended) = self.apply_action(message, space_id);
                outcome.changed |= changed;
                outcome.notify_needed |= appended;
            } else {
                self.messages.push(processed(message, space_id, false));
                outcome.changed = true;
                outcome.notify_needed = true;
            }

            self.trim_to_max();
        }

        outcome
    }

    /// Replace the first live entry carrying the deleted id with a tombstone.
    /// Entries that are already tombstones don't match, so a racing second
    /// delete of the same id falls through to the no-op path.
    fn apply_delete(&mut self, message: &ServerMessage, space_id: Option<&SpaceId>) -> bool {
        let position = self.messages.iter().position(|entry| {
            entry.message.kind != MessageKind::Deleted && entry.message.id == message.id
        });

        match position {
            Some(index) => {
                self.messages[index] = processed(message, space_id, false);
                true
            }
            None => false,
        }
    }

    /// Anchor an edit at its original position: first via a tombstone left by
    /// a preceding delete, then via the insert cursor a previous edit of the
    /// same id established. An edit with no anchor is dropped.
    fn apply_edit(
        &mut self,
        message: &ServerMessage,
        insert_id: MessageId,
        space_id: Option<&SpaceId>,
    ) -> bool {
        let tombstone = self.messages.iter().position(|entry| {
            entry.message.kind == MessageKind::Deleted
                && entry.message.id == insert_id
                && (entry.message.from.is_none() || entry.message.from == message.from)
        });

        if let Some(index) = tombstone {
            self.messages[index] = processed(message, space_id, true);
            self.insert_cursors.insert(insert_id, index + 1);
            return true;
        }

        if let Some(cursor) = self.insert_cursors.get_mut(&insert_id) {
            let index = (*cursor).min(self.messages.len());
            self.messages.insert(index, processed(message, space_id, true));
            *cursor = index + 1;
            return true;
        }

        debug!(
            insert_id = %insert_id.0,
            time = message.time,
            "chat: dropping edit with no tombstone or prior insert position"
        );
        false
    }

    /// Returns `(changed, appended)`: a coalescing bump changes the list but
    /// is not a newly added entry.
    fn apply_action(
        &mut self,
        message: &ServerMessage,
        space_id: Option<&SpaceId>,
    ) -> (bool, bool) {
        if let Some(last) = self.messages.last() {
            if last.message.coalesces_with(message) {
                let mut merged = last.clone();
                merged.message.repetitions = Some(
                    last.message.repetitions.unwrap_or(1) + message.repetitions.unwrap_or(1),
                );
                let index = self.messages.len() - 1;
                self.messages[index] = merged;
                return (true, false);
            }
        }

        self.messages.push(processed(message, space_id, false));
        (true, true)
    }

    fn trim_to_max(&mut self) {
        if self.messages.len() <= self.max_messages {
            return;
        }

        let excess = self.messages.len() - self.max_messages;
        self.messages.drain(0..excess);

        // Cursors pointing into the trimmed range lose their anchor; the
        // edits they would have placed are dropped like any other
        // anchorless edit against pruned history.
        self.insert_cursors.retain(|_, cursor| *cursor >= excess);
        for cursor in self.insert_cursors.values_mut() {
            *cursor -= excess;
        }
    }
}

fn processed(
    message: &ServerMessage,
    space_id: Option<&SpaceId>,
    edited: bool,
) -> ProcessedMessage {
    ProcessedMessage {
        message: message.clone(),
        space_id: space_id.cloned(),
        edited,
    }
}

#[cfg(test)]
#[path = "tests/chat_stream_tests.rs"]
mod tests;
