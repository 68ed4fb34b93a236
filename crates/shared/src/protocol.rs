use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{
        ChatMode, ChatStatus, GameActionOperation, MessageId, MessageKind, ParticipantId,
        PermissionCategory, SendId, SpaceId,
    },
    error::ApiError,
};

/// One message as it appears on the server stream. The stream is a single
/// shape with optional fields rather than a variant per kind; which fields
/// are populated depends on [`MessageKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Server-assigned watermark value, strictly increasing across the stream.
    pub time: i64,
    pub id: MessageId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Recipient set for addressed messages (whispers, targeted emotes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<ParticipantId>>,
    /// Present on edits: the id of the message this one replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<MessageId>,
    /// Opaque action payload, compared only for equality during coalescing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dictionary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetitions: Option<u32>,
}

impl ServerMessage {
    /// Whether two action-type messages are content-identical and may be
    /// merged into one entry with a repetition counter. Recipient sets are
    /// compared order-insensitively.
    pub fn coalesces_with(&self, other: &ServerMessage) -> bool {
        self.kind.is_action()
            && other.kind.is_action()
            && self.kind == other.kind
            && self.id == other.id
            && self.custom_text == other.custom_text
            && recipient_set(self.to.as_deref()) == recipient_set(other.to.as_deref())
            && self.data == other.data
            && self.dictionary == other.dictionary
    }
}

fn recipient_set(to: Option<&[ParticipantId]>) -> Vec<ParticipantId> {
    let mut set = to.map(<[ParticipantId]>::to_vec).unwrap_or_default();
    set.sort_unstable();
    set.dedup();
    set
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
}

/// Initial state delivered when the server places this client in a space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<SpaceId>,
    pub self_id: ParticipantId,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ParticipantUpdate {
    Entered { participant: Participant },
    Updated { participant: Participant },
    Left { id: ParticipantId },
}

/// One raw `(requirement, resolved config)` tuple from a permission prompt
/// push. A null config means "use the category default".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionPromptEntry {
    pub requirement: RequirementSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementSpec {
    pub category: PermissionCategory,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    Load {
        space: SpaceSnapshot,
    },
    Update {
        updates: Vec<ParticipantUpdate>,
    },
    Messages {
        messages: Vec<ServerMessage>,
    },
    Status {
        participant_id: ParticipantId,
        status: ChatStatus,
    },
    PermissionPrompt {
        source: ParticipantId,
        entries: Vec<PermissionPromptEntry>,
    },
    Error(ApiError),
}

/// One segment of an outgoing chat message. Raw sends produce a single
/// unparsed segment; everything else goes through the markup parser and may
/// produce several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingSegment {
    pub kind: SegmentKind,
    pub text: String,
    pub mode: ChatMode,
}

impl OutgoingSegment {
    pub fn plain(text: impl Into<String>, mode: ChatMode) -> Self {
        Self {
            kind: SegmentKind::Plain,
            text: text.into(),
            mode,
        }
    }

    pub fn raw(text: impl Into<String>, mode: ChatMode) -> Self {
        Self {
            kind: SegmentKind::Raw,
            text: text.into(),
            mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Plain,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    SendChatMessage {
        id: SendId,
        messages: Vec<OutgoingSegment>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edit_id: Option<SendId>,
    },
    /// Same call shape as `SendChatMessage` with an empty segment list; the
    /// `edit_id` names the message being deleted.
    DeleteChatMessage {
        id: SendId,
        messages: Vec<OutgoingSegment>,
        edit_id: SendId,
    },
    RequestGameAction {
        operation: GameActionOperation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<Value>,
    },
    SetStatus {
        status: ChatStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ParticipantId>,
    },
}

impl ClientRequest {
    pub fn delete_chat_message(id: SendId, edit_id: SendId) -> Self {
        ClientRequest::DeleteChatMessage {
            id,
            messages: Vec::new(),
            edit_id,
        }
    }
}

/// Server reply to an awaited request: `"ok"` or a failure reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAck {
    pub result: String,
}

impl RequestAck {
    pub fn ok() -> Self {
        Self {
            result: "ok".to_string(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            result: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == "ok"
    }
}
