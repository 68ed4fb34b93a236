use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(ParticipantId);
id_newtype!(SendId);

/// Server-assigned, recipient-visible message id. Edit/delete correlation and
/// action coalescing key on this; it is a different namespace from [`SendId`],
/// which only ever identifies requests this client originated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpaceId(pub String);

impl SpaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Chat,
    Ooc,
    Me,
    Emote,
    Action,
    ServerMessage,
    Deleted,
}

impl MessageKind {
    /// Action-type messages are the ones subject to coalescing.
    pub fn is_action(self) -> bool {
        matches!(self, MessageKind::Action | MessageKind::ServerMessage)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    #[default]
    Say,
    Ooc,
    Me,
    Emote,
}

impl ChatMode {
    /// Whether a message in this mode may carry a whisper target. "me" and
    /// "emote" are broadcast-only narration modes.
    pub fn is_addressable(self) -> bool {
        matches!(self, ChatMode::Say | ChatMode::Ooc)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    #[default]
    None,
    Typing,
    Whispering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameActionOperation {
    DoImmediately,
    Start,
    Complete,
    AbortCurrentAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionCategory {
    Actions,
    Inventory,
    Social,
}
