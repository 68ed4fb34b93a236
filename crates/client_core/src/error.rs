use thiserror::Error;

/// Why an outgoing send, edit, or delete was rejected before dispatch.
///
/// Every variant is raised synchronously, before any send id is allocated or
/// request put on the wire, so a rejected operation leaves no local trace.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("message not found or no longer editable")]
    MessageNotFound,
    #[error("target participant is not present")]
    TargetNotPresent,
    #[error("cannot address a message to yourself")]
    SelfTarget,
    #[error("this chat mode cannot be addressed to a target")]
    IncompatibleMode,
    #[error("message exceeds the {limit} character limit")]
    TooLong { limit: usize },
    #[error("restricted: {reason}")]
    Restricted { reason: String },
}
