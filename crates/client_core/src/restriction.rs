use serde_json::Value;
use shared::{domain::GameActionOperation, protocol::OutgoingSegment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestrictionVerdict {
    Ok,
    Blocked { reason: String },
}

/// Synchronous pre-flight check for outgoing content, evaluated before any
/// id is allocated or request dispatched so a rejection leaves no trace.
/// Implemented by the external permission engine; this crate only carries
/// the seam and a permissive default.
pub trait RestrictionEvaluator: Send + Sync {
    fn check_message(&self, segment: &OutgoingSegment) -> RestrictionVerdict;

    /// Game-action requests run through the same gate. Evaluators that only
    /// care about chat content inherit the allow-all default.
    fn check_action(
        &self,
        _operation: GameActionOperation,
        _action: Option<&Value>,
    ) -> RestrictionVerdict {
        RestrictionVerdict::Ok
    }
}

pub struct PassthroughRestriction;

impl RestrictionEvaluator for PassthroughRestriction {
    fn check_message(&self, _segment: &OutgoingSegment) -> RestrictionVerdict {
        RestrictionVerdict::Ok
    }
}
