use serde_json::{json, Value};
use shared::{
    domain::{ParticipantId, PermissionCategory},
    protocol::PermissionPromptEntry,
};

/// One aggregated, user-facing permission prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionPrompt {
    pub source: ParticipantId,
    pub batches: Vec<PermissionBatch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionBatch {
    pub category: PermissionCategory,
    pub requests: Vec<PermissionRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub name: String,
    pub config: Value,
}

/// Fold raw `(requirement, resolved config)` tuples into per-category
/// batches. Null configs take the category default; an input that groups to
/// nothing yields no prompt at all.
pub fn aggregate(
    source: ParticipantId,
    entries: Vec<PermissionPromptEntry>,
) -> Option<PermissionPrompt> {
    let mut batches: Vec<PermissionBatch> = Vec::new();

    for entry in entries {
        let category = entry.requirement.category;
        let request = PermissionRequest {
            name: entry.requirement.name,
            config: entry.config.unwrap_or_else(|| default_config(category)),
        };

        match batches.iter_mut().find(|batch| batch.category == category) {
            Some(batch) => batch.requests.push(request),
            None => batches.push(PermissionBatch {
                category,
                requests: vec![request],
            }),
        }
    }

    if batches.is_empty() {
        return None;
    }

    Some(PermissionPrompt { source, batches })
}

fn default_config(category: PermissionCategory) -> Value {
    match category {
        PermissionCategory::Actions => json!({ "autoConfirm": false }),
        PermissionCategory::Inventory => json!({ "shared": false }),
        PermissionCategory::Social => json!({ "visible": true }),
    }
}
