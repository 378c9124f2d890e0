use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{AdCopy, Field};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    InputChanged { session_id: Uuid, field: Field },
    Loading { session_id: Uuid, request_id: u64 },
    Succeeded { session_id: Uuid, request_id: u64, copy: AdCopy },
    Failed { session_id: Uuid, request_id: u64, error: String },
    /// A response arrived for a request that is no longer the latest one and was dropped.
    Superseded { session_id: Uuid, request_id: u64 },
    Cleared { session_id: Uuid },
    /// Sent to a viewer that fell behind the channel and may have missed events.
    Resync { session_id: Uuid },
}

impl SessionEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            SessionEvent::InputChanged { session_id, .. }
            | SessionEvent::Loading { session_id, .. }
            | SessionEvent::Succeeded { session_id, .. }
            | SessionEvent::Failed { session_id, .. }
            | SessionEvent::Superseded { session_id, .. }
            | SessionEvent::Cleared { session_id }
            | SessionEvent::Resync { session_id } => *session_id,
        }
    }
}
