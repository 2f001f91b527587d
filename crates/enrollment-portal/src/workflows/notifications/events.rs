use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflows::enrollment::{AppliedTransition, ApplicationId, ApplicationStatus};

/// Ephemeral status-change notice pushed to registered connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub application_id: ApplicationId,
    pub previous_status: ApplicationStatus,
    pub new_status: ApplicationStatus,
    pub timestamp: DateTime<Utc>,
}

impl From<&AppliedTransition> for StatusEvent {
    fn from(transition: &AppliedTransition) -> Self {
        Self {
            application_id: transition.application_id,
            previous_status: transition.previous_status,
            new_status: transition.new_status,
            timestamp: transition.applied_at,
        }
    }
}

/// Frames sent from the server to a real-time client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerMessage {
    StatusUpdated(StatusEvent),
    Error { message: String },
}

/// Frames a real-time client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Register { application_id: ApplicationId },
    Deregister,
}

impl ClientMessage {
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}
