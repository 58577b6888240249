//! Hive Messages: ephemeral broadcast and assistance traffic

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{HiveState, LivenessStatus};

/// Topic used for assistance requests
pub const ASSISTANCE_TOPIC: &str = "assistance_request";

/// Message delivered through the bus. `target` is `None` for broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiveMessage {
    pub from: String,
    pub topic: String,
    pub target: Option<String>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl HiveMessage {
    pub fn broadcast(from: &str, topic: &str, payload: serde_json::Value) -> Self {
        Self {
            from: from.to_string(),
            topic: topic.to_string(),
            target: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn assistance(from: &str, to: &str, reason: &str) -> Self {
        Self {
            from: from.to_string(),
            topic: ASSISTANCE_TOPIC.to_string(),
            target: Some(to.to_string()),
            payload: serde_json::json!({ "reason": reason }),
            timestamp: Utc::now(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.target.is_none()
    }

    /// Whether subsystem `id` should act on this message
    pub fn is_for(&self, id: &str) -> bool {
        match &self.target {
            None => true,
            Some(target) => target == id,
        }
    }

    /// Reason carried by an assistance request
    pub fn assistance_reason(&self) -> Option<&str> {
        if self.topic != ASSISTANCE_TOPIC {
            return None;
        }
        self.payload.get("reason").and_then(|r| r.as_str())
    }
}

/// Events pushed to bus subscribers
#[derive(Debug, Clone)]
pub enum HiveEvent {
    /// Full snapshot after a state-affecting operation
    State(HiveState),
    /// Broadcast or assistance request
    Message(HiveMessage),
    /// A sweep moved a subsystem between liveness states
    LivenessChanged {
        id: String,
        from: LivenessStatus,
        to: LivenessStatus,
    },
}
