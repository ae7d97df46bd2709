//! Wire envelope delivered to every recipient of a broadcast.
//!
//! ```json
//! {"type": "price_update", "user_id": "6f1c…", "payload": {"symbol": "BTC"}}
//! ```
//!
//! `user_id` is present only on user-targeted messages. A broadcast to every
//! connection omits the field entirely rather than sending `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::ids::UserId;

/// A message type tag, an optional target user, and an opaque payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag (e.g. `"price_update"`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Target user. `None` means every active connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Application payload.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Envelope addressed to every connection of `user_id`.
    pub fn to_user(user_id: UserId, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            user_id: Some(user_id),
            payload,
        }
    }

    /// Envelope addressed to every active connection.
    pub fn to_all(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            user_id: None,
            payload,
        }
    }

    /// Whether this envelope targets a single user.
    pub fn is_targeted(&self) -> bool {
        self.user_id.is_some()
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON wire form.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
