//! Event envelope types.
//!
//! An event is a kind tag plus an arbitrary JSON payload. Events are
//! immutable once built; the hub serializes each one exactly once no matter
//! how many connections it fans out to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::ProtocolError;

/// Event kinds emitted by the application's notification producers.
pub mod kinds {
    /// A friend request was sent to the target user.
    pub const FRIEND_REQUEST: &str = "friend.request";
    /// A friend request sent by the target user was accepted.
    pub const FRIEND_ACCEPTED: &str = "friend.accepted";
    /// A friend changed their status.
    pub const STATUS_UPDATE: &str = "status.update";
}

/// A typed notification.
///
/// Serializes as `{"type": <kind>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Notification kind, e.g. `"friend.request"`.
    #[serde(rename = "type")]
    kind: String,
    /// Opaque payload.
    #[serde(default)]
    data: Value,
}

impl Event {
    /// Create an event from an already-built JSON payload.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Create an event from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON
    /// (for example a map with non-string keys).
    pub fn from_payload<T: Serialize>(
        kind: impl Into<String>,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        let data = serde_json::to_value(payload).map_err(ProtocolError::Encode)?;
        Ok(Self::new(kind, data))
    }

    /// Create an event with no payload.
    #[must_use]
    pub fn signal(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }

    /// The event kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The event payload.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }
}
