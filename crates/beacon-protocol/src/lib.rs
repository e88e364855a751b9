//! # beacon-protocol
//!
//! Wire format for the Beacon notification hub.
//!
//! Every message pushed to a client is a single JSON object carried in one
//! text frame:
//!
//! ```json
//! { "type": "friend.request", "data": { "id": "..." } }
//! ```
//!
//! Heartbeats are transport-level ping/pong frames and never appear in the
//! envelope.
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, kinds, Event};
//! use serde_json::json;
//!
//! let event = Event::new(kinds::STATUS_UPDATE, json!({ "status": "focus" }));
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod event;

pub use codec::{decode, encode, ProtocolError, MAX_FRAME_SIZE};
pub use event::{kinds, Event};
