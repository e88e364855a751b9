//! Admission and startup of authenticated connections.
//!
//! The HTTP layer hands every upgrade request here twice: once before the
//! upgrade to decide whether it may proceed, and once after with the split
//! transport.

use std::sync::Arc;

use beacon_core::{Connection, ConnectionConfig, ConnectionKey, Hub, Identity};
use beacon_transport::{FrameSink, FrameStream};
use tracing::{debug, info, warn};

use crate::auth::{AuthError, Authenticator};
use crate::metrics::{self, ConnectionMetricsGuard};

/// Authenticates upgrade requests and starts connections on the hub.
#[derive(Clone)]
pub struct Dispatcher {
    hub: Hub,
    auth: Arc<dyn Authenticator>,
    connection: ConnectionConfig,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(hub: Hub, auth: Arc<dyn Authenticator>, connection: ConnectionConfig) -> Self {
        Self {
            hub,
            auth,
            connection,
        }
    }

    /// The hub connections are registered with.
    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Limits applied to every connection.
    #[must_use]
    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.connection
    }

    /// Decide whether an upgrade may proceed.
    ///
    /// Nothing is registered here; a rejected request leaves the hub
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingToken`] when `token` is absent or empty,
    /// otherwise whatever the authenticator reports.
    pub fn admit(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            metrics::record_handshake_rejected("missing_token");
            debug!("Rejected upgrade without token");
            return Err(AuthError::MissingToken);
        };

        self.auth.validate(token).map_err(|e| {
            match e {
                AuthError::ExpiredToken => {
                    metrics::record_handshake_rejected("expired_token");
                    debug!("Rejected upgrade with expired token");
                }
                _ => {
                    metrics::record_handshake_rejected("invalid_token");
                    warn!("Rejected upgrade with invalid token");
                }
            }
            e
        })
    }

    /// Register a connection for `identity` and run it in the background.
    ///
    /// The connection is registered before this returns, so events delivered
    /// afterwards reach it.
    pub fn attach<S, R>(&self, identity: Identity, sink: S, stream: R) -> ConnectionKey
    where
        S: FrameSink,
        R: FrameStream,
    {
        let remote = stream.remote_addr();
        let conn = Connection::open(identity, sink, stream, self.connection.clone(), &self.hub);
        let key = conn.key().clone();

        info!(connection = %key, remote = ?remote, "Connection registered");

        let task_key = key.clone();
        tokio::spawn(async move {
            let _metrics_guard = ConnectionMetricsGuard::new();
            let reason = conn.run().await;
            info!(connection = %task_key, reason = ?reason, "Connection closed");
        });

        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtAuthenticator;
    use beacon_core::HubStats;
    use beacon_protocol::{kinds, Event};
    use beacon_transport::memory;
    use jsonwebtoken::{encode, get_current_timestamp, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &[u8] = b"dispatch-secret";

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Hub::spawn(),
            Arc::new(JwtAuthenticator::new(SECRET)),
            ConnectionConfig::default(),
        )
    }

    fn token(sub: &str, exp: u64) -> String {
        let claims = json!({ "sub": sub, "exp": exp });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token() {
        let d = dispatcher();
        assert_eq!(d.admit(None), Err(AuthError::MissingToken));
        assert_eq!(d.admit(Some("")), Err(AuthError::MissingToken));
    }

    #[tokio::test]
    async fn test_rejection_leaves_hub_untouched() {
        let d = dispatcher();
        let expired = token("user-1", get_current_timestamp() - 3600);

        assert_eq!(d.admit(Some(&expired)), Err(AuthError::ExpiredToken));
        assert_eq!(d.admit(Some("garbage")), Err(AuthError::InvalidToken));

        d.hub().flush().await;
        assert_eq!(d.hub().stats(), HubStats::default());
    }

    #[tokio::test]
    async fn test_admitted_connection_receives_events() {
        let d = dispatcher();
        let t = token("user-1", get_current_timestamp() + 900);

        let identity = d.admit(Some(&t)).unwrap();
        assert_eq!(identity, Identity::new("user-1"));

        let (sink, stream, mut peer) = memory::pair(16, 4096);
        let key = d.attach(identity.clone(), sink, stream);

        d.hub().flush().await;
        assert!(d.hub().is_online(&identity));
        assert_eq!(d.hub().connections_for(&identity), vec![key.id]);

        d.hub().deliver(
            [identity.clone()],
            Event::new(kinds::FRIEND_REQUEST, json!({ "from": "user-2" })),
        );

        let frame = peer.next_text().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value, json!({ "type": "friend.request", "data": { "from": "user-2" } }));

        peer.hang_up();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                d.hub().flush().await;
                if !d.hub().is_online(&identity) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
