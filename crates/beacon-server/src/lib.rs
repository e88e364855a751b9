//! # beacon-server
//!
//! HTTP front end for the Beacon hub: token admission, the WebSocket upgrade
//! endpoint, configuration and metrics.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod metrics;

pub use crate::auth::{AuthError, Authenticator, Claims, JwtAuthenticator};
pub use crate::config::Config;
pub use crate::dispatch::Dispatcher;
pub use crate::handlers::{build_router, run_server, AppState};
