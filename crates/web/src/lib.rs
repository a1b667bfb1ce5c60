//! gridshim Web API
//!
//! HTTP backend for the grid management UI: superuser login against the
//! upstream management API, cookie sessions, and grid/node inventory relayed
//! from the upstream.

pub mod auth;
pub mod error;
pub mod inventory;
pub mod server;
pub mod upstream;

pub use auth::{AuthenticatedSession, LoginRequest, SessionStore};
pub use error::ApiError;
pub use server::{router, ApiServer, ApiServerConfig, AppState, SharedState};
pub use upstream::{Credentials, UpstreamConfig, UpstreamRelay, UpstreamResponse};
