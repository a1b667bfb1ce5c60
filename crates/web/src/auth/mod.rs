//! Browser sessions backed by upstream credentials.
//!
//! - `session`: token → upstream cookie table
//! - `login`: superuser-only login against the upstream
//! - `middleware`: `user-session` cookie enforcement

pub mod login;
pub mod middleware;
pub mod session;

pub use login::{login, LoginRequest};
pub use middleware::{require_session, AuthenticatedSession};
pub use session::{SessionStore, SessionToken, UpstreamCookie};
