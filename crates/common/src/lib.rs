//! gridshim Common Library
//!
//! Shared types, retry policies, the component lifecycle contract and the
//! collaborator interfaces used by the gridshim daemon and its web API.

pub mod backoff;
pub mod component;
pub mod error;
pub mod invoker;
pub mod params;
pub mod types;

// Re-export commonly used types
pub use backoff::{retry, BackoffPolicy, RetryState};
pub use component::Component;
pub use error::{Error, Result};
pub use invoker::{HttpScriptInvoker, ScriptInvoker, ScriptOutput};
pub use params::{ConfigSnapshot, ParamStore};
pub use types::*;

/// gridshim version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the browser-facing session cookie
pub const SESSION_COOKIE: &str = "user-session";
