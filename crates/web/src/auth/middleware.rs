//! Session middleware for Axum.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use gridshim_common::SESSION_COOKIE;
use tracing::{debug, warn};

use super::session::{SessionStore, SessionToken, UpstreamCookie};
use crate::error::ApiError;
use crate::server::SharedState;

/// Extension holding the caller's session
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub token: SessionToken,
    pub upstream_cookie: UpstreamCookie,
}

/// Resolve the `user-session` cookie of a request against the store.
pub fn resolve_session(
    sessions: &SessionStore,
    jar: &CookieJar,
) -> Result<AuthenticatedSession, ApiError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(ApiError::MissingSession)?;

    match sessions.load(&token) {
        Some(upstream_cookie) => Ok(AuthenticatedSession {
            token,
            upstream_cookie,
        }),
        None => {
            warn!("Unknown or expired session presented");
            Err(ApiError::SessionExpired)
        }
    }
}

/// Middleware that requires a live session
pub async fn require_session(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(request.headers());

    match resolve_session(&state.sessions, &jar) {
        Ok(session) => {
            debug!("Request {} on a live session", request.uri().path());
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
