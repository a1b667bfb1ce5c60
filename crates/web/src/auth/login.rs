//! Upstream-backed login
//!
//! A login is accepted only for superusers. The credentials are checked with
//! two sequential lookups (user profile, then its admin group) and a final
//! batch call whose session cookie becomes the stored upstream session.

use super::session::{SessionStore, SessionToken};
use crate::error::ApiError;
use crate::upstream::{Credentials, UpstreamRelay, UpstreamResponse};
use gridshim_common::{retry, BackoffPolicy, Error};
use serde::Deserialize;
use tracing::{info, warn};

/// Login request body
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    #[serde(default)]
    admin_group: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdminGroup {
    #[serde(default)]
    superuser: Option<bool>,
}

/// Validate `request` against the upstream and open a session for it.
pub async fn login(
    relay: &UpstreamRelay,
    sessions: &SessionStore,
    policy: &BackoffPolicy,
    request: &LoginRequest,
) -> Result<SessionToken, ApiError> {
    let credentials = Credentials::Basic {
        username: request.username.clone(),
        password: request.password.clone(),
    };
    let credentials = &credentials;

    // Step 1: user profile -> admin group
    let profile_query: &[(&str, &str)] = &[("_return_fields", "name,admin_group")];
    let profile = retry(
        policy,
        "userprofile lookup",
        move || relay.get("userprofile", profile_query, credentials),
        Error::is_transport,
    )
    .await?;
    let profiles: Vec<UserProfile> = accepted(profile, &request.username)?.json()?;
    let group = profiles
        .into_iter()
        .find_map(|p| p.admin_group)
        .ok_or_else(|| {
            warn!("User {} has no admin group", request.username);
            ApiError::SuperuserRequired
        })?;

    // Step 2: admin group -> superuser flag
    let group_query = [("name", group.as_str()), ("_return_fields", "superuser")];
    let group_query = &group_query[..];
    let admin_group = retry(
        policy,
        "admingroup lookup",
        move || relay.get("admingroup", group_query, credentials),
        Error::is_transport,
    )
    .await?;
    let groups: Vec<AdminGroup> = accepted(admin_group, &request.username)?.json()?;
    let superuser = groups.into_iter().find_map(|g| g.superuser).unwrap_or(false);
    if !superuser {
        warn!(
            "Rejecting login for {}: group {} is not a superuser group",
            request.username, group
        );
        return Err(ApiError::SuperuserRequired);
    }

    // Step 3: open the upstream session
    let grid = retry(
        policy,
        "grid login call",
        move || relay.call("GET", "grid", "name", credentials),
        Error::is_transport,
    )
    .await?;
    if !grid.is_success() {
        warn!("Grid login call for {} returned {}", request.username, grid.status);
        return Err(ApiError::LoginFailed);
    }
    let cookie = grid.cookie.ok_or_else(|| {
        warn!("Grid login call for {} returned no session cookie", request.username);
        ApiError::LoginFailed
    })?;

    let token = sessions.create(cookie);
    info!("Login successful for {}", request.username);
    Ok(token)
}

/// Non-2xx on a credential lookup means the credentials were refused.
fn accepted(response: UpstreamResponse, username: &str) -> Result<UpstreamResponse, ApiError> {
    if response.is_success() {
        Ok(response)
    } else {
        warn!("Upstream refused credentials for {}: {}", username, response.status);
        Err(ApiError::InvalidCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamConfig;
    use axum::extract::State;
    use axum::http::{header::SET_COOKIE, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const PROFILE: &str = "userprofile";
    const GROUP: &str = "admingroup";
    const GRID: &str = "request";

    /// Upstream that counts hits per resource and can stall the first few
    /// requests past the client timeout.
    #[derive(Clone, Default)]
    struct FakeWapi {
        hits: Arc<Mutex<HashMap<&'static str, usize>>>,
        stalls: Arc<Mutex<HashMap<&'static str, usize>>>,
        refuse: Arc<AtomicBool>,
    }

    impl FakeWapi {
        fn stall(&self, resource: &'static str, times: usize) {
            self.stalls.lock().unwrap().insert(resource, times);
        }

        fn hits(&self, resource: &str) -> usize {
            self.hits.lock().unwrap().get(resource).copied().unwrap_or(0)
        }

        async fn hit(&self, resource: &'static str) {
            *self.hits.lock().unwrap().entry(resource).or_default() += 1;
            let stalled = match self.stalls.lock().unwrap().get_mut(resource) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            };
            if stalled {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }

    async fn profile(State(wapi): State<FakeWapi>) -> Response {
        wapi.hit(PROFILE).await;
        if wapi.refuse.load(Ordering::SeqCst) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Json(serde_json::json!([{"name": "admin", "admin_group": "admin-group"}])).into_response()
    }

    async fn group(State(wapi): State<FakeWapi>) -> Response {
        wapi.hit(GROUP).await;
        Json(serde_json::json!([{"superuser": true}])).into_response()
    }

    async fn grid(State(wapi): State<FakeWapi>) -> Response {
        wapi.hit(GRID).await;
        (
            [(SET_COOKIE, "ibapauth=grid-session; path=/; secure")],
            Json(serde_json::json!([[{"name": "Infoblox"}]])),
        )
            .into_response()
    }

    async fn relay_for(wapi: FakeWapi) -> UpstreamRelay {
        let app = Router::new()
            .route("/wapi/v2.12/userprofile", get(profile))
            .route("/wapi/v2.12/admingroup", get(group))
            .route("/wapi/v2.12/request", post(grid))
            .with_state(wapi);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        UpstreamRelay::new(UpstreamConfig {
            base_url: format!("http://{}", addr),
            wapi_version: "v2.12".to_string(),
            timeout: Duration::from_millis(250),
        })
        .unwrap()
    }

    /// Same shape as the login policy, scaled down: 4 attempts in total.
    fn short_policy() -> BackoffPolicy {
        BackoffPolicy::exponential(Duration::from_millis(20), Duration::from_millis(80))
    }

    fn admin() -> LoginRequest {
        LoginRequest {
            username: "admin".to_string(),
            password: "infoblox".to_string(),
        }
    }

    #[tokio::test]
    async fn test_transport_errors_retried_on_every_step() {
        let wapi = FakeWapi::default();
        wapi.stall(PROFILE, 2);
        wapi.stall(GROUP, 1);
        wapi.stall(GRID, 1);
        let relay = relay_for(wapi.clone()).await;
        let sessions = SessionStore::new();

        let token = login(&relay, &sessions, &short_policy(), &admin())
            .await
            .unwrap();

        assert_eq!(wapi.hits(PROFILE), 3);
        assert_eq!(wapi.hits(GROUP), 2);
        assert_eq!(wapi.hits(GRID), 2);
        assert_eq!(sessions.load(&token).as_deref(), Some("ibapauth=grid-session"));
    }

    #[tokio::test]
    async fn test_refused_credentials_hit_upstream_once() {
        let wapi = FakeWapi::default();
        wapi.refuse.store(true, Ordering::SeqCst);
        let relay = relay_for(wapi.clone()).await;
        let sessions = SessionStore::new();

        let err = login(&relay, &sessions, &short_policy(), &admin())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::InvalidCredentials));
        assert_eq!(wapi.hits(PROFILE), 1);
        assert_eq!(wapi.hits(GROUP), 0);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_login() {
        let wapi = FakeWapi::default();
        wapi.stall(PROFILE, 10);
        let relay = relay_for(wapi.clone()).await;
        let sessions = SessionStore::new();

        let err = login(&relay, &sessions, &short_policy(), &admin())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Upstream(_)));
        assert_eq!(wapi.hits(PROFILE), 4);
        assert_eq!(wapi.hits(GROUP), 0);
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_login_policy_window() {
        let mut state = BackoffPolicy::login().start();
        let delays: Vec<_> = std::iter::from_fn(|| state.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120)
            ]
        );
    }

    #[test]
    fn test_login_request_decoding() {
        let req: LoginRequest =
            serde_json::from_str(r#"{"username": "admin", "password": "infoblox"}"#).unwrap();
        assert_eq!(req.username, "admin");
        assert!(serde_json::from_str::<LoginRequest>(r#"{"username": "admin"}"#).is_err());
    }

    #[test]
    fn test_refused_lookup_is_invalid_credentials() {
        let response = UpstreamResponse {
            status: 401,
            body: Bytes::new(),
            cookie: None,
        };
        let err = accepted(response, "admin").unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
    }

    #[test]
    fn test_profile_and_group_shapes() {
        let profiles: Vec<UserProfile> = serde_json::from_str(
            r#"[{"_ref": "userprofile/x", "name": "admin", "admin_group": "admin-group"}]"#,
        )
        .unwrap();
        assert_eq!(profiles[0].admin_group.as_deref(), Some("admin-group"));

        let groups: Vec<AdminGroup> =
            serde_json::from_str(r#"[{"_ref": "admingroup/y", "superuser": false}]"#).unwrap();
        assert_eq!(groups[0].superuser, Some(false));
    }
}
