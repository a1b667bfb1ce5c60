//! API server
//!
//! Serves the UI backend endpoints and runs as a supervised [`Component`]:
//! each `start` binds a fresh listener and `stop` shuts it down gracefully.

use crate::auth::{self, require_session, AuthenticatedSession, LoginRequest, SessionStore};
use crate::error::ApiError;
use crate::inventory::{self, GRID_DATA_VERSION, MEMBER_FIELDS};
use crate::upstream::{Credentials, UpstreamConfig, UpstreamRelay, UpstreamResponse};
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use gridshim_common::{
    BackoffPolicy, Component, ConfigSnapshot, Error, GridSummary, Node, ParamStore, Result,
    SESSION_COOKIE,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// API server settings
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub address: SocketAddr,
    pub manifest_file: PathBuf,
    pub hotfix_dir: PathBuf,
    pub upstream: UpstreamConfig,
    pub login_policy: BackoffPolicy,
    /// Grace period for in-flight requests on stop
    pub shutdown_timeout: Duration,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 26750)),
            manifest_file: PathBuf::from("/etc/onprem.d/hotfix_manifest.json"),
            hotfix_dir: PathBuf::from("/etc/onprem.d/hotfix/"),
            upstream: UpstreamConfig::default(),
            login_policy: BackoffPolicy::login(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// State shared by all handlers
pub struct AppState {
    pub sessions: SessionStore,
    pub relay: UpstreamRelay,
    pub params: ParamStore,
    pub snapshot: Arc<ConfigSnapshot>,
    pub login_policy: BackoffPolicy,
    pub manifest_file: PathBuf,
    pub hotfix_dir: PathBuf,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Relay a batch call on behalf of `session`. A rotated upstream cookie is
    /// written back to the store; an unauthorized answer drops the session.
    pub async fn relay_for_session(
        &self,
        session: &AuthenticatedSession,
        object: &str,
        return_fields: &str,
    ) -> std::result::Result<UpstreamResponse, ApiError> {
        let credentials = Credentials::Cookie(session.upstream_cookie.clone());
        let response = self
            .relay
            .call("GET", object, return_fields, &credentials)
            .await?;

        if response.status == 401 || response.status == 403 {
            warn!("Upstream rejected session cookie ({}), dropping session", response.status);
            self.sessions.delete(&session.token);
            return Err(ApiError::SessionExpired);
        }
        if let Some(cookie) = &response.cookie {
            self.sessions.store(&session.token, cookie.clone());
        }

        Ok(response.error_for_status()?)
    }
}

/// Build the router over `state`.
pub fn router(state: SharedState) -> Router {
    let protected_routes = Router::new()
        .route("/grid_data", get(grid_data_handler))
        .route("/node_data/:object/:id", get(node_data_handler))
        .route("/list_nodes", get(list_nodes_handler))
        .route("/logout", post(logout_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/health-check", get(health_handler))
        .route("/is_ready", get(ready_handler))
        .route("/cloud_manifest", get(cloud_manifest_handler))
        .route("/login", post(login_handler))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP API as a supervised component
pub struct ApiServer {
    config: ApiServerConfig,
    state: SharedState,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl ApiServer {
    pub fn new(
        config: ApiServerConfig,
        params: ParamStore,
        snapshot: Arc<ConfigSnapshot>,
    ) -> Result<Self> {
        let relay = UpstreamRelay::new(config.upstream.clone())?;
        let state = Arc::new(AppState {
            sessions: SessionStore::new(),
            relay,
            params,
            snapshot,
            login_policy: config.login_policy.clone(),
            manifest_file: config.manifest_file.clone(),
            hotfix_dir: config.hotfix_dir.clone(),
        });

        Ok(Self {
            config,
            state,
            cancel: CancellationToken::new(),
            handle: None,
            local_addr: None,
        })
    }

    /// Address actually bound by the last `start`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.state.sessions
    }
}

#[async_trait]
impl Component for ApiServer {
    fn name(&self) -> &str {
        "api-server"
    }

    async fn init(&mut self) -> Result<()> {
        self.cancel = CancellationToken::new();
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.address)
            .await
            .map_err(|e| Error::LocalResource(format!("bind {}: {}", self.config.address, e)))?;
        let addr = listener.local_addr()?;
        self.local_addr = Some(addr);
        info!("API server listening on http://{}", addr);

        let app = router(self.state.clone());
        let cancel = self.cancel.clone();
        self.handle = Some(tokio::spawn(async move {
            if cancel.is_cancelled() {
                return;
            }
            let shutdown = cancel.clone();
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!("API server failed: {}", e);
            }
            info!("API server stopped");
        }));

        Ok(())
    }

    fn check(&self) -> bool {
        self.state.params.is_eligible_node() && self.state.params.opted_in()
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        let Some(mut handle) = self.handle.take() else {
            return;
        };

        if tokio::time::timeout(self.config.shutdown_timeout, &mut handle)
            .await
            .is_err()
        {
            warn!(
                "API server did not stop within {:?}, aborting",
                self.config.shutdown_timeout
            );
            handle.abort();
        }
    }

    fn is_up(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "API is up and running")
}

async fn ready_handler() -> StatusCode {
    StatusCode::OK
}

async fn cloud_manifest_handler(
    State(state): State<SharedState>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(inventory::read_manifest(&state.manifest_file).await?))
}

async fn login_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
    body: Bytes,
) -> std::result::Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    let request: LoginRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::InvalidPayload)?;

    let token = auth::login(&state.relay, &state.sessions, &state.login_policy, &request).await?;

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .build();
    Ok((
        jar.add(cookie),
        Json(serde_json::json!({ "message": "login successful" })),
    ))
}

async fn logout_handler(
    State(state): State<SharedState>,
    Extension(session): Extension<AuthenticatedSession>,
) -> StatusCode {
    state.sessions.delete(&session.token);
    info!("Session logged out");
    StatusCode::OK
}

async fn grid_data_handler(
    State(state): State<SharedState>,
    Extension(session): Extension<AuthenticatedSession>,
) -> std::result::Result<Json<GridSummary>, ApiError> {
    let response = state.relay_for_session(&session, "grid", "name").await?;
    let grid_name = inventory::parse_grid_name(&response)?;
    let identity = state.snapshot.grid_identity();

    Ok(Json(GridSummary {
        version: GRID_DATA_VERSION.to_string(),
        nios_version: identity.nios_version,
        grid_name,
        grid_uuid: identity.grid_uuid,
    }))
}

async fn node_data_handler(
    State(state): State<SharedState>,
    Extension(session): Extension<AuthenticatedSession>,
    Path((object, id)): Path<(String, String)>,
) -> std::result::Result<Json<Node>, ApiError> {
    let unique_id = format!("{}/{}", object, id);
    let response = state.relay_for_session(&session, "member", MEMBER_FIELDS).await?;
    let members = inventory::parse_members(&response)?;

    let member = inventory::find_member(members, &unique_id)
        .ok_or_else(|| ApiError::NodeNotFound(unique_id.clone()))?;
    let mut node = member.to_node(&state.params.hardware_id());
    node.hotfixes = inventory::load_hotfixes(&state.hotfix_dir, &node.hostname).await?;

    Ok(Json(node))
}

async fn list_nodes_handler(
    State(state): State<SharedState>,
    Extension(session): Extension<AuthenticatedSession>,
) -> std::result::Result<Json<Vec<Node>>, ApiError> {
    let response = state.relay_for_session(&session, "member", MEMBER_FIELDS).await?;
    let hwid = state.params.hardware_id();
    let nodes = inventory::parse_members(&response)?
        .iter()
        .map(|member| member.to_node(&hwid))
        .collect();

    Ok(Json(nodes))
}
