//!
//! sentry_portal HTTP/WS server
//! ----------------------------
//! Axum routes for the portal views: landing, sign-in, sign-up, dashboard,
//! evidence upload and the mock attack predictor.
//!
//! Responsibilities:
//! - Session cookie + per-session CSRF token. Mutating requests from a signed-in
//!   session must echo the token in `x-csrf-token`.
//! - Every protected view goes through the session gate. A missing session is a
//!   303 to `/login` for page loads and a 401 with `redirect` for form posts.
//! - `/ws/session` streams the view state so an open page follows sign-outs and
//!   profile changes made elsewhere.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::error::{AppError, AppResult};
use crate::evidence::{self, EvidenceRegistry, SelectedFile};
use crate::gate::{GateResult, OnMissing, SessionContext, ViewState, LOGIN_PATH};
use crate::identity::{IdentityProvider, LocalIdentityProvider, Session};
use crate::notice::Notice;
use crate::predictor::MockPredictor;
use crate::signup::{self, SignupForm};
use crate::store::{AccountProfile, MemoryStore, RecordStore};

pub const SESSION_COOKIE: &str = "sentry_session";
pub const CSRF_HEADER: &str = "x-csrf-token";
pub const DASHBOARD_PATH: &str = "/dashboard";
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Server-side state held for one session cookie.
#[derive(Debug, Clone)]
pub struct SessionBinding {
    pub csrf: String,
    pub session_id: String,
    pub subject_id: String,
    pub expires_at: Instant,
}

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: SessionContext,
    pub evidence: Arc<EvidenceRegistry>,
    pub predictor: Arc<MockPredictor>,
    /// Session token -> CSRF token and the session it belongs to
    pub bindings: Arc<RwLock<HashMap<String, SessionBinding>>>,
    pub config: Arc<PortalConfig>,
}

impl AppState {
    /// Wire the local collaborators: a memory store (snapshotted under `data_root`
    /// when set) and the local identity provider on top of it.
    pub fn new(config: PortalConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn RecordStore> = match &config.data_root {
            Some(root) => Arc::new(
                MemoryStore::open(root).with_context(|| format!("opening data root {}", root.display()))?,
            ),
            None => Arc::new(MemoryStore::in_memory()),
        };
        let identity = Arc::new(LocalIdentityProvider::new(store.clone(), config.session_ttl()));
        Ok(Self::with_collaborators(config, identity, store))
    }

    pub fn with_collaborators(config: PortalConfig, identity: Arc<dyn IdentityProvider>, store: Arc<dyn RecordStore>) -> Self {
        let evidence = Arc::new(EvidenceRegistry::new(store.clone(), config.max_upload_bytes));
        let predictor = Arc::new(MockPredictor::new(config.predict_delay_min_ms, config.predict_delay_max_ms));
        Self {
            ctx: SessionContext::new(identity, store),
            evidence,
            predictor,
            bindings: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    /// Drop what the server holds for `token`: the CSRF token, the session's
    /// prediction log, and the account's cached evidence listing once none of
    /// the account's sessions remain bound.
    pub fn release(&self, token: &str) -> Option<SessionBinding> {
        let (binding, account_still_bound) = {
            let mut map = self.bindings.write();
            let binding = map.remove(token)?;
            let still = map.values().any(|b| b.subject_id == binding.subject_id);
            (binding, still)
        };
        self.predictor.forget(&binding.session_id);
        if !account_still_bound {
            self.evidence.forget(&binding.subject_id);
        }
        Some(binding)
    }

    /// Release every binding whose session has expired. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .bindings
            .read()
            .iter()
            .filter(|(_, b)| b.expires_at <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in &expired {
            self.release(token);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "sessions.sweep");
        }
        expired.len()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/login", get(login_view).post(login))
        .route("/signup", get(signup_view).post(signup_submit))
        .route("/logout", post(logout))
        .route("/csrf", get(get_csrf))
        .route(DASHBOARD_PATH, get(dashboard))
        .route("/upload-evidence", get(evidence_view).post(evidence_upload))
        .route("/predict-attack", get(predict_view).post(predict_run))
        .route("/ws/session", get(ws_session))
        .with_state(state)
}

/// Bind the configured port and serve until the listener fails.
pub async fn run(config: PortalConfig) -> anyhow::Result<()> {
    config.validate()?;
    let port = config.http_port;
    if !config.secure_cookies {
        warn!("session cookies are sent without the Secure attribute");
    }
    let state = AppState::new(config)?;

    // Expired sessions that never log out are released here
    let sweeper = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            sweeper.sweep_expired();
        }
    });

    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct LoginPayload { email: String, password: String }

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UploadPayload {
    file_name: Option<String>,
    file_type: Option<String>,
    size: Option<u64>,
}

impl UploadPayload {
    fn into_selected(self) -> Option<SelectedFile> {
        let name = self.file_name?;
        Some(SelectedFile { name, media_type: self.file_type, size: self.size })
    }
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        if let Some((k, v)) = part.trim().split_once('=') {
            if k == name && !v.is_empty() { return Some(v.to_string()); }
        }
    }
    None
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    parse_cookie(headers, SESSION_COOKIE)
}

fn set_session_cookie(token: &str, secure: bool) -> AppResult<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!("{}={}; HttpOnly{}; SameSite=Strict; Path=/", SESSION_COOKIE, token, secure))
        .map_err(|_| AppError::internal("cookie_encoding", "session token is not a valid header value"))
}

fn clear_session_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static("sentry_session=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Secure; SameSite=Strict; Path=/")
    } else {
        HeaderValue::from_static("sentry_session=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Strict; Path=/")
    }
}

fn new_csrf_token() -> AppResult<String> {
    use std::fmt::Write as _;
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).map_err(|e| AppError::internal("rng_unavailable", e.to_string()))?;
    let mut csrf = String::with_capacity(64);
    for b in &bytes { let _ = write!(&mut csrf, "{:02x}", b); }
    Ok(csrf)
}

fn csrf_ok(state: &AppState, headers: &HeaderMap, token: &str) -> bool {
    let Some(provided) = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()) else { return false; };
    state.bindings.read().get(token).is_some_and(|b| b.csrf == provided)
}

/// Bind a CSRF token to a fresh session and build the cookie header for it.
fn establish(state: &AppState, session: &Session) -> AppResult<(HeaderMap, String)> {
    state.sweep_expired();
    let csrf = new_csrf_token()?;
    let binding = SessionBinding {
        csrf: csrf.clone(),
        session_id: session.session_id.clone(),
        subject_id: session.subject.id.clone(),
        expires_at: session.expires_at,
    };
    state.bindings.write().insert(session.token.clone(), binding);
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, set_session_cookie(&session.token, state.config.secure_cookies)?);
    Ok((headers, csrf))
}

/// Error body carrying the notice the view should show.
fn failure(err: &AppError, title: &str) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "status": "error",
        "code": err.code_str(),
        "message": err.message(),
        "notice": err.notice(title),
    });
    (status, Json(body)).into_response()
}

/// Unparseable form body, reported like any other form failure.
fn bad_body(rejection: JsonRejection, title: &str) -> Response {
    failure(&AppError::user("invalid_body", rejection.body_text()), title)
}

fn unauthenticated() -> Response {
    let body = json!({
        "status": "unauthorized",
        "code": "no_session",
        "message": "Sign in to continue.",
        "redirect": LOGIN_PATH,
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

async fn gate(state: &AppState, headers: &HeaderMap, on_missing: OnMissing) -> GateResult {
    let token = session_token(headers);
    state.ctx.resolve(token.as_deref(), on_missing).await
}

/// Session and profile for a protected page load, or the redirect to sign-in.
async fn protected_view(state: &AppState, headers: &HeaderMap) -> Result<(Session, Option<AccountProfile>), Response> {
    match gate(state, headers, OnMissing::RedirectToLogin).await {
        GateResult::Authenticated { session, profile } => Ok((session, profile)),
        GateResult::Unauthenticated { .. } => Err(Redirect::to(LOGIN_PATH).into_response()),
    }
}

/// Session for a mutating request: must be signed in and carry the CSRF token.
async fn protected_action(state: &AppState, headers: &HeaderMap) -> Result<(Session, Option<AccountProfile>), Response> {
    let (session, profile) = match gate(state, headers, OnMissing::RedirectToLogin).await {
        GateResult::Authenticated { session, profile } => (session, profile),
        GateResult::Unauthenticated { .. } => return Err(unauthenticated()),
    };
    if !csrf_ok(state, headers, &session.token) {
        return Err(AppError::csrf("invalid_csrf", "invalid csrf").into_response());
    }
    Ok((session, profile))
}

async fn landing(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = gate(&state, &headers, OnMissing::Stay).await;
    if let GateResult::Authenticated { profile: Some(_), .. } = &result {
        return Redirect::to(DASHBOARD_PATH).into_response();
    }
    Json(json!({"status": "ok", "view": result.view()})).into_response()
}

async fn login_view(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let GateResult::Authenticated { .. } = gate(&state, &headers, OnMissing::Stay).await {
        return Redirect::to(DASHBOARD_PATH).into_response();
    }
    Json(json!({"status": "ok", "view": ViewState::default()})).into_response()
}

async fn login(State(state): State<AppState>, payload: Result<Json<LoginPayload>, JsonRejection>) -> Response {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(rejection) => return bad_body(rejection, "Login Failed"),
    };
    let session = match state.ctx.identity().sign_in(&payload.email, &payload.password).await {
        Ok(s) => s,
        Err(e) => {
            warn!(code = e.code_str(), "login rejected");
            return failure(&e, "Login Failed");
        }
    };
    match establish(&state, &session) {
        Ok((headers, csrf)) => {
            info!(subject = %session.subject.id, "login");
            (StatusCode::OK, headers, Json(json!({"status": "ok", "csrf": csrf, "navigate": DASHBOARD_PATH}))).into_response()
        }
        Err(e) => failure(&e, "Login Failed"),
    }
}

async fn signup_view() -> Response {
    Json(json!({"status": "ok", "roles": signup::role_options()})).into_response()
}

async fn signup_submit(State(state): State<AppState>, form: Result<Json<SignupForm>, JsonRejection>) -> Response {
    let Json(form) = match form {
        Ok(f) => f,
        Err(rejection) => return bad_body(rejection, "Signup Failed"),
    };
    let outcome = match signup::submit(state.ctx.identity().as_ref(), &form).await {
        Ok(o) => o,
        Err(e) => return failure(&e, signup::failure_title(&e)),
    };
    match establish(&state, &outcome.session) {
        Ok((headers, csrf)) => {
            info!(subject = %outcome.session.subject.id, role = form.role.as_str(), "signup");
            let body = json!({"status": "ok", "csrf": csrf, "notice": outcome.notice, "navigate": outcome.navigate});
            (StatusCode::OK, headers, Json(body)).into_response()
        }
        Err(e) => failure(&e, "Signup Error"),
    }
}

/// Sign out the cookie's session. Works on expired sessions too: the provider's
/// complaint becomes the notice and local state is released either way.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else { return unauthenticated(); };
    if !state.bindings.read().contains_key(&token) {
        // Nothing held for this cookie any more; the browser should drop it too
        let mut resp = unauthenticated();
        resp.headers_mut().insert(header::SET_COOKIE, clear_session_cookie(state.config.secure_cookies));
        return resp;
    }
    if !csrf_ok(&state, &headers, &token) {
        return AppError::csrf("invalid_csrf", "invalid csrf").into_response();
    }
    let notice = match state.ctx.identity().sign_out(&token).await {
        Ok(()) => Notice::info("Logged Out", "You have been successfully logged out."),
        Err(e) => {
            warn!(code = e.code_str(), "logout error: {}", e.message());
            e.notice("Logout Error")
        }
    };
    if let Some(binding) = state.release(&token) {
        info!(subject = %binding.subject_id, sid = %binding.session_id, "logout");
    }
    let mut h = HeaderMap::new();
    h.insert(header::SET_COOKIE, clear_session_cookie(state.config.secure_cookies));
    (StatusCode::OK, h, Json(json!({"status": "ok", "notice": notice, "redirect": LOGIN_PATH}))).into_response()
}

async fn get_csrf(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let GateResult::Authenticated { session, .. } = gate(&state, &headers, OnMissing::Stay).await else {
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": "unauthorized"}))).into_response();
    };
    if let Some(binding) = state.bindings.read().get(&session.token) {
        return (StatusCode::OK, Json(json!({"status": "ok", "csrf": binding.csrf}))).into_response();
    }
    (StatusCode::UNAUTHORIZED, Json(json!({"status": "unauthorized"}))).into_response()
}

async fn dashboard(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session, profile) = match protected_view(&state, &headers).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role_display = profile.as_ref().map(|p| p.role.display_name());
    let view = GateResult::Authenticated { session, profile }.view();
    Json(json!({"status": "ok", "view": view, "role_display": role_display})).into_response()
}

async fn evidence_view(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session, _) = match protected_view(&state, &headers).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let account = &session.subject.id;
    let busy = state.evidence.is_busy(account);
    match state.evidence.fetch_evidences(account).await {
        Ok(rows) => {
            Json(json!({"status": "ok", "evidences": rows, "busy": busy, "accept": evidence::ACCEPT_HINT})).into_response()
        }
        Err(e) => {
            let rows = state.evidence.cached(account);
            let body = json!({
                "status": "ok",
                "evidences": rows,
                "busy": busy,
                "accept": evidence::ACCEPT_HINT,
                "notice": e.notice("Error"),
            });
            Json(body).into_response()
        }
    }
}

async fn evidence_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<UploadPayload>, JsonRejection>,
) -> Response {
    let (session, _) = match protected_action(&state, &headers).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(rejection) => return bad_body(rejection, "Upload Failed"),
    };
    match state.evidence.submit(&session.subject.id, payload.into_selected()).await {
        Ok(out) => {
            let body = json!({
                "status": "ok",
                "record": out.record,
                "evidences": out.evidences,
                "notice": out.notice,
                "refresh_notice": out.refresh_notice,
            });
            Json(body).into_response()
        }
        Err(e) => failure(&e, evidence::failure_title(&e)),
    }
}

async fn predict_view(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session, _) = match protected_view(&state, &headers).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let results = state.predictor.results(&session.session_id);
    let busy = state.predictor.is_busy(&session.session_id);
    Json(json!({"status": "ok", "results": results, "busy": busy})).into_response()
}

async fn predict_run(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session, _) = match protected_action(&state, &headers).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.predictor.predict(&session.session_id).await {
        Ok((result, notice)) => {
            let results = state.predictor.results(&session.session_id);
            Json(json!({"status": "ok", "result": result, "results": results, "notice": notice})).into_response()
        }
        Err(e) => failure(&e, "Analysis Unavailable"),
    }
}

async fn ws_session(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    let Some(token) = session_token(&headers) else { return unauthenticated(); };
    ws.on_upgrade(move |socket| stream_view_state(state, token, socket))
}

async fn send_view(socket: &mut WebSocket, view: &ViewState) -> bool {
    let text = json!({"status": "ok", "view": view}).to_string();
    socket.send(Message::Text(text.into())).await.is_ok()
}

/// Push the current view state, then every change, until the session ends or the peer leaves.
async fn stream_view_state(state: AppState, token: String, mut socket: WebSocket) {
    let mut watch = state.ctx.watch(Some(token), OnMissing::RedirectToLogin).await;
    let first = watch.current();
    if !send_view(&mut socket, &first).await || first.redirect.is_some() {
        return;
    }
    loop {
        tokio::select! {
            changed = watch.changed() => {
                let Some(view) = changed else { break };
                let ended = view.redirect.is_some();
                if !send_view(&mut socket, &view).await || ended { break; }
            }
            msg = socket.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
