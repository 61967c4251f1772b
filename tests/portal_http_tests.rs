//! Portal HTTP integration tests: sign-up, sign-in, the session gate on every
//! protected view, CSRF on mutations, evidence listing and the mock predictor.
//! Requests go through the real router in-process via `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use sentry_portal::config::PortalConfig;
use sentry_portal::identity::{LocalIdentityProvider, PasswordHasher};
use sentry_portal::server::{router, AppState, CSRF_HEADER};
use sentry_portal::store::{MemoryStore, RecordStore};

fn app() -> Router {
    router(state_with_ttl(Duration::from_secs(600)))
}

fn state_with_ttl(ttl: Duration) -> AppState {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::in_memory());
    let identity = Arc::new(LocalIdentityProvider::new(store.clone(), ttl).with_hasher(PasswordHasher::low_cost()));
    AppState::with_collaborators(PortalConfig::for_tests(), identity, store)
}

struct Reply {
    status: StatusCode,
    location: Option<String>,
    cookie: Option<String>,
    body: Value,
}

async fn send(app: &Router, req: Request<Body>) -> Reply {
    let resp = app.clone().oneshot(req).await.expect("router is infallible");
    let status = resp.status();
    let location = resp.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()).map(String::from);
    let cookie = resp.headers().get(header::SET_COOKIE).and_then(|v| v.to_str().ok()).map(String::from);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json body") };
    Reply { status, location, cookie, body }
}

/// Signed-in client: session cookie plus its CSRF token.
#[derive(Clone)]
struct Client { cookie: String, csrf: String }

impl Client {
    fn from_reply(r: &Reply) -> Self {
        let set = r.cookie.as_deref().expect("set-cookie");
        let pair = set.split(';').next().expect("cookie pair").to_string();
        Client { cookie: pair, csrf: r.body["csrf"].as_str().expect("csrf").to_string() }
    }

    fn get(&self, uri: &str) -> Request<Body> {
        Request::get(uri).header(header::COOKIE, &self.cookie).body(Body::empty()).unwrap()
    }

    fn post(&self, uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::COOKIE, &self.cookie)
            .header(CSRF_HEADER, &self.csrf)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri).header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())).unwrap()
}

async fn signup_personnel(app: &Router, email: &str) -> Client {
    let r = send(app, post_json("/signup", json!({
        "role": "personnel",
        "email": email,
        "password": "hunter22",
        "name": "Arjun Rao",
        "service_number": "IC-55021",
    }))).await;
    assert_eq!(r.status, StatusCode::OK, "signup body: {}", r.body);
    Client::from_reply(&r)
}

#[tokio::test]
async fn signup_signs_in_and_lands_on_dashboard() {
    let app = app();
    let r = send(&app, post_json("/signup", json!({
        "role": "personnel",
        "email": "  Arjun@Example.org ",
        "password": "hunter22",
        "name": "Arjun Rao",
        "service_number": "IC-55021",
        // Irrelevant to the chosen role: never stored
        "ppo_number": "PPO-1",
    }))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["navigate"], "/");
    assert_eq!(r.body["notice"]["title"], "Account Created Successfully");
    let cookie = r.cookie.clone().unwrap();
    assert!(cookie.starts_with("sentry_session=") && cookie.contains("HttpOnly") && cookie.contains("SameSite=Strict"));
    let client = Client::from_reply(&r);

    let landing = send(&app, client.get("/")).await;
    assert_eq!(landing.status, StatusCode::SEE_OTHER);
    assert_eq!(landing.location.as_deref(), Some("/dashboard"));

    let dash = send(&app, client.get("/dashboard")).await;
    assert_eq!(dash.status, StatusCode::OK);
    assert_eq!(dash.body["role_display"], "Serving Personnel");
    let profile = &dash.body["view"]["profile"];
    assert_eq!(profile["email"], "arjun@example.org");
    assert_eq!(profile["service_number"], "IC-55021");
    assert!(profile.get("ppo_number").is_none());
}

#[tokio::test]
async fn signup_validation_stops_before_provider() {
    let app = app();
    let r = send(&app, post_json("/signup", json!({
        "role": "veteran",
        "email": "old.soldier@example.org",
        "password": "hunter22",
        "name": "K. Singh",
        "ppo_number": "   ",
    }))).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    assert_eq!(r.body["notice"]["title"], "PPO Number Required");
    assert_eq!(r.body["notice"]["variant"], "destructive");
    assert!(r.cookie.is_none());

    // No account was created
    let login = send(&app, post_json("/login", json!({"email": "old.soldier@example.org", "password": "hunter22"}))).await;
    assert_eq!(login.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(login.body["message"], "Invalid login credentials");

    let missing = send(&app, post_json("/signup", json!({"role": "civilian", "email": "a@b.org", "password": "", "name": "A"}))).await;
    assert_eq!(missing.body["notice"]["title"], "Missing Information");
}

#[tokio::test]
async fn duplicate_signup_reports_provider_message() {
    let app = app();
    signup_personnel(&app, "dup@example.org").await;
    let r = send(&app, post_json("/signup", json!({
        "role": "civilian", "email": "DUP@example.org", "password": "another1", "name": "Someone",
    }))).await;
    assert_eq!(r.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(r.body["notice"]["title"], "Signup Failed");
    assert_eq!(r.body["notice"]["description"], "User already registered");
}

#[tokio::test]
async fn protected_views_require_a_session() {
    let app = app();
    for uri in ["/dashboard", "/upload-evidence", "/predict-attack"] {
        let r = send(&app, Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(r.status, StatusCode::SEE_OTHER, "{uri}");
        assert_eq!(r.location.as_deref(), Some("/login"), "{uri}");
    }
    let r = send(&app, post_json("/predict-attack", json!({}))).await;
    assert_eq!(r.status, StatusCode::UNAUTHORIZED);
    assert_eq!(r.body["redirect"], "/login");

    // Public views render without one
    let landing = send(&app, Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(landing.status, StatusCode::OK);
    assert!(landing.body["view"]["subject"].is_null());
    let roles = send(&app, Request::get("/signup").body(Body::empty()).unwrap()).await;
    assert_eq!(roles.body["roles"].as_array().map(|a| a.len()), Some(4));
}

#[tokio::test]
async fn login_issues_csrf_and_mutations_require_it() {
    let app = app();
    signup_personnel(&app, "csrf@example.org").await;
    let r = send(&app, post_json("/login", json!({"email": "csrf@example.org", "password": "hunter22"}))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["navigate"], "/dashboard");
    let client = Client::from_reply(&r);

    let fetched = send(&app, client.get("/csrf")).await;
    assert_eq!(fetched.body["csrf"], client.csrf.as_str());

    let login_page = send(&app, client.get("/login")).await;
    assert_eq!(login_page.status, StatusCode::SEE_OTHER);

    let forged = Client { csrf: "0".repeat(64), ..client.clone() };
    let r = send(&app, forged.post("/upload-evidence", json!({"file_name": "a.txt"}))).await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);
    let listing = send(&app, client.get("/upload-evidence")).await;
    assert_eq!(listing.body["evidences"].as_array().map(|a| a.len()), Some(0));
}

#[tokio::test]
async fn uploads_list_newest_first() {
    let app = app();
    let client = signup_personnel(&app, "evidence@example.org").await;
    let cid = regex::Regex::new(r"^CID[0-9A-Z]{9}$").unwrap();

    let first = send(&app, client.post("/upload-evidence", json!({"file_name": "inbox.eml", "file_type": "message/rfc822", "size": 4096}))).await;
    assert_eq!(first.status, StatusCode::OK, "{}", first.body);
    assert_eq!(first.body["notice"]["title"], "Success");

    let second = send(&app, client.post("/upload-evidence", json!({"file_name": "capture.png"}))).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body["record"]["file_type"], "unknown");

    let listing = send(&app, client.get("/upload-evidence")).await;
    let rows = listing.body["evidences"].as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["file_name"], "capture.png");
    assert_eq!(rows[1]["file_name"], "inbox.eml");
    for row in &rows {
        assert!(cid.is_match(row["cid"].as_str().unwrap_or_default()));
        assert!(["low", "medium", "high"].contains(&row["criticality"].as_str().unwrap_or_default()));
    }

    // Another account sees nothing of this one's evidence
    let other = signup_personnel(&app, "other@example.org").await;
    let theirs = send(&app, other.get("/upload-evidence")).await;
    assert_eq!(theirs.body["evidences"].as_array().map(|a| a.len()), Some(0));

    let none = send(&app, client.post("/upload-evidence", json!({}))).await;
    assert_eq!(none.status, StatusCode::BAD_REQUEST);
    assert_eq!(none.body["notice"]["title"], "Upload Failed");
}

#[tokio::test]
async fn predictions_accumulate_for_the_session() {
    let app = app();
    let client = signup_personnel(&app, "predict@example.org").await;

    let r = send(&app, client.post("/predict-attack", json!({}))).await;
    assert_eq!(r.status, StatusCode::OK);
    let result = &r.body["result"];
    match result["status"].as_str() {
        Some("found") => {
            assert!(result["criticality"].is_string());
            assert!(r.body["notice"]["title"].as_str().unwrap_or_default().contains("Attack Detected"));
        }
        Some("not_found") => {
            assert!(result.get("criticality").is_none());
            assert_eq!(r.body["notice"]["title"], "Analysis Complete");
        }
        other => panic!("unexpected status {other:?}"),
    }

    let second = send(&app, client.post("/predict-attack", json!({}))).await;
    let view = send(&app, client.get("/predict-attack")).await;
    let results = view.body["results"].as_array().cloned().unwrap_or_default();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["id"], second.body["result"]["id"]);
    assert_eq!(results[1]["id"], result["id"]);
}

#[tokio::test]
async fn logout_clears_session_and_results() {
    let app = app();
    let client = signup_personnel(&app, "bye@example.org").await;
    send(&app, client.post("/predict-attack", json!({}))).await;

    let r = send(&app, client.post("/logout", json!({}))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["notice"]["title"], "Logged Out");
    assert!(r.cookie.as_deref().unwrap_or_default().contains("sentry_session=deleted"));

    let dash = send(&app, client.get("/dashboard")).await;
    assert_eq!(dash.status, StatusCode::SEE_OTHER);
    assert_eq!(dash.location.as_deref(), Some("/login"));

    let again = send(&app, client.post("/logout", json!({}))).await;
    assert_eq!(again.status, StatusCode::UNAUTHORIZED);

    // Signing back in starts an empty prediction log
    let login = send(&app, post_json("/login", json!({"email": "bye@example.org", "password": "hunter22"}))).await;
    let fresh = Client::from_reply(&login);
    let view = send(&app, fresh.get("/predict-attack")).await;
    assert_eq!(view.body["results"].as_array().map(|a| a.len()), Some(0));
}

#[tokio::test]
async fn logout_after_expiry_still_clears_everything() {
    let state = state_with_ttl(Duration::from_millis(200));
    let app = router(state.clone());
    let client = signup_personnel(&app, "expired@example.org").await;
    send(&app, client.post("/predict-attack", json!({}))).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let r = send(&app, client.post("/logout", json!({}))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["notice"]["title"], "Logout Error");
    assert_eq!(r.body["notice"]["description"], "Auth session missing!");
    assert_eq!(r.body["redirect"], "/login");
    assert!(r.cookie.as_deref().unwrap_or_default().contains("sentry_session=deleted"));
    assert!(state.bindings.read().is_empty());

    // A stale cookie with nothing bound to it is told to go away as well
    let again = send(&app, client.post("/logout", json!({}))).await;
    assert_eq!(again.status, StatusCode::UNAUTHORIZED);
    assert!(again.cookie.as_deref().unwrap_or_default().contains("sentry_session=deleted"));
}

#[tokio::test]
async fn expired_sessions_are_swept_when_another_signs_in() {
    let state = state_with_ttl(Duration::from_millis(200));
    let app = router(state.clone());
    let first = signup_personnel(&app, "gone@example.org").await;
    send(&app, first.post("/predict-attack", json!({}))).await;
    let sid = state.bindings.read().values().next().map(|b| b.session_id.clone()).expect("binding");
    assert_eq!(state.predictor.results(&sid).len(), 1);
    tokio::time::sleep(Duration::from_millis(300)).await;

    signup_personnel(&app, "next@example.org").await;
    assert_eq!(state.bindings.read().len(), 1);
    assert!(state.predictor.results(&sid).is_empty());
}

#[tokio::test]
async fn csrf_is_withheld_once_the_session_expires() {
    let app = router(state_with_ttl(Duration::from_millis(200)));
    let client = signup_personnel(&app, "stale@example.org").await;
    let live = send(&app, client.get("/csrf")).await;
    assert_eq!(live.status, StatusCode::OK);
    assert_eq!(live.body["csrf"], client.csrf.as_str());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let r = send(&app, client.get("/csrf")).await;
    assert_eq!(r.status, StatusCode::UNAUTHORIZED);
    assert!(r.body.get("csrf").is_none());
}

#[tokio::test]
async fn unreadable_bodies_get_the_form_failure_shape() {
    let app = app();
    let r = send(&app, post_json("/signup", json!({
        "role": "admiral",
        "email": "x@example.org",
        "password": "hunter22",
        "name": "X",
    }))).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    assert_eq!(r.body["code"], "invalid_body");
    assert_eq!(r.body["notice"]["title"], "Signup Failed");

    let bad_login = Request::post("/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"email\": "))
        .unwrap();
    let r = send(&app, bad_login).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    assert_eq!(r.body["notice"]["title"], "Login Failed");

    let client = signup_personnel(&app, "body@example.org").await;
    let r = send(&app, client.post("/upload-evidence", json!({"size": "big"}))).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    assert_eq!(r.body["notice"]["title"], "Upload Failed");
}

#[tokio::test]
async fn evidence_view_carries_the_picker_hint() {
    let app = app();
    let client = signup_personnel(&app, "hint@example.org").await;
    let r = send(&app, client.get("/upload-evidence")).await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body["accept"].as_str().unwrap_or_default().contains(".pdf"));

    // The hint is advisory; other names are accepted
    let up = send(&app, client.post("/upload-evidence", json!({"file_name": "capture.pcap", "size": 64}))).await;
    assert_eq!(up.status, StatusCode::OK);
}
