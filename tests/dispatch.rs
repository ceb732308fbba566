use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tower::ServiceExt;

use bloat::backend::{AccountBackend, Action, ActionResult, AppRegistration, Frontend, Page};
use bloat::config::ServerConfig;
use bloat::error::{AppError, AppResult};
use bloat::identity::{CsrfGuard, InstanceRef, MemorySessionStore, RequestContext, Session, SessionManager, SessionState, SessionStore};
use bloat::render::BasicRenderer;
use bloat::server::{build_router, AppState};

#[derive(Default)]
struct FakeAccounts {
    exchanged: Mutex<Vec<String>>,
}

#[async_trait]
impl AccountBackend for FakeAccounts {
    async fn register_app(&self, domain: &str) -> AppResult<AppRegistration> {
        Ok(AppRegistration { client_id: format!("cid-{domain}"), client_secret: "csecret".into() })
    }

    fn authorization_url(&self, instance: &InstanceRef, state: &str) -> AppResult<String> {
        Ok(format!("https://{}/oauth/authorize?client_id={}&state={}", instance.domain, instance.client_id, state))
    }

    async fn exchange_code(&self, _instance: &InstanceRef, code: &str) -> AppResult<String> {
        self.exchanged.lock().push(code.to_string());
        if code == "bad" {
            return Err(AppError::backend("remote_rejected", "invalid grant"));
        }
        Ok(format!("token-{code}"))
    }
}

#[derive(Default)]
struct FakeFrontend {
    pages: Mutex<Vec<Page>>,
    actions: Mutex<Vec<String>>,
}

#[async_trait]
impl Frontend for FakeFrontend {
    async fn page(&self, ctx: &RequestContext, page: Page) -> AppResult<String> {
        self.pages.lock().push(page.clone());
        Ok(format!("<p>{page:?}</p><input name=\"csrf_token\" value=\"{}\">", ctx.csrf_token().unwrap_or_default()))
    }

    async fn act(&self, _ctx: &RequestContext, action: Action) -> AppResult<ActionResult> {
        self.actions.lock().push(format!("{action:?}"));
        Ok(match action {
            Action::Like(_) => ActionResult::Count(5),
            Action::Post(p) if p.content.is_empty() => ActionResult::Done,
            Action::Post(_) => ActionResult::Created("99".into()),
            _ => ActionResult::Done,
        })
    }
}

struct Harness {
    app: Router,
    sessions: SessionManager,
    store: MemorySessionStore,
    accounts: Arc<FakeAccounts>,
    frontend: Arc<FakeFrontend>,
}

impl Harness {
    fn new() -> Self { Self::with_config(ServerConfig::default()) }

    fn with_config(cfg: ServerConfig) -> Self {
        let store = MemorySessionStore::new();
        let sessions = SessionManager::new(Arc::new(store.clone()));
        let accounts = Arc::new(FakeAccounts::default());
        let frontend = Arc::new(FakeFrontend::default());
        let state = AppState {
            sessions: sessions.clone(),
            accounts: accounts.clone(),
            frontend: frontend.clone(),
            renderer: Arc::new(BasicRenderer::new().unwrap()),
            config: Arc::new(cfg),
        };
        Self { app: build_router(state), sessions, store, accounts, frontend }
    }

    async fn send(&self, req: Request<Body>) -> Response<Body> { self.app.clone().oneshot(req).await.unwrap() }

    async fn anonymous(&self) -> Session {
        let instance = InstanceRef { domain: "example.social".into(), client_id: "cid".into(), client_secret: "cs".into() };
        self.sessions.create(instance).await.unwrap()
    }

    async fn logged_in(&self) -> Session {
        let s = self.anonymous().await;
        self.sessions.promote(&s.id, "tok".into()).await.unwrap()
    }

    fn actions(&self) -> Vec<String> { self.frontend.actions.lock().clone() }
}

fn get(uri: &str, sid: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(sid) = sid {
        b = b.header(header::COOKIE, format!("session_id={sid}"));
    }
    b.body(Body::empty()).unwrap()
}

fn post(uri: &str, sid: Option<&str>, form: &str) -> Request<Body> {
    let mut b = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(sid) = sid {
        b = b.header(header::COOKIE, format!("session_id={sid}"));
    }
    b.body(Body::from(form.to_string())).unwrap()
}

fn location(resp: &Response<Body>) -> &str { resp.headers()[header::LOCATION].to_str().unwrap() }

fn set_cookie(resp: &Response<Body>) -> String {
    resp.headers().get(header::SET_COOKIE).expect("set-cookie").to_str().unwrap().to_string()
}

fn cookie_value(set_cookie: &str) -> String {
    let rest = set_cookie.strip_prefix("session_id=").expect("session cookie");
    rest.split(';').next().unwrap_or("").to_string()
}

async fn body(resp: Response<Body>) -> String {
    String::from_utf8(resp.into_body().collect().await.unwrap().to_bytes().to_vec()).unwrap()
}

#[tokio::test]
async fn signin_creates_anonymous_session_and_sends_browser_to_instance() {
    let h = Harness::new();
    let resp = h.send(post("/signin", None, "instance=example.social")).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert!(location(&resp).starts_with("https://example.social/oauth/authorize?client_id=cid-example.social"));

    let sid = cookie_value(&set_cookie(&resp));
    let session = h.sessions.lookup(&sid).await.unwrap();
    assert_eq!(session.state, SessionState::Anonymous);
    assert_eq!(session.instance.domain, "example.social");
    assert!(session.expires_at > Utc::now() + Duration::days(364));
    assert!(location(&resp).ends_with(&format!("state={}", CsrfGuard::oauth_state(&session))));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn signin_rejects_malformed_instance_without_creating_a_session() {
    let h = Harness::new();
    let resp = h.send(post("/signin", None, "instance=")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn oauth_callback_promotes_session_and_returns_home() {
    let h = Harness::new();
    let s = h.anonymous().await;
    let resp = h.send(get("/oauth_callback?code=abc123", Some(&s.id))).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "/");
    assert_eq!(cookie_value(&set_cookie(&resp)), s.id);

    let promoted = h.sessions.lookup(&s.id).await.unwrap();
    assert_eq!(promoted.access_token(), Some("token-abc123"));
    assert_eq!(promoted.csrf_secret, s.csrf_secret);
}

#[tokio::test]
async fn oauth_callback_with_forged_state_is_refused() {
    let h = Harness::new();
    let s = h.anonymous().await;
    let resp = h.send(get("/oauth_callback?code=abc123&state=forged", Some(&s.id))).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.accounts.exchanged.lock().is_empty());
    assert!(!h.sessions.lookup(&s.id).await.unwrap().is_logged_in());
}

#[tokio::test]
async fn oauth_callback_with_matching_state_succeeds() {
    let h = Harness::new();
    let s = h.anonymous().await;
    let uri = format!("/oauth_callback?code=abc&state={}", CsrfGuard::oauth_state(&s));
    let resp = h.send(get(&uri, Some(&s.id))).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert!(h.sessions.lookup(&s.id).await.unwrap().is_logged_in());
}

#[tokio::test]
async fn signin_session_requires_the_echoed_state() {
    let h = Harness::new();
    let resp = h.send(post("/signin", None, "instance=example.social")).await;
    let sid = cookie_value(&set_cookie(&resp));
    let state = location(&resp).split("state=").nth(1).unwrap().to_string();

    let resp = h.send(get("/oauth_callback?code=abc123", Some(&sid))).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body(resp).await.contains("invalid csrf token"));
    assert!(h.accounts.exchanged.lock().is_empty());

    let resp = h.send(get(&format!("/oauth_callback?code=abc123&state={state}"), Some(&sid))).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "/");
    assert_eq!(h.sessions.lookup(&sid).await.unwrap().access_token(), Some("token-abc123"));
}

#[tokio::test]
async fn failed_code_exchange_leaves_session_anonymous() {
    let h = Harness::new();
    let s = h.anonymous().await;
    let resp = h.send(get("/oauth_callback?code=bad", Some(&s.id))).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body(resp).await.contains("invalid grant"));
    assert!(!h.sessions.lookup(&s.id).await.unwrap().is_logged_in());
}

#[tokio::test]
async fn missing_csrf_token_never_reaches_the_handler() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let resp = h.send(post("/fluoride/like/42", Some(&s.id), "")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    let v: serde_json::Value = serde_json::from_str(&body(resp).await).unwrap();
    assert!(v["error"].as_str().unwrap().contains("invalid csrf"));
    assert!(h.actions().is_empty());
}

#[tokio::test]
async fn wrong_csrf_token_on_html_action_records_nothing() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let resp = h.send(post("/like/42", Some(&s.id), "csrf_token=wrong&referrer=/")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
    assert!(body(resp).await.contains("invalid csrf token"));
    assert!(h.actions().is_empty());
}

#[tokio::test]
async fn csrf_token_of_another_session_is_refused() {
    let h = Harness::new();
    let victim = h.logged_in().await;
    let attacker = h.logged_in().await;
    let form = format!("csrf_token={}&referrer=/", CsrfGuard::derive_token(&attacker));
    let resp = h.send(post("/delete/1", Some(&victim.id), &form)).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.actions().is_empty());
}

#[tokio::test]
async fn csrf_token_in_query_string_is_not_accepted() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let uri = format!("/like/42?csrf_token={}", CsrfGuard::derive_token(&s));
    let resp = h.send(post(&uri, Some(&s.id), "referrer=/")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.actions().is_empty());
}

#[tokio::test]
async fn like_redirects_to_referrer_anchored_on_the_boost() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let form = format!("csrf_token={}&referrer=/timeline/home&retweeted_by_id=7", CsrfGuard::derive_token(&s));
    let resp = h.send(post("/like/42", Some(&s.id), &form)).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "/timeline/home#status-7");
    assert_eq!(h.actions(), vec![r#"Like("42")"#.to_string()]);
}

#[tokio::test]
async fn foreign_referrer_falls_back_to_root() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let form = format!("csrf_token={}&referrer=https://evil.example/", CsrfGuard::derive_token(&s));
    let resp = h.send(post("/mute/3", Some(&s.id), &form)).await;
    assert_eq!(location(&resp), "/");
}

#[tokio::test]
async fn fluoride_like_reports_the_new_count() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let form = format!("csrf_token={}", CsrfGuard::derive_token(&s));
    let resp = h.send(post("/fluoride/like/42", Some(&s.id), &form)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    let v: serde_json::Value = serde_json::from_str(&body(resp).await).unwrap();
    assert_eq!(v, serde_json::json!({ "data": 5 }));
}

#[tokio::test]
async fn fluoride_without_a_count_is_an_error() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let form = format!("csrf_token={}", CsrfGuard::derive_token(&s));
    let resp = h.send(post("/fluoride/unlike/42", Some(&s.id), &form)).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let v: serde_json::Value = serde_json::from_str(&body(resp).await).unwrap();
    assert!(v["error"].as_str().unwrap().starts_with("unexpected_result"));
}

#[tokio::test]
async fn reply_without_a_created_status_is_an_error() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let form = format!("csrf_token={}&reply_to_id=5&referrer=/", CsrfGuard::derive_token(&s));
    let resp = h.send(post("/post", Some(&s.id), &form)).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(resp.headers().get(header::LOCATION).is_none());
}

#[tokio::test]
async fn oversized_body_is_refused_before_the_session_is_checked() {
    let h = Harness::with_config(ServerConfig::default().with_max_body_bytes(1024));
    let form = format!("referrer=/&content={}", "a".repeat(4096));
    let resp = h.send(post("/fluoride/like/1", None, &form)).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let v: serde_json::Value = serde_json::from_str(&body(resp).await).unwrap();
    assert!(v["error"].as_str().unwrap().starts_with("body_too_large"));
    assert!(h.actions().is_empty());
}

#[tokio::test]
async fn reply_lands_on_the_thread() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let form = format!("csrf_token={}&content=hi&reply_to_id=5&referrer=/timeline/home", CsrfGuard::derive_token(&s));
    let resp = h.send(post("/post", Some(&s.id), &form)).await;
    assert_eq!(location(&resp), "/thread/5#status-99");
}

#[tokio::test]
async fn follow_distinguishes_absent_reblogs_flag() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let form = format!("csrf_token={}&referrer=/user/3", CsrfGuard::derive_token(&s));
    h.send(post("/follow/3?reblogs=false", Some(&s.id), &form)).await;
    h.send(post("/follow/4", Some(&s.id), &form)).await;
    assert_eq!(
        h.actions(),
        vec![r#"Follow { id: "3", reblogs: False }"#.to_string(), r#"Follow { id: "4", reblogs: Unset }"#.to_string()]
    );
}

#[tokio::test]
async fn vote_anchors_on_the_status() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let form = format!("csrf_token={}&referrer=/thread/8&status_id=8&choices=0&choices=2", CsrfGuard::derive_token(&s));
    let resp = h.send(post("/vote/p1", Some(&s.id), &form)).await;
    assert_eq!(location(&resp), "/thread/8#status-8");
    assert_eq!(h.actions(), vec![r#"Vote { poll_id: "p1", choices: ["0", "2"] }"#.to_string()]);
}

#[tokio::test]
async fn settings_are_saved_on_the_session() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let form = format!("csrf_token={}&visibility=unlisted&dark_mode=true&notification_interval=30", CsrfGuard::derive_token(&s));
    let resp = h.send(post("/settings", Some(&s.id), &form)).await;
    assert_eq!(location(&resp), "/");
    let saved = h.sessions.lookup(&s.id).await.unwrap().settings;
    assert_eq!(saved.default_visibility, "unlisted");
    assert!(saved.dark_mode);
    assert!(!saved.mask_nsfw);
    assert_eq!(saved.notification_interval, 30);
}

#[tokio::test]
async fn root_without_session_redirects_to_signin() {
    let h = Harness::new();
    let resp = h.send(get("/", None)).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "/signin");

    let anon = h.anonymous().await;
    let resp = h.send(get("/", Some(&anon.id))).await;
    assert_eq!(location(&resp), "/signin");
    assert!(h.frontend.pages.lock().is_empty());
}

#[tokio::test]
async fn root_with_expired_session_redirects_to_signin() {
    let h = Harness::new();
    let mut s = h.logged_in().await;
    s.expires_at = Utc::now() - Duration::seconds(1);
    h.store.replace(s.clone()).await.unwrap();

    let resp = h.send(get("/", Some(&s.id))).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "/signin");
    assert!(h.frontend.pages.lock().is_empty());
}

#[tokio::test]
async fn expired_session_never_reaches_page_handlers() {
    let h = Harness::new();
    let mut s = h.logged_in().await;
    s.expires_at = Utc::now() - Duration::seconds(1);
    h.store.replace(s.clone()).await.unwrap();

    let resp = h.send(get("/notifications", Some(&s.id))).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.frontend.pages.lock().is_empty());
}

#[tokio::test]
async fn root_renders_for_signed_in_user() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let resp = h.send(get("/", Some(&s.id))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
    assert!(body(resp).await.contains(&CsrfGuard::derive_token(&s)));
}

#[tokio::test]
async fn pages_without_session_fail_with_retry() {
    let h = Harness::new();
    let resp = h.send(get("/timeline/home", Some("no-such-session"))).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
    assert!(body(resp).await.contains("Retry"));
}

#[tokio::test]
async fn failed_post_offers_no_retry() {
    let h = Harness::new();
    let resp = h.send(post("/like/1", None, "")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body(resp).await.contains("Retry"));
}

#[tokio::test]
async fn signin_page_ignores_stale_cookie() {
    let h = Harness::new();
    let resp = h.send(get("/signin", Some("garbage"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(h.frontend.pages.lock().clone(), vec![Page::Signin]);
}

#[tokio::test]
async fn single_instance_signin_page_starts_the_flow() {
    let h = Harness::with_config(ServerConfig::default().with_single_instance("solo.social"));
    let resp = h.send(get("/signin", None)).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert!(location(&resp).starts_with("https://solo.social/oauth/authorize"));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn timeline_without_kind_redirects_home() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let resp = h.send(get("/timeline", Some(&s.id))).await;
    assert_eq!(location(&resp), "/timeline/home");
}

#[tokio::test]
async fn thread_reply_flag_needs_more_than_one_character() {
    let h = Harness::new();
    let s = h.logged_in().await;
    h.send(get("/thread/9?reply=1", Some(&s.id))).await;
    h.send(get("/thread/9?reply=true", Some(&s.id))).await;
    assert_eq!(
        h.frontend.pages.lock().clone(),
        vec![Page::Thread { id: "9".into(), reply: false }, Page::Thread { id: "9".into(), reply: true }]
    );
}

#[tokio::test]
async fn signout_is_idempotent_and_always_clears_the_cookie() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let form = format!("csrf_token={}", CsrfGuard::derive_token(&s));

    let resp = h.send(post("/signout", Some(&s.id), &form)).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "/");
    let cleared = set_cookie(&resp);
    assert_eq!(cookie_value(&cleared), "");
    assert!(cleared.contains("1970"));
    assert!(h.store.is_empty());

    let resp = h.send(post("/signout", Some(&s.id), &form)).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(cookie_value(&set_cookie(&resp)), "");
}

#[tokio::test]
async fn signout_with_live_session_still_needs_the_token() {
    let h = Harness::new();
    let s = h.logged_in().await;
    let resp = h.send(post("/signout", Some(&s.id), "csrf_token=nope")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.sessions.lookup(&s.id).await.is_ok());
}

#[tokio::test]
async fn wrong_method_is_not_routed() {
    let h = Harness::new();
    let resp = h.send(get("/like/1", None)).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}
