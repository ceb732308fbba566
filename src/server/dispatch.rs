//! Route descriptors and the request pipeline every route goes through:
//! request log, content type, body parsing, authentication gate, handler, encoding.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Method, Request};
use axum::response::Response;
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use futures_util::future::BoxFuture;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::{authenticate, AuthLevel, Credentials, RequestContext, CSRF_FORM_FIELD};

use super::form::Params;
use super::response::{self, SESSION_COOKIE};
use super::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Html,
    Json,
}

/// What an `InvalidSession` failure turns into for a given route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPolicy {
    /// Encoded as an error like any other failure.
    Fail,
    /// Swallowed: redirect to `to`, optionally clearing the session cookie. Not logged as an error.
    Redirect { to: &'static str, clear_cookie: bool },
}

/// Successful handler outcome.
#[derive(Debug)]
pub enum Reply {
    Page(String),
    /// Wrapped as `{"data": ...}`.
    Data(serde_json::Value),
    Redirect { location: String, cookie: Option<Cookie<'static>> },
}

impl Reply {
    pub fn redirect(location: impl Into<String>) -> Self {
        Reply::Redirect { location: location.into(), cookie: None }
    }

    #[must_use]
    pub fn with_cookie(self, c: Cookie<'static>) -> Self {
        match self {
            Reply::Redirect { location, .. } => Reply::Redirect { location, cookie: Some(c) },
            other => other,
        }
    }
}

pub type HandlerFuture<'a> = BoxFuture<'a, AppResult<Reply>>;
pub type Handler = for<'a> fn(&'a AppState, &'a RequestContext) -> HandlerFuture<'a>;

/// Turn `async fn(&AppState, &RequestContext) -> AppResult<Reply>` into a `Handler`.
#[macro_export]
macro_rules! handler {
    ($f:path) => {{
        fn boxed<'a>(
            st: &'a $crate::server::AppState,
            ctx: &'a $crate::identity::RequestContext,
        ) -> $crate::server::dispatch::HandlerFuture<'a> {
            Box::pin($f(st, ctx))
        }
        boxed as $crate::server::dispatch::Handler
    }};
}

pub struct Route {
    pub method: Method,
    pub path: &'static str,
    pub auth: AuthLevel,
    pub kind: ResponseKind,
    pub policy: SessionPolicy,
    pub handler: Handler,
}

impl Route {
    pub fn get(path: &'static str, auth: AuthLevel, kind: ResponseKind, handler: Handler) -> Self {
        Self { method: Method::GET, path, auth, kind, policy: SessionPolicy::Fail, handler }
    }

    pub fn post(path: &'static str, auth: AuthLevel, kind: ResponseKind, handler: Handler) -> Self {
        Self { method: Method::POST, path, auth, kind, policy: SessionPolicy::Fail, handler }
    }

    #[must_use]
    pub fn on_invalid_session(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn filter(&self) -> MethodFilter {
        if self.method == Method::POST { MethodFilter::POST } else { MethodFilter::GET }
    }
}

/// Emits exactly one line per request when dropped. A request whose future is dropped
/// before `finish` (client went away) is reported as cancelled.
struct RequestLog {
    method: Method,
    path: String,
    began: Instant,
    outcome: Option<Option<String>>,
}

impl RequestLog {
    fn start(method: &Method, path: &str) -> Self {
        Self { method: method.clone(), path: path.to_string(), began: Instant::now(), outcome: None }
    }

    fn finish(&mut self, err: Option<&AppError>) { self.outcome = Some(err.map(ToString::to_string)); }
}

impl Drop for RequestLog {
    fn drop(&mut self) {
        let took = self.began.elapsed();
        let err = match &self.outcome {
            Some(Some(e)) => e.as_str(),
            Some(None) => "<nil>",
            None => "request cancelled",
        };
        info!(target: "http", method = %self.method, path = %self.path, err, took = ?took, "request");
    }
}

/// Group routes by path so one path can serve several methods, then mount them.
pub fn into_router(routes: Vec<Route>) -> Router<AppState> {
    let mut by_path: BTreeMap<&'static str, MethodRouter<AppState>> = BTreeMap::new();
    for route in routes {
        let path = route.path;
        let filter = route.filter();
        let route = Arc::new(route);
        let h = move |State(state): State<AppState>, Path(params): Path<HashMap<String, String>>, req: Request<Body>| {
            let route = route.clone();
            async move { dispatch(&route, &state, params, req).await }
        };
        let entry = by_path.remove(path).unwrap_or_else(MethodRouter::new);
        by_path.insert(path, entry.on(filter, h));
    }
    by_path.into_iter().fold(Router::new(), |router, (path, mr)| router.route(path, mr))
}

pub async fn dispatch(route: &Route, state: &AppState, path_params: HashMap<String, String>, req: Request<Body>) -> Response {
    let mut log = RequestLog::start(req.method(), req.uri().path());
    let retry = req.method() == Method::GET;
    let secure = state.config.secure_cookies;

    match run(route, state, path_params, req).await {
        Ok(reply) => {
            log.finish(None);
            encode(route.kind, reply)
        }
        Err(e) if e.is_invalid_session() => match route.policy {
            SessionPolicy::Redirect { to, clear_cookie } => {
                log.finish(None);
                let mut resp = response::redirect(route.kind, to);
                if clear_cookie {
                    response::append_cookie(&mut resp, &response::cleared_session_cookie(secure));
                }
                resp
            }
            SessionPolicy::Fail => {
                log.finish(Some(&e));
                response::error_response(state.renderer.as_ref(), route.kind, &e, retry)
            }
        },
        Err(e) => {
            log.finish(Some(&e));
            response::error_response(state.renderer.as_ref(), route.kind, &e, retry)
        }
    }
}

async fn run(route: &Route, state: &AppState, path_params: HashMap<String, String>, req: Request<Body>) -> AppResult<Reply> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_uri = req.uri().path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_else(|| path.clone());
    let session_id = CookieJar::from_headers(req.headers()).get(SESSION_COOKIE).map(|c| c.value().to_string());

    let mut params = Params::from_query(req.uri().query());
    params.read_body(req).await?;

    let creds = Credentials { session_id: session_id.as_deref(), csrf_token: params.body_value(CSRF_FORM_FIELD) };
    let session = authenticate(&state.sessions, route.auth, creds).await?;

    let ctx = RequestContext { method, path, request_uri, kind: route.kind, level: route.auth, session, params, path_params };
    (route.handler)(state, &ctx).await
}

fn encode(kind: ResponseKind, reply: Reply) -> Response {
    match reply {
        Reply::Page(body) => response::html(body),
        Reply::Data(data) => response::json_data(data),
        Reply::Redirect { location, cookie } => {
            let mut resp = response::redirect(kind, &location);
            if let Some(c) = cookie {
                response::append_cookie(&mut resp, &c);
            }
            resp
        }
    }
}
