//! Response encoding: content types, redirects, JSON envelopes, error pages and the
//! session cookie.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use serde_json::json;
use time::OffsetDateTime;
use tracing::error;

use crate::error::AppError;
use crate::render::Renderer;

use super::dispatch::ResponseKind;

pub const SESSION_COOKIE: &str = "session_id";

impl ResponseKind {
    pub fn content_type(self) -> &'static str {
        match self {
            ResponseKind::Html => "text/html; charset=utf-8",
            ResponseKind::Json => "application/json",
        }
    }
}

fn build(status: StatusCode, kind: ResponseKind, body: Body) -> Response {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static(kind.content_type()));
    resp
}

pub fn html(body: String) -> Response { build(StatusCode::OK, ResponseKind::Html, Body::from(body)) }

/// `{"data": payload}`.
pub fn json_data(data: serde_json::Value) -> Response {
    build(StatusCode::OK, ResponseKind::Json, Body::from(json!({ "data": data }).to_string()))
}

/// 302 with `Location`. The content type still follows the route's kind.
pub fn redirect(kind: ResponseKind, location: &str) -> Response {
    let mut resp = build(StatusCode::FOUND, kind, Body::empty());
    match HeaderValue::from_str(location) {
        Ok(v) => { resp.headers_mut().insert(header::LOCATION, v); }
        Err(_) => {
            error!(target: "http", location, "redirect target is not a valid header value");
            resp.headers_mut().insert(header::LOCATION, HeaderValue::from_static("/"));
        }
    }
    resp
}

/// Translate a terminal failure. `retry` is true when the request was a GET and can
/// safely be reissued.
pub fn error_response(renderer: &dyn Renderer, kind: ResponseKind, err: &AppError, retry: bool) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match kind {
        ResponseKind::Html => {
            let body = match renderer.error_page(&err.to_string(), retry) {
                Ok(page) => page,
                Err(e) => {
                    error!(target: "http", error = %e, "error page failed to render");
                    err.to_string()
                }
            };
            build(status, kind, Body::from(body))
        }
        ResponseKind::Json => build(status, kind, Body::from(json!({ "error": err.to_string() }).to_string())),
    }
}

/// Session cookie expiring together with the session.
pub fn session_cookie(session_id: &str, expires_at: DateTime<Utc>, secure: bool) -> Cookie<'static> {
    let expires = OffsetDateTime::from_unix_timestamp(expires_at.timestamp()).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .expires(expires)
        .build()
}

/// Empty value, expiry in the past.
pub fn cleared_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build()
}

pub fn append_cookie(resp: &mut Response, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(v) => { resp.headers_mut().append(header::SET_COOKIE, v); }
        Err(e) => error!(target: "http", error = %e, "cookie is not a valid header value"),
    }
}
