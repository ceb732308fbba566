use std::collections::HashMap;

use axum::http::Method;

use crate::error::{AppError, AppResult};
use crate::server::dispatch::ResponseKind;
use crate::server::form::Params;

use super::csrf::CsrfGuard;
use super::gate::AuthLevel;
use super::session::Session;

/// Per-request state handed to route handlers. Built by the dispatcher after the
/// authentication gate passed; never shared across requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    /// Path plus query, used as the referrer for forms rendered by this request.
    pub request_uri: String,
    pub kind: ResponseKind,
    pub level: AuthLevel,
    pub session: Option<Session>,
    pub params: Params,
    pub path_params: HashMap<String, String>,
}

impl RequestContext {
    pub fn session(&self) -> AppResult<&Session> {
        self.session.as_ref().ok_or_else(AppError::invalid_session)
    }

    /// The session must have completed the OAuth handshake.
    pub fn require_authenticated(&self) -> AppResult<&Session> {
        let s = self.session()?;
        if !s.is_logged_in() { return Err(AppError::invalid_session()); }
        Ok(s)
    }

    pub fn session_id(&self) -> Option<&str> { self.session.as_ref().map(|s| s.id.as_str()) }

    /// Token to embed into forms rendered for this session.
    pub fn csrf_token(&self) -> Option<String> { self.session.as_ref().map(CsrfGuard::derive_token) }

    /// Path parameter, empty when absent.
    pub fn path_param(&self, name: &str) -> &str {
        self.path_params.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn referrer(&self) -> &str { self.params.form_value("referrer") }
}
