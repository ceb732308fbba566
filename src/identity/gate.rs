use crate::error::{AppError, AppResult};

use super::csrf::CsrfGuard;
use super::session::{Session, SessionError, SessionManager};

/// Minimum proof of identity a route demands before its handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthLevel {
    /// No session consulted; the handler decides what a logged-in request means.
    NoAuth,
    SessionRequired,
    /// `SessionRequired` plus a matching `csrf_token`.
    CsrfRequired,
}

/// Raw credentials as presented by the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials<'a> {
    pub session_id: Option<&'a str>,
    pub csrf_token: Option<&'a str>,
}

/// Resolve the credentials against `level`. On success returns the resolved session
/// (always `None` for `NoAuth`).
pub async fn authenticate(sm: &SessionManager, level: AuthLevel, creds: Credentials<'_>) -> AppResult<Option<Session>> {
    if level == AuthLevel::NoAuth { return Ok(None); }

    let sid = creds.session_id.filter(|s| !s.is_empty()).ok_or_else(AppError::invalid_session)?;
    let session = match sm.lookup(sid).await {
        Ok(s) => s,
        Err(SessionError::NotFound) => return Err(AppError::invalid_session()),
        Err(e) => return Err(e.into()),
    };

    if level == AuthLevel::CsrfRequired && !CsrfGuard::validate(&session, creds.csrf_token) {
        return Err(AppError::invalid_csrf());
    }
    Ok(Some(session))
}
