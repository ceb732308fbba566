use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::store::{SessionStore, StoreError};

/// Fixed validity window applied on creation and on every renewal.
pub const SESSION_VALIDITY_DAYS: i64 = 365;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Unknown, expired or concurrently destroyed. Callers cannot tell these apart.
    #[error("session not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which federated server a session talks to, plus the client application
/// registered there when the sign-in flow began.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceRef {
    pub domain: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Created, awaiting the OAuth callback.
    Anonymous,
    Authenticated { access_token: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub default_visibility: String,
    pub default_format: String,
    pub copy_scope: bool,
    pub thread_in_new_tab: bool,
    pub hide_attachments: bool,
    pub mask_nsfw: bool,
    pub notification_interval: i64,
    pub fluoride_mode: bool,
    pub dark_mode: bool,
    pub anti_dopamine_mode: bool,
    pub css: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_visibility: "public".into(),
            default_format: String::new(),
            copy_scope: true,
            thread_in_new_tab: false,
            hide_attachments: false,
            mask_nsfw: true,
            notification_interval: 0,
            fluoride_mode: false,
            dark_mode: false,
            anti_dopamine_mode: false,
            css: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub instance: InstanceRef,
    /// Base64url secret used to derive the CSRF token; fixed for the session's lifetime.
    pub csrf_secret: String,
    #[serde(default)]
    pub settings: Settings,
    /// Set when the authorize URL carried an OAuth `state`; the callback must echo it.
    #[serde(default)]
    pub state_bound: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_logged_in(&self) -> bool { matches!(self.state, SessionState::Authenticated { .. }) }

    pub fn access_token(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticated { access_token } => Some(access_token.as_str()),
            SessionState::Anonymous => None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { self.expires_at <= now }
}

/// 256-bit random value, base64url without padding.
pub(crate) fn random_token() -> Result<String, StoreError> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| StoreError::Io(format!("entropy source: {e}")))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Owns the session lifecycle. Holds no per-session state of its own: every call goes
/// to the store, so several server processes can share one store.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    validity: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store, validity: Duration::days(SESSION_VALIDITY_DAYS) }
    }

    #[must_use]
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn validity(&self) -> Duration { self.validity }

    pub fn store(&self) -> &Arc<dyn SessionStore> { &self.store }

    /// Allocate a fresh anonymous session bound to `instance`.
    pub async fn create(&self, instance: InstanceRef) -> Result<Session, SessionError> {
        self.insert_new(instance, false).await
    }

    /// Like `create`, for a sign-in whose authorize URL carries an OAuth `state`.
    pub async fn create_for_signin(&self, instance: InstanceRef) -> Result<Session, SessionError> {
        self.insert_new(instance, true).await
    }

    async fn insert_new(&self, instance: InstanceRef, state_bound: bool) -> Result<Session, SessionError> {
        let now = Utc::now();
        let session = Session {
            id: random_token()?,
            state: SessionState::Anonymous,
            instance,
            csrf_secret: random_token()?,
            settings: Settings::default(),
            state_bound,
            created_at: now,
            expires_at: now + self.validity,
        };
        self.store.insert(session.clone()).await?;
        debug!(target: "session", instance = %session.instance.domain, "session.create");
        Ok(session)
    }

    pub async fn lookup(&self, id: &str) -> Result<Session, SessionError> {
        match self.store.get(id).await? {
            Some(s) if !s.is_expired(Utc::now()) => Ok(s),
            _ => Err(SessionError::NotFound),
        }
    }

    /// Attach an access token and renew the validity window. A session destroyed
    /// between lookup and write yields `NotFound`; it is never recreated.
    pub async fn promote(&self, id: &str, access_token: String) -> Result<Session, SessionError> {
        let mut session = self.lookup(id).await?;
        session.state = SessionState::Authenticated { access_token };
        session.expires_at = Utc::now() + self.validity;
        if !self.store.replace(session.clone()).await? {
            return Err(SessionError::NotFound);
        }
        debug!(target: "session", instance = %session.instance.domain, "session.promote");
        Ok(session)
    }

    pub async fn save_settings(&self, id: &str, settings: Settings) -> Result<Session, SessionError> {
        let mut session = self.lookup(id).await?;
        session.settings = settings;
        if !self.store.replace(session.clone()).await? {
            return Err(SessionError::NotFound);
        }
        Ok(session)
    }

    /// Idempotent.
    pub async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        let removed = self.store.remove(id).await?;
        debug!(target: "session", removed, "session.destroy");
        Ok(())
    }
}
