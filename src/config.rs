use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

#[derive(Debug, thiserror::Error)]
#[error("{var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(var: &'static str, reason: impl Into<String>) -> Self { Self { var, reason: reason.into() } }
}

/// How this frontend introduces itself when registering on an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub name: String,
    pub scope: String,
    pub website: String,
}

impl ClientSettings {
    /// OAuth callback, always `<website>/oauth_callback`.
    pub fn redirect_uri(&self) -> String {
        format!("{}/oauth_callback", self.website.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub client: ClientSettings,
    /// When set, `GET /signin` starts the handshake against this instance directly.
    pub single_instance: Option<String>,
    pub static_dir: PathBuf,
    /// Directory for file-backed sessions; in-memory when unset.
    pub database_path: Option<PathBuf>,
    /// Zero disables the background sweep.
    pub sweep_interval: Duration,
    pub secure_cookies: bool,
    /// Request bodies (forms and uploads) larger than this are refused before authentication.
    pub max_body_bytes: usize,
}

pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            client: ClientSettings {
                name: "bloat".into(),
                scope: "read write follow".into(),
                website: "http://127.0.0.1:8080".into(),
            },
            single_instance: None,
            static_dir: PathBuf::from("static"),
            database_path: None,
            sweep_interval: Duration::from_secs(300),
            secure_cookies: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Build from `BLOAT_*` environment variables. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first variable that fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        let get = |k: &str| get(k).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BLOAT_LISTEN") {
            cfg.listen = v.trim().parse().map_err(|e| ConfigError::new("BLOAT_LISTEN", format!("{e}")))?;
        }
        if let Some(v) = get("BLOAT_CLIENT_NAME") {
            cfg.client.name = v;
        }
        if let Some(v) = get("BLOAT_CLIENT_SCOPE") {
            cfg.client.scope = v;
        }
        if let Some(v) = get("BLOAT_CLIENT_WEBSITE") {
            Url::parse(v.trim()).map_err(|e| ConfigError::new("BLOAT_CLIENT_WEBSITE", format!("{e}")))?;
            cfg.client.website = v.trim().to_string();
        }
        cfg.single_instance = get("BLOAT_SINGLE_INSTANCE").map(|v| v.trim().to_string());
        if let Some(v) = get("BLOAT_STATIC_DIR") {
            cfg.static_dir = PathBuf::from(v);
        }
        cfg.database_path = get("BLOAT_DATABASE_PATH").map(PathBuf::from);
        if let Some(v) = get("BLOAT_SWEEP_INTERVAL_SEC") {
            let secs: u64 = v.trim().parse().map_err(|e| ConfigError::new("BLOAT_SWEEP_INTERVAL_SEC", format!("{e}")))?;
            cfg.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(v) = get("BLOAT_MAX_BODY_BYTES") {
            cfg.max_body_bytes = v.trim().parse().map_err(|e| ConfigError::new("BLOAT_MAX_BODY_BYTES", format!("{e}")))?;
        }
        if let Some(v) = get("BLOAT_SECURE_COOKIES") {
            cfg.secure_cookies = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => return Err(ConfigError::new("BLOAT_SECURE_COOKIES", format!("expected a boolean, got {other:?}"))),
            };
        }
        Ok(cfg)
    }

    #[must_use]
    pub fn with_listen(mut self, addr: SocketAddr) -> Self {
        self.listen = addr;
        self
    }

    #[must_use]
    pub fn with_single_instance(mut self, domain: impl Into<String>) -> Self {
        self.single_instance = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_interval = every;
        self
    }
}
