//!
//! bloat HTTP server
//! -----------------
//! Axum router for the web frontend. Every route is declared in `routes::table()` and
//! runs through the same pipeline in `dispatch`.
//!
//! Responsibilities:
//! - Session cookie + per-session CSRF token model, backed by a pluggable session store.
//! - OAuth sign-in flow against the instance the user names.
//! - Page and action handlers delegating to the `Frontend` collaborator.
//! - Static assets under `/static`.
//! - Background sweep of expired sessions.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::Utc;
use tower_http::services::ServeDir;
use tracing::info;

use crate::backend::mastodon::Mastodon;
use crate::backend::{AccountBackend, Frontend};
use crate::config::ServerConfig;
use crate::identity::{FileSessionStore, MemorySessionStore, SessionManager, SessionStore};
use crate::render::{BasicRenderer, Renderer};

pub mod dispatch;
pub mod form;
pub mod response;
pub mod routes;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub accounts: Arc<dyn AccountBackend>,
    pub frontend: Arc<dyn Frontend>,
    pub renderer: Arc<dyn Renderer>,
    pub config: Arc<ServerConfig>,
}

/// Full application router, static files included.
pub fn build_router(state: AppState) -> Router {
    let static_dir = ServeDir::new(&state.config.static_dir);
    let body_limit = DefaultBodyLimit::max(state.config.max_body_bytes);
    dispatch::into_router(routes::table())
        .nest_service("/static", static_dir)
        .layer(body_limit)
        .with_state(state)
}

fn log_startup(cfg: &ServerConfig) {
    let cwd = std::env::current_dir().ok();
    info!(
        target: "startup",
        "bloat starting: listen={}, client_name={:?}, website={:?}, single_instance={:?}, static_dir={:?}, database_path={:?}, sweep_interval={:?}, secure_cookies={}, max_body_bytes={}, cwd={:?}",
        cfg.listen, cfg.client.name, cfg.client.website, cfg.single_instance, cfg.static_dir,
        cfg.database_path, cfg.sweep_interval, cfg.secure_cookies, cfg.max_body_bytes, cwd
    );
}

async fn open_store(cfg: &ServerConfig) -> anyhow::Result<Arc<dyn SessionStore>> {
    match &cfg.database_path {
        Some(dir) => {
            let store = FileSessionStore::open(dir)
                .await
                .with_context(|| format!("While opening session store at {}", dir.display()))?;
            info!(target: "startup", dir = %dir.display(), "file session store");
            Ok(Arc::new(store))
        }
        None => {
            info!(target: "startup", "in-memory session store; sessions are lost on restart");
            Ok(Arc::new(MemorySessionStore::new()))
        }
    }
}

fn spawn_sweeper(sessions: SessionManager, every: std::time::Duration) {
    if every.is_zero() {
        info!("session_sweep" = false, "background session sweep disabled");
        return;
    }
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            match sessions.store().sweep(Utc::now()).await {
                Ok(removed) if removed > 0 => tracing::debug!(target: "session", removed, "session_sweep"),
                Ok(_) => {}
                Err(e) => tracing::warn!(target: "session", error = %e, "session sweep failed"),
            }
        }
    });
}

/// Start the server with `cfg`, serving until the listener fails.
pub async fn run_with_config(cfg: ServerConfig) -> anyhow::Result<()> {
    log_startup(&cfg);

    let store = open_store(&cfg).await?;
    let sessions = SessionManager::new(store);
    spawn_sweeper(sessions.clone(), cfg.sweep_interval);

    let renderer: Arc<dyn Renderer> = Arc::new(BasicRenderer::new().context("While compiling built-in templates")?);
    let mastodon = Arc::new(Mastodon::new(cfg.client.clone(), renderer.clone()).context("While building HTTP client")?);

    let addr = cfg.listen;
    let state = AppState {
        sessions,
        accounts: mastodon.clone(),
        frontend: mastodon,
        renderer,
        config: Arc::new(cfg),
    };
    let app = build_router(state);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("While binding {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Start with configuration read from the environment.
pub async fn run() -> anyhow::Result<()> {
    let cfg = ServerConfig::from_env()?;
    run_with_config(cfg).await
}
