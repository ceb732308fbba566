//! Session persistence behind a narrow, object-safe interface.
//!
//! Two implementations ship with the crate:
//! - `MemorySessionStore`: process-local map, swept periodically for expired records.
//! - `FileSessionStore`: one JSON document per session under a directory, so sessions
//!   (and their CSRF secrets) survive restarts.
//!
//! `replace` is the only read-modify-write primitive: it must never recreate a record
//! that was removed concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::session::Session;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store I/O error: {0}")]
    Io(String),

    #[error("session record could not be decoded: {0}")]
    Serialization(String),

    #[error("malformed session key")]
    InvalidKey,
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self { StoreError::Io(e.to_string()) }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self { StoreError::Serialization(e.to_string()) }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> StoreResult<Option<Session>>;

    async fn insert(&self, session: Session) -> StoreResult<()>;

    /// Overwrite an existing record. Returns `false` (and writes nothing) when the id is absent.
    async fn replace(&self, session: Session) -> StoreResult<bool>;

    /// Returns whether a record was removed.
    async fn remove(&self, id: &str) -> StoreResult<bool>;

    /// Drop records whose expiry is at or before `now`. Returns number removed.
    async fn sweep(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// In-memory store; all operations run under a single lock so `replace` and `remove` serialize.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    map: Arc<RwLock<HashMap<String, Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Session>> {
        Ok(self.map.read().get(id).cloned())
    }

    async fn insert(&self, session: Session) -> StoreResult<()> {
        self.map.write().insert(session.id.clone(), session);
        Ok(())
    }

    async fn replace(&self, session: Session) -> StoreResult<bool> {
        let mut w = self.map.write();
        match w.get_mut(&session.id) {
            Some(slot) => { *slot = session; Ok(true) }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        Ok(self.map.write().remove(id).is_some())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut w = self.map.write();
        let before = w.len();
        w.retain(|_, s| s.expires_at > now);
        Ok(before - w.len())
    }
}

/// Directory-backed store. Writes go through a temp file and a rename; mutations are
/// serialized by an async lock so `replace` cannot race a `remove`.
pub struct FileSessionStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSessionStore {
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, write_lock: tokio::sync::Mutex::new(()) })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    fn path_for(&self, id: &str) -> StoreResult<PathBuf> {
        if !is_valid_key(id) { return Err(StoreError::InvalidKey); }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read(&self, path: &Path) -> StoreResult<Option<Session>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &Path, session: &Session) -> StoreResult<()> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(session)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Session ids are URL-safe base64; anything else never reaches the filesystem.
fn is_valid_key(id: &str) -> bool {
    !id.is_empty() && id.len() <= 128 && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Session>> {
        // Unknown shapes cannot exist in the store.
        if !is_valid_key(id) { return Ok(None); }
        let path = self.path_for(id)?;
        self.read(&path).await
    }

    async fn insert(&self, session: Session) -> StoreResult<()> {
        let path = self.path_for(&session.id)?;
        let _guard = self.write_lock.lock().await;
        self.write(&path, &session).await
    }

    async fn replace(&self, session: Session) -> StoreResult<bool> {
        let path = self.path_for(&session.id)?;
        let _guard = self.write_lock.lock().await;
        if !tokio::fs::try_exists(&path).await? { return Ok(false); }
        self.write(&path, &session).await?;
        Ok(true)
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        if !is_valid_key(id) { return Ok(false); }
        let path = self.path_for(id)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn sweep(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0usize;
        let mut rd = tokio::fs::read_dir(&self.dir).await?;
        while let Some(ent) = rd.next_entry().await? {
            let path = ent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") { continue; }
            match self.read(&path).await {
                Ok(Some(s)) if s.expires_at > now => {}
                Ok(_) | Err(StoreError::Serialization(_)) => {
                    tokio::fs::remove_file(&path).await?;
                    removed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if removed > 0 { debug!(target: "session", removed, dir = %self.dir.display(), "file_store_sweep"); }
        Ok(removed)
    }
}
