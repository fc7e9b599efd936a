//! Session Store
//!
//! A session is one caller's private DuckDB file. The store maps a session id
//! to `<session_dir>/<id>.duckdb`, derives new ids, checks existence and
//! deletes files on teardown.
//!
//! ## Identity
//!
//! `id = hex(sha256("<seed>-<unix-nanos>"))`. Collisions are not checked.
//! Ids handed in by callers must look like one of ours (64 lowercase hex
//! characters); anything else is rejected as an invalid session so a request
//! can never address a path outside the session directory.
//!
//! ## Known gap
//!
//! DuckDB write-ahead files (`<id>.duckdb.wal`) are not swept by
//! [`SessionStore::destroy`]. A clean engine close checkpoints and removes
//! them; a leftover WAL is logged.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// File extension of session databases.
pub const SESSION_EXTENSION: &str = "duckdb";

const SESSION_ID_LEN: usize = 64;

/// A resolved session: identity plus backing file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub path: PathBuf,
}

/// Result of [`SessionStore::resolve`].
#[derive(Debug, Clone)]
pub struct SessionPath {
    pub path: PathBuf,
    pub exists: bool,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hash a seed into a session id.
    pub fn derive_id(seed: &str, unix_nanos: u128) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}-{}", seed, unix_nanos).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether `id` has the shape of a derived session id.
    pub fn is_valid_id(id: &str) -> bool {
        id.len() == SESSION_ID_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, SESSION_EXTENSION))
    }

    /// Map an id to its backing path and report whether the file exists.
    pub fn resolve(&self, id: &str) -> Result<SessionPath> {
        if !Self::is_valid_id(id) {
            return Err(Error::InvalidSession(id.to_string()));
        }
        let path = self.path_for(id);
        let exists = path.try_exists()?;
        Ok(SessionPath { path, exists })
    }

    /// Resolve an id that must already have a backing file.
    pub fn open_existing(&self, id: &str) -> Result<Session> {
        let resolved = self.resolve(id)?;
        if !resolved.exists {
            debug!(session_id = %id, "Session file not found");
            return Err(Error::InvalidSession(id.to_string()));
        }
        Ok(Session {
            id: id.to_string(),
            path: resolved.path,
        })
    }

    /// Derive a new session from `seed` and the current time. The backing
    /// file is created later, when an engine first opens it.
    pub fn create(&self, seed: &str) -> Session {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let id = Self::derive_id(seed, now);
        let path = self.path_for(&id);
        Session { id, path }
    }

    /// Remove a session's backing file.
    pub fn destroy(&self, id: &str) -> Result<()> {
        let session = self.open_existing(id)?;
        std::fs::remove_file(&session.path)?;

        let wal = wal_path(&session.path);
        if wal.exists() {
            warn!(
                session_id = %id,
                wal = %wal.display(),
                "Session removed but its write-ahead log was left behind"
            );
        }
        Ok(())
    }
}

fn wal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".wal");
    PathBuf::from(name)
}

/// Removes a session's backing file when dropped, unless disarmed.
///
/// Held by one-shot calls for the whole call, and by `Load` until the load
/// has succeeded.
#[derive(Debug)]
pub struct SessionGuard {
    session: Session,
    armed: bool,
}

impl SessionGuard {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            armed: true,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Keep the backing file; returns the session.
    pub fn disarm(mut self) -> Session {
        self.armed = false;
        self.session.clone()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for path in [self.session.path.clone(), wal_path(&self.session.path)] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed session file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    session_id = %self.session.id,
                    path = %path.display(),
                    error = %e,
                    "Failed to remove session file"
                ),
            }
        }
    }
}
