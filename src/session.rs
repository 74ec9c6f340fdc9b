//! Session store.
//!
//! The core holds no durable state between invocations. A session keeps the
//! latest context pack, plan and created-task fingerprints for one project so
//! the next ingest or run can pick up where the last one stopped. Stores are
//! passed explicitly; there is no global session.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::context::ContextPack;
use crate::coordinator::RunReport;
use crate::error::SessionError;
use crate::fingerprint::Fingerprint;
use crate::plan::Plan;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a session ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// State carried between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub context: ContextPack,
    pub plan: Plan,

    /// Fingerprints of tasks already created in the external tracker.
    #[serde(default)]
    pub created_tasks: BTreeSet<Fingerprint>,

    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Starts a session from a freshly frozen pack.
    #[must_use]
    pub fn new(context: ContextPack, plan: Plan) -> Self {
        Self {
            context,
            plan,
            created_tasks: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Adopts a run's merged plan.
    pub fn apply_run(&mut self, report: &RunReport) {
        self.plan = report.plan.clone();
        self.updated_at = Utc::now();
    }

    /// Records tasks the tracker has created so later runs skip them.
    pub fn mark_created<'a>(&mut self, fingerprints: impl IntoIterator<Item = &'a Fingerprint>) {
        self.created_tasks.extend(fingerprints.into_iter().cloned());
        self.updated_at = Utc::now();
    }

    /// Replaces the context pack, e.g. after an append-ingest.
    pub fn replace_context(&mut self, context: ContextPack) {
        self.context = context;
        self.updated_at = Utc::now();
    }
}

/// Persists session snapshots.
pub trait SessionStore: Send + Sync {
    /// Stores a new session and returns its ID.
    fn create(&self, snapshot: SessionSnapshot) -> Result<SessionId, SessionError>;

    /// Returns the current snapshot.
    fn get(&self, id: SessionId) -> Result<SessionSnapshot, SessionError>;

    /// Replaces the snapshot of an existing session and renews its TTL.
    fn put(&self, id: SessionId, snapshot: SessionSnapshot) -> Result<(), SessionError>;

    /// Tears a session down.
    fn remove(&self, id: SessionId) -> Result<(), SessionError>;

    /// Drops expired sessions and returns how many were dropped.
    fn purge_expired(&self) -> Result<usize, SessionError>;
}

fn lock_err(context: &'static str) -> SessionError {
    SessionError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug)]
struct Entry {
    snapshot: SessionSnapshot,
    /// `None` if the TTL is too large to represent.
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Thread-safe in-memory store with an idle TTL.
#[derive(Debug)]
pub struct InMemorySessionStore {
    ttl: chrono::Duration,
    sessions: RwLock<HashMap<SessionId, Entry>>,
}

impl InMemorySessionStore {
    /// Creates a store whose sessions expire `ttl` after their last write.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52 * 1_000)),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store from the `[session]` config section.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.ttl())
    }

    /// Number of stored sessions, expired ones included until purged.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, SessionError> {
        Ok(self.sessions.read().map_err(|_| lock_err("session len"))?.len())
    }

    /// Returns true if no session is stored.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, SessionError> {
        self.len().map(|n| n == 0)
    }

    fn entry(&self, snapshot: SessionSnapshot, now: DateTime<Utc>) -> Entry {
        Entry {
            snapshot,
            expires_at: now.checked_add_signed(self.ttl),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, snapshot: SessionSnapshot) -> Result<SessionId, SessionError> {
        let id = SessionId::new();
        let entry = self.entry(snapshot, Utc::now());
        self.sessions
            .write()
            .map_err(|_| lock_err("session create"))?
            .insert(id, entry);
        debug!(session = %id, "session created");
        Ok(id)
    }

    fn get(&self, id: SessionId) -> Result<SessionSnapshot, SessionError> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().map_err(|_| lock_err("session get"))?;
            match sessions.get(&id) {
                None => return Err(SessionError::NotFound(id)),
                Some(entry) if !entry.is_expired(now) => return Ok(entry.snapshot.clone()),
                Some(_) => {}
            }
        }
        self.sessions
            .write()
            .map_err(|_| lock_err("session expire"))?
            .remove(&id);
        debug!(session = %id, "session expired");
        Err(SessionError::Expired(id))
    }

    fn put(&self, id: SessionId, snapshot: SessionSnapshot) -> Result<(), SessionError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().map_err(|_| lock_err("session put"))?;
        match sessions.get(&id) {
            None => return Err(SessionError::NotFound(id)),
            Some(entry) if entry.is_expired(now) => {
                sessions.remove(&id);
                return Err(SessionError::Expired(id));
            }
            Some(_) => {}
        }
        sessions.insert(id, self.entry(snapshot, now));
        Ok(())
    }

    fn remove(&self, id: SessionId) -> Result<(), SessionError> {
        let removed = self
            .sessions
            .write()
            .map_err(|_| lock_err("session remove"))?
            .remove(&id);
        match removed {
            Some(_) => {
                debug!(session = %id, "session removed");
                Ok(())
            }
            None => Err(SessionError::NotFound(id)),
        }
    }

    fn purge_expired(&self) -> Result<usize, SessionError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().map_err(|_| lock_err("session purge"))?;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.is_expired(now));
        let purged = before - sessions.len();
        if purged > 0 {
            debug!(purged, "expired sessions purged");
        }
        Ok(purged)
    }
}
