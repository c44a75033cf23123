//! Session records: one JSON file per session under `sessions/`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use statehold_store::FsStore;
use uuid::Uuid;

use crate::clock::now_rfc3339;
use crate::counters::CounterStore;
use crate::error::{KernelError, KernelResult};
use crate::events::{Event, EventKind, EventLog};
use crate::instance::InstanceId;
use crate::layout::{SESSION_EXT, SESSIONS_DIR, session_file};

pub const DEFAULT_SESSION_NAME: &str = "unnamed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub data: Value,
    pub created_at: String,
    #[serde(default)]
    pub last_active: String,
    #[serde(default)]
    pub access_count: u64,
}

/// Caller input for [`SessionManager::create`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSession {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Caller input for [`SessionManager::update`]; absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// How concurrent updates to the same session id are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// No coordination: overlapping updates race and the last rename wins, so
    /// an `access_count` increment can be lost.
    #[default]
    LastWriterWins,
    /// Updates to one id are serialized behind an in-process mutex.
    Serialized,
}

impl UpdatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePolicy::LastWriterWins => "last-writer-wins",
            UpdatePolicy::Serialized => "serialized",
        }
    }
}

impl FromStr for UpdatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-writer-wins" => Ok(UpdatePolicy::LastWriterWins),
            "serialized" => Ok(UpdatePolicy::Serialized),
            other => Err(format!(
                "unknown update policy '{other}' (expected 'last-writer-wins' or 'serialized')"
            )),
        }
    }
}

/// Result of enumerating the sessions directory.
#[derive(Debug, Clone, Default)]
pub struct SessionScan {
    pub sessions: Vec<Session>,
    /// Files that exist but failed to deserialize.
    pub corrupt: Vec<PathBuf>,
}

impl SessionScan {
    /// Read every committed session file, skipping unparsable ones. Files
    /// removed between listing and reading are skipped silently.
    pub fn scan(store: &FsStore) -> KernelResult<Self> {
        let mut scan = SessionScan::default();
        for name in store.list(SESSIONS_DIR, SESSION_EXT)? {
            let rel = PathBuf::from(SESSIONS_DIR).join(&name);
            match store.read::<Session>(&rel) {
                Ok(session) => scan.sessions.push(session),
                Err(err) if err.is_not_found() => {}
                Err(err) if err.is_corrupt() => {
                    tracing::warn!(path = %err.path().display(), "skipping corrupt session record");
                    scan.corrupt.push(store.resolve(&rel));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(scan)
    }
}

/// CRUD over session records. Holds no session state in memory: every call
/// goes to the store.
#[derive(Debug)]
pub struct SessionManager {
    store: FsStore,
    events: Arc<EventLog>,
    counters: Arc<CounterStore>,
    instance_id: InstanceId,
    policy: UpdatePolicy,
    update_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        store: FsStore,
        events: Arc<EventLog>,
        counters: Arc<CounterStore>,
        instance_id: InstanceId,
    ) -> Self {
        Self {
            store,
            events,
            counters,
            instance_id,
            policy: UpdatePolicy::default(),
            update_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    pub fn create(&self, input: NewSession) -> KernelResult<Session> {
        let now = now_rfc3339();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            name: input.name.unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
            data: input.data.unwrap_or_else(|| Value::Object(Map::new())),
            created_at: now.clone(),
            last_active: now,
            access_count: 0,
        };
        self.store.write(session_file(&session.id), &session)?;
        tracing::debug!(session_id = %session.id, "session created");

        // The record is committed; bookkeeping failures from here on are
        // logged rather than reported as a failed create.
        if let Err(err) = self.counters.record_session_created() {
            tracing::warn!(session_id = %session.id, "failed to bump total_sessions: {err}");
        }
        self.emit(
            Event::new(&self.instance_id, EventKind::SessionCreated)
                .with("session_id", session.id.clone())
                .with("name", session.name.clone()),
        );
        Ok(session)
    }

    pub fn get(&self, id: &str) -> KernelResult<Session> {
        let rel = record_path(id)?;
        self.store.read(rel).map_err(|err| not_found_as_session(id, err))
    }

    pub fn list(&self) -> KernelResult<Vec<Session>> {
        Ok(SessionScan::scan(&self.store)?.sessions)
    }

    /// Readable sessions, matching what [`Self::list`] returns.
    pub fn count(&self) -> KernelResult<usize> {
        Ok(SessionScan::scan(&self.store)?.sessions.len())
    }

    /// Replace the provided fields, bump `access_count` and rewrite the record.
    pub fn update(&self, id: &str, patch: SessionPatch) -> KernelResult<Session> {
        let rel = record_path(id)?;
        let lock = match self.policy {
            UpdatePolicy::Serialized => Some(self.lock_for(&rel)),
            UpdatePolicy::LastWriterWins => None,
        };
        let _guard = lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner));

        let mut session: Session = self
            .store
            .read(&rel)
            .map_err(|err| not_found_as_session(id, err))?;
        if let Some(name) = patch.name {
            session.name = name;
        }
        if let Some(data) = patch.data {
            session.data = data;
        }
        session.last_active = now_rfc3339();
        session.access_count += 1;
        self.store.write(&rel, &session)?;

        self.emit(
            Event::new(&self.instance_id, EventKind::SessionUpdated)
                .with("session_id", session.id.clone())
                .with("access_count", session.access_count),
        );
        Ok(session)
    }

    pub fn delete(&self, id: &str) -> KernelResult<()> {
        let rel = record_path(id)?;
        self.store
            .delete(&rel)
            .map_err(|err| not_found_as_session(id, err))?;
        self.update_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&lock_key(&rel));
        self.emit(
            Event::new(&self.instance_id, EventKind::SessionDeleted).with("session_id", id),
        );
        Ok(())
    }

    fn lock_for(&self, rel: &std::path::Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .update_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(lock_key(rel)).or_default())
    }

    fn emit(&self, event: Event) {
        if let Err(err) = self.events.append(&event) {
            tracing::warn!(kind = %event.kind, "failed to append event: {err}");
        }
    }
}

/// Map a caller-supplied id to its record path. Anything that is not a UUID
/// cannot name a session, which also keeps ids from escaping `sessions/`.
fn record_path(id: &str) -> KernelResult<PathBuf> {
    let parsed = Uuid::parse_str(id).map_err(|_| KernelError::SessionNotFound(id.to_string()))?;
    Ok(session_file(&parsed.hyphenated().to_string()))
}

fn lock_key(rel: &std::path::Path) -> String {
    rel.to_string_lossy().into_owned()
}

fn not_found_as_session(id: &str, err: statehold_store::StoreError) -> KernelError {
    if err.is_not_found() {
        KernelError::SessionNotFound(id.to_string())
    } else {
        err.into()
    }
}
