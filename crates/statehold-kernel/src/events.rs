//! Append-only JSON-lines event log.
//!
//! Unlike records, the log cannot be replaced atomically on every append, so a
//! crash mid-append can leave one incomplete trailing line. Readers drop lines
//! that fail to parse; the writer repairs the tail once at boot so its own
//! appends always start on a fresh line.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock::now_rfc3339;
use crate::error::{KernelError, KernelResult};
use crate::instance::InstanceId;
use crate::layout::EVENTS_FILE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Startup,
    CrashTriggered,
    SessionCreated,
    SessionUpdated,
    SessionDeleted,
    Shutdown,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Startup => "startup",
            EventKind::CrashTriggered => "crash_triggered",
            EventKind::SessionCreated => "session_created",
            EventKind::SessionUpdated => "session_updated",
            EventKind::SessionDeleted => "session_deleted",
            EventKind::Shutdown => "shutdown",
            EventKind::Other(kind) => kind,
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "startup" => EventKind::Startup,
            "crash_triggered" => EventKind::CrashTriggered,
            "session_created" => EventKind::SessionCreated,
            "session_updated" => EventKind::SessionUpdated,
            "session_deleted" => EventKind::SessionDeleted,
            "shutdown" => EventKind::Shutdown,
            _ => EventKind::Other(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: String,
    pub instance_id: InstanceId,
    pub kind: EventKind,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Event {
    pub fn new(instance_id: &InstanceId, kind: EventKind) -> Self {
        Self {
            timestamp: now_rfc3339(),
            instance_id: instance_id.clone(),
            kind,
            attributes: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

/// The most recent well-formed events, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTail {
    pub events: Vec<Event>,
    /// Well-formed entries in the whole log.
    pub total: usize,
    /// Lines that failed to parse and were dropped.
    pub skipped: usize,
}

#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl EventLog {
    /// Log handle for a storage root. Touches nothing until the first append.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: root.as_ref().join(EVENTS_FILE),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single line write followed by a data sync.
    pub fn append(&self, event: &Event) -> KernelResult<()> {
        let mut line = serde_json::to_vec(event).map_err(KernelError::EventEncode)?;
        line.push(b'\n');

        let _guard = self
            .append_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let created = !self.path.exists();
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(&line).map_err(|e| self.io_error(e))?;
        file.sync_data().map_err(|e| self.io_error(e))?;
        if created {
            if let Some(parent) = self.path.parent() {
                statehold_store::sync_dir(parent)?;
            }
        }
        Ok(())
    }

    /// Repair the tail left by a crash mid-append. A trailing fragment that is a
    /// whole event only lost its newline and gets one; anything else is
    /// trimmed. Returns the number of bytes removed; well-formed events are
    /// never touched.
    pub fn recover_tail(&self) -> KernelResult<u64> {
        let _guard = self
            .append_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(self.io_error(err)),
        };
        if bytes.is_empty() || bytes.last() == Some(&b'\n') {
            return Ok(0);
        }
        let keep = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);
        if serde_json::from_slice::<Event>(&bytes[keep..]).is_ok() {
            let mut file = OpenOptions::new()
                .append(true)
                .open(&self.path)
                .map_err(|e| self.io_error(e))?;
            file.write_all(b"\n").map_err(|e| self.io_error(e))?;
            file.sync_data().map_err(|e| self.io_error(e))?;
            tracing::warn!(
                path = %self.path.display(),
                "terminated trailing event log line that was missing its newline"
            );
            return Ok(0);
        }
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.set_len(keep as u64).map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        let dropped = (bytes.len() - keep) as u64;
        tracing::warn!(
            path = %self.path.display(),
            dropped,
            "trimmed incomplete trailing event log line"
        );
        Ok(dropped)
    }

    /// Up to `limit` most recent well-formed events. A missing log is empty.
    pub fn read_tail(&self, limit: usize) -> KernelResult<EventTail> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(EventTail::default()),
            Err(err) => return Err(self.io_error(err)),
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut events = Vec::new();
        let mut skipped = 0;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(_) => skipped += 1,
            }
        }
        let total = events.len();
        events.drain(..total.saturating_sub(limit));
        Ok(EventTail {
            events,
            total,
            skipped,
        })
    }

    fn io_error(&self, source: std::io::Error) -> KernelError {
        KernelError::EventLog {
            path: self.path.clone(),
            source,
        }
    }
}
