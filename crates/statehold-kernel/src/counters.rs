use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use statehold_store::FsStore;

use crate::error::KernelResult;
use crate::layout::COUNTERS_FILE;

/// Durable lifecycle counters. Every field only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleCounters {
    #[serde(default)]
    pub startup_count: u64,
    #[serde(default)]
    pub crash_count: u64,
    #[serde(default)]
    pub total_sessions: u64,
    #[serde(default)]
    pub total_requests: u64,
}

/// Read-increment-write access to the counters record.
///
/// Each update rewrites the whole record atomically; the mutex serializes
/// updates from concurrent tasks within the single writer process.
#[derive(Debug)]
pub struct CounterStore {
    store: FsStore,
    update_lock: Mutex<()>,
}

impl CounterStore {
    pub fn new(store: FsStore) -> Self {
        Self {
            store,
            update_lock: Mutex::new(()),
        }
    }

    /// Current counters; zeros when no service has ever booted here.
    pub fn load(&self) -> KernelResult<LifecycleCounters> {
        match self.store.read(COUNTERS_FILE) {
            Ok(counters) => Ok(counters),
            Err(err) if err.is_not_found() => Ok(LifecycleCounters::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn record_startup(&self) -> KernelResult<LifecycleCounters> {
        self.update(|c| c.startup_count += 1)
    }

    pub fn record_crash(&self) -> KernelResult<LifecycleCounters> {
        self.update(|c| c.crash_count += 1)
    }

    pub fn record_session_created(&self) -> KernelResult<LifecycleCounters> {
        self.update(|c| c.total_sessions += 1)
    }

    pub fn add_requests(&self, requests: u64) -> KernelResult<LifecycleCounters> {
        self.update(|c| c.total_requests += requests)
    }

    fn update(&self, apply: impl FnOnce(&mut LifecycleCounters)) -> KernelResult<LifecycleCounters> {
        let _guard = self
            .update_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut counters = self.load()?;
        apply(&mut counters);
        self.store.write(COUNTERS_FILE, &counters)?;
        Ok(counters)
    }
}
