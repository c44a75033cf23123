//! Process-scoped service context and its lifecycle state machine.
//!
//! ```text
//! Booting -> Serving -> CrashTriggered -> Terminated
//!                  \--> Stopped
//! ```
//!
//! One `ServiceContext` is created per boot and shared with every handler. It
//! caches nothing durable: the only in-memory state is the instance id, the
//! boot instant, the request counter and the current phase.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use statehold_kernel::layout::SESSIONS_DIR;
use statehold_kernel::{
    CounterStore, Event, EventKind, EventLog, EventTail, InstanceId, KernelError,
    LifecycleCounters, SessionManager,
};
use statehold_store::FsStore;

use crate::config::HostConfig;
use crate::error::HostError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePhase {
    Booting,
    Serving,
    CrashTriggered,
    Terminated,
    Stopped,
}

impl ServicePhase {
    pub fn can_advance_to(self, next: ServicePhase) -> bool {
        use ServicePhase::*;
        matches!(
            (self, next),
            (Booting, Serving)
                | (Serving, CrashTriggered)
                | (CrashTriggered, Terminated)
                | (Serving, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServicePhase::Booting => "booting",
            ServicePhase::Serving => "serving",
            ServicePhase::CrashTriggered => "crash_triggered",
            ServicePhase::Terminated => "terminated",
            ServicePhase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub instance_id: InstanceId,
    pub startup_count: u64,
    pub uptime_seconds: f64,
}

/// Figures that die with this process.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceState {
    pub instance_id: InstanceId,
    pub phase: ServicePhase,
    pub uptime_seconds: f64,
    pub requests_this_instance: u64,
}

/// Figures read back from the storage root.
#[derive(Debug, Clone, Serialize)]
pub struct DurableState {
    pub startup_count: u64,
    pub crash_count: u64,
    pub total_sessions: u64,
    pub total_requests: u64,
    pub live_sessions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateReport {
    pub instance: InstanceState,
    pub durable: DurableState,
}

#[derive(Debug)]
pub struct ServiceContext {
    config: HostConfig,
    instance_id: InstanceId,
    started_at: Instant,
    requests: AtomicU64,
    phase: Mutex<ServicePhase>,
    counters: Arc<CounterStore>,
    events: Arc<EventLog>,
    sessions: SessionManager,
}

impl ServiceContext {
    /// Run the boot sequence. Any storage failure here is fatal: a service that
    /// cannot record its own startup must not serve.
    pub fn boot(config: HostConfig) -> Result<Arc<Self>, HostError> {
        let store = FsStore::open(&config.data_dir).map_err(boot_error)?;
        store.ensure_dir(SESSIONS_DIR).map_err(boot_error)?;
        let swept = store.sweep_temp_files(SESSIONS_DIR).map_err(boot_error)?
            + store.sweep_temp_files(".").map_err(boot_error)?;
        if swept > 0 {
            tracing::warn!(swept, "removed temporary files left by an interrupted write");
        }

        let events = Arc::new(EventLog::new(store.root()));
        events.recover_tail().map_err(HostError::Boot)?;

        let instance_id = InstanceId::generate();
        let counters = Arc::new(CounterStore::new(store.clone()));
        let sessions = SessionManager::new(
            store,
            Arc::clone(&events),
            Arc::clone(&counters),
            instance_id.clone(),
        )
        .with_policy(config.update_policy);

        let ctx = Self {
            config,
            instance_id,
            started_at: Instant::now(),
            requests: AtomicU64::new(0),
            phase: Mutex::new(ServicePhase::Booting),
            counters,
            events,
            sessions,
        };

        let boot_counters = ctx.counters.record_startup().map_err(HostError::Boot)?;
        ctx.events
            .append(
                &Event::new(&ctx.instance_id, EventKind::Startup)
                    .with("startup_count", boot_counters.startup_count)
                    .with("crash_count", boot_counters.crash_count),
            )
            .map_err(HostError::Boot)?;
        ctx.advance(ServicePhase::Serving)?;

        tracing::info!(
            instance_id = %ctx.instance_id,
            startup_count = boot_counters.startup_count,
            crash_count = boot_counters.crash_count,
            data_dir = %ctx.config.data_dir.display(),
            update_policy = ctx.sessions.policy().as_str(),
            "service booted"
        );
        Ok(Arc::new(ctx))
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn phase(&self) -> ServicePhase {
        *self.lock_phase()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Count one request against this instance; returns the new total.
    pub fn note_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn requests_served(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> Result<Health, HostError> {
        let counters = self.counters.load()?;
        Ok(Health {
            status: "ok",
            instance_id: self.instance_id.clone(),
            startup_count: counters.startup_count,
            uptime_seconds: uptime_seconds(self.uptime()),
        })
    }

    pub fn state(&self) -> Result<StateReport, HostError> {
        let counters = self.counters.load()?;
        let live_sessions = self.sessions.count()?;
        Ok(StateReport {
            instance: InstanceState {
                instance_id: self.instance_id.clone(),
                phase: self.phase(),
                uptime_seconds: uptime_seconds(self.uptime()),
                requests_this_instance: self.requests_served(),
            },
            durable: DurableState {
                startup_count: counters.startup_count,
                crash_count: counters.crash_count,
                total_sessions: counters.total_sessions,
                total_requests: counters.total_requests,
                live_sessions,
            },
        })
    }

    pub fn event_tail(&self, limit: Option<usize>) -> Result<EventTail, HostError> {
        Ok(self.events.read_tail(self.config.events.clamp(limit))?)
    }

    /// Durably record a crash and enter `CrashTriggered`. The caller is then
    /// expected to end the process abnormally.
    ///
    /// The phase lock is held from the check through the counter write, so a
    /// rejected trigger never touches `crash_count`.
    pub fn trigger_crash(&self) -> Result<LifecycleCounters, HostError> {
        let mut phase = self.lock_phase();
        check_transition(*phase, ServicePhase::CrashTriggered)?;
        let counters = self.counters.record_crash()?;
        let event = Event::new(&self.instance_id, EventKind::CrashTriggered)
            .with("crash_count", counters.crash_count);
        if let Err(err) = self.events.append(&event) {
            // crash_count is already durable, which is what matters.
            tracing::warn!("failed to append crash_triggered event: {err}");
        }
        set_phase(&mut phase, ServicePhase::CrashTriggered);
        tracing::error!(
            instance_id = %self.instance_id,
            crash_count = counters.crash_count,
            "crash triggered"
        );
        Ok(counters)
    }

    pub fn terminate(&self) -> Result<(), HostError> {
        self.advance(ServicePhase::Terminated)
    }

    /// Graceful stop: fold this instance's request count into the durable
    /// totals and log a `shutdown` event. Holds the phase lock like
    /// [`Self::trigger_crash`], so exactly one of the two wins.
    pub fn stop(&self) -> Result<LifecycleCounters, HostError> {
        let mut phase = self.lock_phase();
        check_transition(*phase, ServicePhase::Stopped)?;
        let requests = self.requests_served();
        let counters = self.counters.add_requests(requests)?;
        let event = Event::new(&self.instance_id, EventKind::Shutdown)
            .with("requests", requests)
            .with("uptime_seconds", uptime_seconds(self.uptime()));
        if let Err(err) = self.events.append(&event) {
            tracing::warn!("failed to append shutdown event: {err}");
        }
        set_phase(&mut phase, ServicePhase::Stopped);
        tracing::info!(instance_id = %self.instance_id, requests, "service stopped");
        Ok(counters)
    }

    fn lock_phase(&self) -> MutexGuard<'_, ServicePhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, next: ServicePhase) -> Result<(), HostError> {
        let mut phase = self.lock_phase();
        check_transition(*phase, next)?;
        set_phase(&mut phase, next);
        Ok(())
    }
}

fn check_transition(from: ServicePhase, to: ServicePhase) -> Result<(), HostError> {
    if from.can_advance_to(to) {
        Ok(())
    } else {
        Err(HostError::Transition { from, to })
    }
}

fn set_phase(phase: &mut ServicePhase, next: ServicePhase) {
    let from = *phase;
    tracing::debug!(%from, to = %next, "phase transition");
    *phase = next;
}

fn boot_error(err: statehold_store::StoreError) -> HostError {
    HostError::Boot(KernelError::from(err))
}

fn uptime_seconds(uptime: Duration) -> f64 {
    (uptime.as_secs_f64() * 10.0).round() / 10.0
}
