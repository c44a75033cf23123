//! Read-only consistency report over a storage root.
//!
//! Runs in its own process, possibly while the service is writing or after it
//! died mid-write. It only uses the store's read primitive and never fails:
//! anything missing or unreadable degrades to defaults plus a warning.

use std::path::{Path, PathBuf};

use serde::Serialize;
use statehold_store::FsStore;

use crate::counters::LifecycleCounters;
use crate::events::{Event, EventLog};
use crate::layout::COUNTERS_FILE;
use crate::sessions::{Session, SessionScan};

pub const DEFAULT_INSPECT_EVENTS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub storage_path: PathBuf,
    pub storage_present: bool,
    /// False when no counters record exists yet.
    pub counters_present: bool,
    pub counters: LifecycleCounters,
    pub sessions: Vec<Session>,
    pub corrupt_sessions: Vec<PathBuf>,
    pub recent_events: Vec<Event>,
    pub total_events: usize,
    pub skipped_event_lines: usize,
    pub warnings: Vec<String>,
}

pub fn inspect(root: impl AsRef<Path>, event_limit: usize) -> InspectReport {
    let root = root.as_ref();
    let mut report = InspectReport {
        storage_path: root.to_path_buf(),
        storage_present: root.is_dir(),
        counters_present: false,
        counters: LifecycleCounters::default(),
        sessions: Vec::new(),
        corrupt_sessions: Vec::new(),
        recent_events: Vec::new(),
        total_events: 0,
        skipped_event_lines: 0,
        warnings: Vec::new(),
    };
    if !report.storage_present {
        report
            .warnings
            .push(format!("storage path {} does not exist", root.display()));
        return report;
    }

    let store = FsStore::at(root);
    match store.read::<LifecycleCounters>(COUNTERS_FILE) {
        Ok(counters) => {
            report.counters = counters;
            report.counters_present = true;
        }
        Err(err) if err.is_not_found() => {}
        Err(err) => report
            .warnings
            .push(format!("counters unreadable, showing zeros: {err}")),
    }

    match SessionScan::scan(&store) {
        Ok(scan) => {
            for path in &scan.corrupt {
                report
                    .warnings
                    .push(format!("skipped corrupt session record {}", path.display()));
            }
            report.sessions = scan.sessions;
            report.corrupt_sessions = scan.corrupt;
        }
        Err(err) => report.warnings.push(format!("sessions unreadable: {err}")),
    }

    match EventLog::new(root).read_tail(event_limit) {
        Ok(tail) => {
            report.recent_events = tail.events;
            report.total_events = tail.total;
            report.skipped_event_lines = tail.skipped;
        }
        Err(err) => report.warnings.push(format!("event log unreadable: {err}")),
    }

    report
}
