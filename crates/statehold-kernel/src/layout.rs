//! On-disk layout shared by the service and the inspector.
//!
//! These names are the only contract between the two processes; changing one
//! makes an older inspector blind to a newer service's data.

use std::path::PathBuf;

pub const SESSIONS_DIR: &str = "sessions";
pub const SESSION_EXT: &str = "json";
pub const COUNTERS_FILE: &str = "stats.json";
pub const EVENTS_FILE: &str = "events.jsonl";

/// Relative path of a session record.
pub fn session_file(id: &str) -> PathBuf {
    PathBuf::from(SESSIONS_DIR).join(format!("{id}.{SESSION_EXT}"))
}
