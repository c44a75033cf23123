//! Durable session state: lifecycle counters, the event log, session records,
//! and the read-only inspector, all on top of `statehold-store`.

pub mod clock;
pub mod counters;
pub mod error;
pub mod events;
pub mod inspect;
pub mod instance;
pub mod layout;
pub mod sessions;

pub use counters::{CounterStore, LifecycleCounters};
pub use error::{KernelError, KernelResult};
pub use events::{Event, EventKind, EventLog, EventTail};
pub use inspect::{InspectReport, inspect};
pub use instance::InstanceId;
pub use sessions::{NewSession, Session, SessionManager, SessionPatch, SessionScan, UpdatePolicy};
