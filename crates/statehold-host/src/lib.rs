//! The long-lived service process: boot sequence, lifecycle state machine,
//! HTTP surface and the control loop that ends in a graceful stop or a crash.

pub mod config;
pub mod error;
pub mod http;
pub mod modes;
pub mod service;

pub use config::{EventTailConfig, HostConfig, HttpServerConfig};
pub use error::HostError;
pub use modes::daemon::{CRASH_EXIT_CODE, ControlMsg, ServiceDaemon, ServiceExit};
pub use service::{ServiceContext, ServicePhase};
