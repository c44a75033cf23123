use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use statehold_kernel::UpdatePolicy;

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Storage root shared with the inspector.
    pub data_dir: PathBuf,
    pub update_policy: UpdatePolicy,
    pub events: EventTailConfig,
    pub http_server: HttpServerConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data"),
            update_policy: UpdatePolicy::default(),
            events: EventTailConfig::default(),
            http_server: HttpServerConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}

/// Bounds for the event tail endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EventTailConfig {
    /// Entries returned when the caller gives no limit.
    pub default_limit: usize,
    /// Hard cap on any requested limit.
    pub max_limit: usize,
}

impl Default for EventTailConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 1000,
        }
    }
}

impl EventTailConfig {
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .min(self.max_limit)
    }
}

#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub bind: SocketAddr,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
        }
    }
}
