use statehold_kernel::KernelError;
use thiserror::Error;

use crate::service::ServicePhase;

#[derive(Debug, Error)]
pub enum HostError {
    /// The service could not durably record its own boot and must not serve.
    #[error("boot failed: {0}")]
    Boot(#[source] KernelError),
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("invalid phase transition {from} -> {to}")]
    Transition {
        from: ServicePhase,
        to: ServicePhase,
    },
    #[error("http server error: {0}")]
    Http(String),
    #[error("control loop unavailable: {0}")]
    Control(String),
}
