//! Control loop for a serving instance.
//!
//! The daemon waits for one of three things:
//! 1. A crash request, which ends the loop with [`ServiceExit::Crashed`]
//!    without any graceful work; the binary turns that into an abnormal exit.
//! 2. A shutdown request on the control channel.
//! 3. The shutdown broadcast (Ctrl-C / SIGTERM).
//!
//! The last two run the graceful stop and wait for the HTTP server to drain.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::HostError;
use crate::service::{ServiceContext, ServicePhase};

/// Exit status of a process whose crash was triggered on purpose.
pub const CRASH_EXIT_CODE: i32 = 1;

#[derive(Debug)]
pub enum ControlMsg {
    /// The crash is already durably recorded; the loop must end now.
    Crash { crash_count: u64 },
    Shutdown {
        resp: oneshot::Sender<Result<(), HostError>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceExit {
    Stopped,
    Crashed { crash_count: u64 },
}

impl ServiceExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            ServiceExit::Stopped => 0,
            ServiceExit::Crashed { .. } => CRASH_EXIT_CODE,
        }
    }
}

pub struct ServiceDaemon {
    ctx: Arc<ServiceContext>,
    control_rx: mpsc::Receiver<ControlMsg>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    http_server: Option<JoinHandle<()>>,
}

impl ServiceDaemon {
    pub fn new(
        ctx: Arc<ServiceContext>,
        control_rx: mpsc::Receiver<ControlMsg>,
        shutdown_tx: broadcast::Sender<()>,
        http_server: Option<JoinHandle<()>>,
    ) -> Self {
        let shutdown_rx = shutdown_tx.subscribe();
        Self {
            ctx,
            control_rx,
            shutdown_tx,
            shutdown_rx,
            http_server,
        }
    }

    pub async fn run(mut self) -> Result<ServiceExit, HostError> {
        tracing::info!(instance_id = %self.ctx.instance_id(), "service daemon started");

        let mut shutdown_resp = None;
        loop {
            tokio::select! {
                msg = self.control_rx.recv() => match msg {
                    Some(ControlMsg::Crash { crash_count }) => {
                        self.ctx.terminate()?;
                        tracing::error!(crash_count, "terminating after triggered crash");
                        // No graceful stop and no server drain: the process is
                        // about to disappear.
                        return Ok(ServiceExit::Crashed { crash_count });
                    }
                    Some(ControlMsg::Shutdown { resp }) => {
                        tracing::info!("Shutdown requested via control channel");
                        shutdown_resp = Some(resp);
                        break;
                    }
                    None => {
                        tracing::debug!("Control channel closed");
                        break;
                    }
                },
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        if self.ctx.phase() == ServicePhase::CrashTriggered {
            // A crash won the race against this shutdown; its message is
            // already on the way.
            while let Some(msg) = self.control_rx.recv().await {
                if let ControlMsg::Crash { crash_count } = msg {
                    self.ctx.terminate()?;
                    tracing::error!(crash_count, "terminating after triggered crash");
                    return Ok(ServiceExit::Crashed { crash_count });
                }
            }
        }

        let stopped = self.ctx.stop().map(|_| ());
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.http_server.take() {
            let _ = handle.await;
        }
        match shutdown_resp {
            Some(resp) => {
                let _ = resp.send(stopped);
            }
            None => stopped?,
        }
        Ok(ServiceExit::Stopped)
    }
}
