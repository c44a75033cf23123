//! `statehold run` command.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use statehold_host::http::{HttpState, spawn_http_server};
use statehold_host::{
    EventTailConfig, HostConfig, HttpServerConfig, ServiceContext, ServiceDaemon, ServiceExit,
};
use statehold_kernel::UpdatePolicy;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use crate::opts::GlobalOpts;
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Address to bind (env: STATEHOLD_BIND)
    #[arg(long, env = "STATEHOLD_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on (env: PORT)
    #[arg(short = 'p', long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Same-session update handling: last-writer-wins or serialized
    /// (env: STATEHOLD_UPDATE_POLICY)
    #[arg(long, env = "STATEHOLD_UPDATE_POLICY", default_value = "last-writer-wins")]
    pub update_policy: UpdatePolicy,

    /// Upper bound on `GET /events?limit=` (env: STATEHOLD_EVENTS_MAX)
    #[arg(long, env = "STATEHOLD_EVENTS_MAX", default_value_t = 1000)]
    pub events_max: usize,
}

impl RunArgs {
    fn host_config(&self, opts: &GlobalOpts) -> HostConfig {
        HostConfig {
            data_dir: opts.data_dir.clone(),
            update_policy: self.update_policy,
            events: EventTailConfig {
                max_limit: self.events_max,
                ..EventTailConfig::default()
            },
            http_server: HttpServerConfig {
                bind: SocketAddr::new(self.host, self.port),
            },
        }
    }
}

pub async fn cmd_run(opts: &GlobalOpts, args: &RunArgs) -> Result<()> {
    setup_logging();

    let config = args.host_config(opts);
    let ctx = ServiceContext::boot(config.clone())
        .with_context(|| format!("boot service on {}", config.data_dir.display()))?;

    let (control_tx, control_rx) = mpsc::channel(16);
    let (shutdown_tx, _) = broadcast::channel(1);

    // Handle Ctrl-C and SIGTERM for graceful shutdown
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down...");
            }
            _ = async {
                if let Some(ref mut t) = term { t.recv().await; }
            } => {
                tracing::info!("SIGTERM received, shutting down...");
            }
        }
        let _ = shutdown_tx_clone.send(());
    });

    let state = HttpState::new(Arc::clone(&ctx), control_tx);
    let (_, http_handle) = spawn_http_server(&config.http_server, state, shutdown_tx.clone())
        .await
        .context("start http server")?;

    let daemon = ServiceDaemon::new(Arc::clone(&ctx), control_rx, shutdown_tx, Some(http_handle));
    match daemon.run().await? {
        exit @ ServiceExit::Crashed { .. } => {
            // Skip destructors and runtime shutdown: nothing graceful happens
            // after a triggered crash.
            std::process::exit(exit.exit_code());
        }
        ServiceExit::Stopped => print_success(
            opts,
            serde_json::json!({
                "status": "stopped",
                "instance_id": ctx.instance_id().as_str(),
                "requests": ctx.requests_served(),
            }),
            vec![],
        ),
    }
}

/// Set up tracing subscriber for service logging. `RUST_LOG` overrides the
/// default `info` level.
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        opts: GlobalOpts,
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn flags_map_onto_host_config() {
        let parsed = Harness::try_parse_from([
            "statehold",
            "--data-dir",
            "/tmp/state",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--update-policy",
            "serialized",
            "--events-max",
            "20",
        ])
        .unwrap();
        let config = parsed.run.host_config(&parsed.opts);
        assert_eq!(config.data_dir, std::path::PathBuf::from("/tmp/state"));
        assert_eq!(config.update_policy, UpdatePolicy::Serialized);
        assert_eq!(config.http_server.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.events.max_limit, 20);
        assert_eq!(config.events.clamp(None), 20);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(
            Harness::try_parse_from(["statehold", "--update-policy", "strict"]).is_err()
        );
    }
}
