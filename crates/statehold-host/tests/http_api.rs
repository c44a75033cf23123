use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use statehold_host::http::{HttpState, spawn_http_server};
use statehold_host::{
    ControlMsg, HostConfig, HttpServerConfig, ServiceContext, ServiceDaemon, ServiceExit,
    ServicePhase,
};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    ctx: Arc<ServiceContext>,
    control_tx: mpsc::Sender<ControlMsg>,
    control_rx: mpsc::Receiver<ControlMsg>,
    shutdown_tx: broadcast::Sender<()>,
    server: JoinHandle<()>,
}

async fn start(root: &Path) -> Running {
    let mut config = HostConfig::new(root);
    config.http_server = HttpServerConfig {
        bind: "127.0.0.1:0".parse().expect("addr"),
    };
    let ctx = ServiceContext::boot(config.clone()).expect("boot");
    let (control_tx, control_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(1);
    let state = HttpState::new(Arc::clone(&ctx), control_tx.clone());
    let (addr, server) = spawn_http_server(&config.http_server, state, shutdown_tx.clone())
        .await
        .expect("spawn http");
    Running {
        addr,
        ctx,
        control_tx,
        control_rx,
        shutdown_tx,
        server,
    }
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

#[tokio::test]
async fn session_crud_over_http() {
    let tmp = TempDir::new().expect("tmpdir");
    let svc = start(tmp.path()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(url(svc.addr, "/sessions"))
        .json(&json!({"name": "alice", "data": {"env": "test"}}))
        .send()
        .await
        .expect("create");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let created: Value = response.json().await.expect("decode");
    assert_eq!(created["access_count"], 0);
    assert_eq!(created["name"], "alice");
    let id = created["id"].as_str().expect("id").to_string();

    let updated: Value = client
        .put(url(svc.addr, &format!("/sessions/{id}")))
        .json(&json!({"data": {"env": "updated"}}))
        .send()
        .await
        .expect("update")
        .json()
        .await
        .expect("decode");
    assert_eq!(updated["access_count"], 1);
    assert_eq!(updated["data"]["env"], "updated");

    let listed: Value = client
        .get(url(svc.addr, "/sessions"))
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("decode");
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["sessions"][0]["id"], id.as_str());

    let deleted: Value = client
        .delete(url(svc.addr, &format!("/sessions/{id}")))
        .send()
        .await
        .expect("delete")
        .json()
        .await
        .expect("decode");
    assert_eq!(deleted, json!({"status": "deleted", "id": id}));

    let missing = client
        .get(url(svc.addr, &format!("/sessions/{id}")))
        .send()
        .await
        .expect("get");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = missing.json().await.expect("decode");
    assert_eq!(body["code"], "not_found");

    svc.server.abort();
}

#[tokio::test]
async fn create_without_body_uses_defaults_and_bad_json_is_rejected() {
    let tmp = TempDir::new().expect("tmpdir");
    let svc = start(tmp.path()).await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(url(svc.addr, "/sessions"))
        .send()
        .await
        .expect("create")
        .json()
        .await
        .expect("decode");
    assert_eq!(created["name"], "unnamed");
    assert_eq!(created["data"], json!({}));

    let bad = client
        .post(url(svc.addr, "/sessions"))
        .header("content-type", "application/json")
        .body("{\"name\": ")
        .send()
        .await
        .expect("create");
    assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = bad.json().await.expect("decode");
    assert_eq!(body["code"], "invalid_request");

    svc.server.abort();
}

#[tokio::test]
async fn health_and_state_separate_durable_from_ephemeral() {
    let tmp = TempDir::new().expect("tmpdir");
    let svc = start(tmp.path()).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(url(svc.addr, "/health"))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("decode");
    assert_eq!(health["status"], "ok");
    assert_eq!(health["startup_count"], 1);
    assert_eq!(health["instance_id"], svc.ctx.instance_id().as_str());
    assert!(health["uptime_seconds"].is_number());

    client
        .post(url(svc.addr, "/sessions"))
        .json(&json!({"name": "s"}))
        .send()
        .await
        .expect("create");

    let state: Value = client
        .get(url(svc.addr, "/state"))
        .send()
        .await
        .expect("state")
        .json()
        .await
        .expect("decode");
    assert_eq!(state["instance"]["phase"], "serving");
    assert_eq!(state["instance"]["requests_this_instance"], 3);
    assert_eq!(state["durable"]["startup_count"], 1);
    assert_eq!(state["durable"]["crash_count"], 0);
    assert_eq!(state["durable"]["total_sessions"], 1);
    assert_eq!(state["durable"]["live_sessions"], 1);

    svc.server.abort();
}

#[tokio::test]
async fn events_are_chronological_and_limited() {
    let tmp = TempDir::new().expect("tmpdir");
    let svc = start(tmp.path()).await;
    let client = reqwest::Client::new();
    for name in ["a", "b", "c"] {
        client
            .post(url(svc.addr, "/sessions"))
            .json(&json!({ "name": name }))
            .send()
            .await
            .expect("create");
    }

    let all: Value = client
        .get(url(svc.addr, "/events"))
        .send()
        .await
        .expect("events")
        .json()
        .await
        .expect("decode");
    assert_eq!(all["count"], 4);
    assert_eq!(all["events"][0]["kind"], "startup");
    assert_eq!(all["events"][0]["attributes"]["startup_count"], 1);

    let tail: Value = client
        .get(url(svc.addr, "/events?limit=2"))
        .send()
        .await
        .expect("events")
        .json()
        .await
        .expect("decode");
    let events = tail["events"].as_array().expect("array");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["attributes"]["name"], "b");
    assert_eq!(events[1]["attributes"]["name"], "c");
    assert_eq!(events[1]["instance_id"], svc.ctx.instance_id().as_str());

    svc.server.abort();
}

#[tokio::test]
async fn crash_is_recorded_before_the_daemon_exits() {
    let tmp = TempDir::new().expect("tmpdir");
    let svc = start(tmp.path()).await;
    let client = reqwest::Client::new();
    let first_instance = svc.ctx.instance_id().clone();

    let created: Value = client
        .post(url(svc.addr, "/sessions"))
        .json(&json!({"name": "survivor", "data": {"k": 1}}))
        .send()
        .await
        .expect("create")
        .json()
        .await
        .expect("decode");

    let daemon = ServiceDaemon::new(
        Arc::clone(&svc.ctx),
        svc.control_rx,
        svc.shutdown_tx.clone(),
        Some(svc.server),
    );
    let daemon = tokio::spawn(daemon.run());
    let crash_client = client.clone();
    let addr = svc.addr;
    let crash = tokio::spawn(async move { crash_client.post(url(addr, "/crash")).send().await });

    let exit = daemon.await.expect("join").expect("run");
    assert_eq!(exit, ServiceExit::Crashed { crash_count: 1 });
    assert_eq!(exit.exit_code(), 1);
    assert_eq!(svc.ctx.phase(), ServicePhase::Terminated);
    crash.abort();

    // Restart on the same storage root.
    let restarted = ServiceContext::boot(HostConfig::new(tmp.path())).expect("reboot");
    assert_ne!(restarted.instance_id(), &first_instance);
    let state = restarted.state().expect("state");
    assert_eq!(state.durable.crash_count, 1);
    assert_eq!(state.durable.startup_count, 2);
    let survivor = restarted
        .sessions()
        .get(created["id"].as_str().expect("id"))
        .expect("session survives");
    assert_eq!(survivor.name, "survivor");
    assert_eq!(survivor.access_count, 0);
    assert_eq!(survivor.data, json!({"k": 1}));

    let kinds: Vec<String> = restarted
        .event_tail(None)
        .expect("tail")
        .events
        .iter()
        .map(|e| e.kind.to_string())
        .collect();
    assert_eq!(
        kinds,
        vec!["startup", "session_created", "crash_triggered", "startup"]
    );
}

#[tokio::test]
async fn graceful_shutdown_folds_requests_into_totals() {
    let tmp = TempDir::new().expect("tmpdir");
    let svc = start(tmp.path()).await;
    {
        let client = reqwest::Client::new();
        for _ in 0..3 {
            client
                .get(url(svc.addr, "/health"))
                .send()
                .await
                .expect("health");
        }
    }

    let daemon = tokio::spawn(
        ServiceDaemon::new(
            Arc::clone(&svc.ctx),
            svc.control_rx,
            svc.shutdown_tx.clone(),
            Some(svc.server),
        )
        .run(),
    );
    let (resp_tx, resp_rx) = tokio::sync::oneshot::channel();
    svc.control_tx
        .send(ControlMsg::Shutdown { resp: resp_tx })
        .await
        .expect("send shutdown");
    resp_rx.await.expect("resp").expect("stop");
    let exit = daemon.await.expect("join").expect("run");
    assert_eq!(exit, ServiceExit::Stopped);
    assert_eq!(svc.ctx.phase(), ServicePhase::Stopped);

    let again = ServiceContext::boot(HostConfig::new(tmp.path())).expect("reboot");
    let state = again.state().expect("state");
    assert_eq!(state.durable.total_requests, 3);
    assert_eq!(state.durable.startup_count, 2);
    assert_eq!(state.durable.crash_count, 0);
}
