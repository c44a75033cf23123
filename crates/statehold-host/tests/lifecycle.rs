use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use statehold_host::{HostConfig, HostError, ServiceContext, ServicePhase};
use statehold_kernel::layout::{COUNTERS_FILE, EVENTS_FILE, SESSIONS_DIR};
use statehold_kernel::{EventKind, NewSession, SessionPatch};
use tempfile::TempDir;

fn boot(tmp: &TempDir) -> Arc<ServiceContext> {
    ServiceContext::boot(HostConfig::new(tmp.path())).expect("boot")
}

#[test]
fn each_boot_bumps_startup_count() {
    let tmp = TempDir::new().unwrap();
    let first = boot(&tmp);
    assert_eq!(first.health().unwrap().startup_count, 1);
    assert_eq!(first.phase(), ServicePhase::Serving);

    let second = boot(&tmp);
    assert_eq!(second.health().unwrap().startup_count, 2);
    assert_ne!(first.instance_id(), second.instance_id());
    assert_eq!(second.state().unwrap().durable.crash_count, 0);
}

#[test]
fn a_fresh_instance_sees_every_committed_session() {
    let tmp = TempDir::new().unwrap();
    let first = boot(&tmp);
    let a = first
        .sessions()
        .create(NewSession {
            name: Some("a".into()),
            data: Some(serde_json::json!({"n": 1})),
        })
        .unwrap();
    first
        .sessions()
        .update(
            &a.id,
            SessionPatch {
                name: None,
                data: Some(serde_json::json!({"n": 2})),
            },
        )
        .unwrap();
    let b = first.sessions().create(NewSession::default()).unwrap();
    first.sessions().delete(&b.id).unwrap();
    drop(first);

    let second = boot(&tmp);
    let sessions = second.sessions().list().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, a.id);
    assert_eq!(sessions[0].access_count, 1);
    assert_eq!(sessions[0].data, serde_json::json!({"n": 2}));

    let durable = second.state().unwrap().durable;
    assert_eq!(durable.total_sessions, 2);
    assert_eq!(durable.live_sessions, 1);
}

#[test]
fn stop_folds_requests_and_logs_shutdown() {
    let tmp = TempDir::new().unwrap();
    let ctx = boot(&tmp);
    for _ in 0..5 {
        ctx.note_request();
    }
    let counters = ctx.stop().unwrap();
    assert_eq!(counters.total_requests, 5);
    assert_eq!(ctx.phase(), ServicePhase::Stopped);

    let tail = ctx.event_tail(Some(1)).unwrap();
    assert_eq!(tail.events[0].kind, EventKind::Shutdown);
    assert_eq!(tail.events[0].attributes["requests"], 5);
}

#[test]
fn crash_needs_a_serving_instance() {
    let tmp = TempDir::new().unwrap();
    let ctx = boot(&tmp);
    ctx.stop().unwrap();

    let err = ctx.trigger_crash().unwrap_err();
    assert!(matches!(
        err,
        HostError::Transition {
            from: ServicePhase::Stopped,
            to: ServicePhase::CrashTriggered
        }
    ));
    assert_eq!(ctx.state().unwrap().durable.crash_count, 0);
}

#[test]
fn crash_is_durable_before_terminate() {
    let tmp = TempDir::new().unwrap();
    let ctx = boot(&tmp);
    let counters = ctx.trigger_crash().unwrap();
    assert_eq!(counters.crash_count, 1);
    assert_eq!(ctx.phase(), ServicePhase::CrashTriggered);

    // Nothing else runs after a crash; the next boot reads the same root.
    let next = boot(&tmp);
    assert_eq!(next.state().unwrap().durable.crash_count, 1);
    let startup = next.event_tail(Some(1)).unwrap().events.remove(0);
    assert_eq!(startup.kind, EventKind::Startup);
    assert_eq!(startup.attributes["crash_count"], 1);
    assert_eq!(startup.attributes["startup_count"], 2);

    ctx.terminate().unwrap();
    assert_eq!(ctx.phase(), ServicePhase::Terminated);
}

#[test]
fn boot_refuses_corrupt_counters() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(COUNTERS_FILE), b"{\"startup_count\": ").unwrap();

    let err = ServiceContext::boot(HostConfig::new(tmp.path())).unwrap_err();
    assert!(matches!(err, HostError::Boot(ref e) if e.is_corrupt()), "{err:?}");
    // The damaged file is left for the operator, not reset.
    assert_eq!(
        fs::read(tmp.path().join(COUNTERS_FILE)).unwrap(),
        b"{\"startup_count\": "
    );
}

#[test]
fn boot_cleans_up_after_an_interrupted_writer() {
    let tmp = TempDir::new().unwrap();
    drop(boot(&tmp));

    let sessions = tmp.path().join(SESSIONS_DIR);
    fs::write(sessions.join(".abc.json.x1y2.tmp"), b"{\"half\":").unwrap();
    fs::write(tmp.path().join(".stats.json.z9.tmp"), b"{}").unwrap();
    let events = tmp.path().join(EVENTS_FILE);
    let mut log = fs::read(&events).unwrap();
    log.extend_from_slice(b"{\"timestamp\":\"2026");
    fs::write(&events, &log).unwrap();

    let ctx = boot(&tmp);
    assert!(!sessions.join(".abc.json.x1y2.tmp").exists());
    assert!(!tmp.path().join(".stats.json.z9.tmp").exists());

    let tail = ctx.event_tail(None).unwrap();
    assert_eq!(tail.skipped, 0);
    assert_eq!(tail.total, 2);
    assert!(tail.events.iter().all(|e| e.kind == EventKind::Startup));
}

/// Run `a` and `b` against the same context at the same moment.
fn race<A, B, RA, RB>(ctx: &Arc<ServiceContext>, a: A, b: B) -> (RA, RB)
where
    A: FnOnce(&ServiceContext) -> RA + Send + 'static,
    B: FnOnce(&ServiceContext) -> RB + Send + 'static,
    RA: Send + 'static,
    RB: Send + 'static,
{
    let barrier = Arc::new(Barrier::new(2));
    let left = {
        let (ctx, barrier) = (Arc::clone(ctx), Arc::clone(&barrier));
        thread::spawn(move || {
            barrier.wait();
            a(&ctx)
        })
    };
    let right = {
        let (ctx, barrier) = (Arc::clone(ctx), Arc::clone(&barrier));
        thread::spawn(move || {
            barrier.wait();
            b(&ctx)
        })
    };
    (left.join().unwrap(), right.join().unwrap())
}

#[test]
fn concurrent_crash_triggers_count_once() {
    for _ in 0..20 {
        let tmp = TempDir::new().unwrap();
        let ctx = boot(&tmp);
        let (a, b) = race(&ctx, |c| c.trigger_crash(), |c| c.trigger_crash());

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1, "{a:?} / {b:?}");
        let rejected = if a.is_err() { a } else { b };
        assert!(matches!(rejected, Err(HostError::Transition { .. })));
        assert_eq!(ctx.state().unwrap().durable.crash_count, 1);
        assert_eq!(ctx.phase(), ServicePhase::CrashTriggered);
    }
}

#[test]
fn crash_racing_stop_has_one_winner_and_no_stray_count() {
    for _ in 0..20 {
        let tmp = TempDir::new().unwrap();
        let ctx = boot(&tmp);
        let (crash, stop) = race(&ctx, |c| c.trigger_crash(), |c| c.stop());

        assert_eq!(crash.is_ok() as u8 + stop.is_ok() as u8, 1, "{crash:?} / {stop:?}");
        let durable = ctx.state().unwrap().durable;
        if crash.is_ok() {
            assert_eq!(durable.crash_count, 1);
            assert_eq!(ctx.phase(), ServicePhase::CrashTriggered);
        } else {
            assert_eq!(durable.crash_count, 0);
            assert_eq!(ctx.phase(), ServicePhase::Stopped);
        }
    }
}

#[tokio::test]
async fn daemon_reports_a_crash_that_beat_the_shutdown_signal() {
    use statehold_host::{ControlMsg, ServiceDaemon, ServiceExit};
    use tokio::sync::{broadcast, mpsc};

    let tmp = TempDir::new().unwrap();
    let ctx = boot(&tmp);
    let (control_tx, control_rx) = mpsc::channel(4);
    let (shutdown_tx, _) = broadcast::channel(1);
    let daemon = ServiceDaemon::new(Arc::clone(&ctx), control_rx, shutdown_tx.clone(), None);

    let counters = ctx.trigger_crash().unwrap();
    shutdown_tx.send(()).unwrap();
    control_tx
        .send(ControlMsg::Crash {
            crash_count: counters.crash_count,
        })
        .await
        .unwrap();

    let exit = daemon.run().await.unwrap();
    assert_eq!(exit, ServiceExit::Crashed { crash_count: 1 });
    assert_eq!(ctx.phase(), ServicePhase::Terminated);
    assert_eq!(ctx.state().unwrap().durable.total_requests, 0);
}
