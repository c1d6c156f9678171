// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::deployments::DeploymentStore;
use crate::session::{BridgeRegistrar, FakeTopicClient};
use crate::toolchain::{DirectoryInstaller, ToolchainManager, SERVER_BINARY};
use tokio::sync::broadcast;
use warden_core::{FakeClock, RevisionInfo};
use warden_host::FakeProcessExecutor;

struct Harness {
    _tmp: tempfile::TempDir,
    watchdog: Watchdog,
    executor: FakeProcessExecutor,
    topic: FakeTopicClient,
    registrar: Arc<BridgeRegistrar>,
    deployments: Arc<DeploymentStore>,
    store: Arc<Store>,
    events: broadcast::Receiver<Event>,
}

fn params(port_base: u16, heartbeat_secs: u64) -> LaunchParams {
    LaunchParams {
        primary_port: port_base,
        secondary_port: port_base + 1,
        startup_timeout_secs: 2,
        heartbeat_secs,
        topic_timeout_secs: 1,
        ..LaunchParams::default()
    }
}

async fn harness(params: LaunchParams, with_deployment: bool) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::load(tmp.path().join("state.json")).unwrap());

    let bin = tmp.path().join("mirror/514.1589/bin");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::write(bin.join(SERVER_BINARY), b"#!bin").unwrap();
    let toolchain = Arc::new(ToolchainManager::new(
        tmp.path().join("cache"),
        Arc::new(DirectoryInstaller::new(tmp.path().join("mirror"))),
    ));
    toolchain
        .install(
            "514.1589",
            &warden_core::ProgressReporter::discard(),
            &tokio_util::sync::CancellationToken::new(),
        )
        .await
        .unwrap();

    let deployments = Arc::new(DeploymentStore::new(
        InstanceId::from_string("ins-wd"),
        tmp.path().join("Game"),
        Arc::clone(&store),
    ));
    if with_deployment {
        commit_deployment(&deployments, "aaa");
    }

    let executor = FakeProcessExecutor::new();
    let topic = FakeTopicClient::new();
    let registrar = Arc::new(BridgeRegistrar::new());
    let bus = EventBus::new();
    let events = bus.subscribe();

    let deps = WatchdogDeps {
        session: SessionDeps {
            executor: Arc::new(executor.clone()),
            registrar: Arc::clone(&registrar),
            topic: Arc::new(topic.clone()),
            toolchain,
            bridge_port: 5580,
        },
        deployments: Arc::clone(&deployments),
        store: Arc::clone(&store),
        events: bus,
    };
    let watchdog = Watchdog::spawn(InstanceId::from_string("ins-wd"), params, deps);

    Harness { _tmp: tmp, watchdog, executor, topic, registrar, deployments, store, events }
}

fn commit_deployment(deployments: &Arc<DeploymentStore>, sha: &str) -> DeploymentId {
    deployments
        .begin(
            RevisionInfo { sha: sha.into(), origin_sha: sha.into(), test_merges: Vec::new() },
            "514.1589".into(),
            warden_core::SecurityLevel::Safe,
            "station.dmb".into(),
            &FakeClock::new(),
        )
        .unwrap()
        .commit()
        .unwrap()
        .id
}

/// Answers the bridge startup handshake for every launch the fake
/// executor sees, like a well-behaved game server would.
fn spawn_handshaker(executor: FakeProcessExecutor, registrar: Arc<BridgeRegistrar>) {
    tokio::spawn(async move {
        let mut seen = 0;
        loop {
            let launches = executor.launches();
            while seen < launches.len() {
                let launch = &launches[seen];
                let port: u16 = launch
                    .args
                    .iter()
                    .position(|a| a == "-port")
                    .and_then(|i| launch.args.get(i + 1))
                    .and_then(|p| p.parse().ok())
                    .unwrap();
                let access = launch
                    .args
                    .last()
                    .unwrap()
                    .split('&')
                    .find_map(|pair| pair.strip_prefix("access_identifier="))
                    .unwrap()
                    .to_string();
                registrar.route(&access, BridgeRequest::Startup { port }).await;
                seen += 1;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
}

async fn wait_until<F: Fn(&WatchdogStatus) -> bool>(watchdog: &Watchdog, pred: F) -> WatchdogStatus {
    let mut rx = watchdog.subscribe();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if pred(&rx.borrow()) {
                return rx.borrow().clone();
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("watchdog never reached expected status")
}

async fn next_event(events: &mut broadcast::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

#[tokio::test]
async fn start_reaches_online_and_persists_reattach() {
    let mut h = harness(params(42110, 0), true).await;
    spawn_handshaker(h.executor.clone(), Arc::clone(&h.registrar));

    h.watchdog.start().await.unwrap();

    let status = h.watchdog.status();
    assert_eq!(status.state, WatchdogState::Online);
    assert_eq!(status.port, Some(42110));
    assert!(status.pid.is_some());
    assert_eq!(status.active_deployment, h.deployments.latest().map(|d| d.id));

    let record = h.store.with(|s| s.reattach.get(&InstanceId::from_string("ins-wd")).cloned());
    assert_eq!(record.map(|r| r.pid), status.pid);

    next_event(&mut h.events, |e| matches!(e, Event::WatchdogLaunched { .. })).await;
}

#[tokio::test]
async fn start_without_deployment_fails_offline() {
    let h = harness(params(42120, 0), false).await;
    let err = h.watchdog.start().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::DeploymentMissing);
    assert_eq!(h.watchdog.status().state, WatchdogState::Offline);
}

#[tokio::test]
async fn startup_timeout_kills_the_session() {
    // No handshaker: the session never completes the bridge handshake
    let h = harness(params(42130, 0), true).await;

    let err = h.watchdog.start().await.unwrap_err();
    assert!(matches!(err, WatchdogError::Session(SessionError::StartupTimeout(_))));
    assert_eq!(h.watchdog.status().state, WatchdogState::Offline);
    // No process remains
    assert!(h.executor.running_pids().is_empty());
}

#[tokio::test]
async fn start_is_idempotent_while_online() {
    let h = harness(params(42140, 0), true).await;
    spawn_handshaker(h.executor.clone(), Arc::clone(&h.registrar));

    h.watchdog.start().await.unwrap();
    let first_pid = h.watchdog.status().pid;
    h.watchdog.start().await.unwrap();
    assert_eq!(h.watchdog.status().pid, first_pid);
    assert_eq!(h.executor.launches().len(), 1);
}

#[tokio::test]
async fn crash_relaunches_from_active_slot() {
    let mut h = harness(params(42150, 0), true).await;
    spawn_handshaker(h.executor.clone(), Arc::clone(&h.registrar));

    h.watchdog.start().await.unwrap();
    let old_pid = h.watchdog.status().pid.unwrap();

    h.executor.exit(old_pid, 139);

    next_event(&mut h.events, |e| matches!(e, Event::WatchdogCrashed { .. })).await;
    next_event(&mut h.events, |e| matches!(e, Event::WatchdogRelaunched { .. })).await;

    let status = wait_until(&h.watchdog, |s| {
        s.state == WatchdogState::Online && s.pid != Some(old_pid)
    })
    .await;
    assert_eq!(status.port, Some(42150));
}

#[tokio::test]
async fn soft_shutdown_takes_effect_at_natural_reboot() {
    let h = harness(params(42160, 0), true).await;
    spawn_handshaker(h.executor.clone(), Arc::clone(&h.registrar));

    h.watchdog.start().await.unwrap();
    let pid = h.watchdog.status().pid.unwrap();

    h.watchdog.soft_shutdown().await.unwrap();
    // Still online until the session's own reboot
    assert_eq!(h.watchdog.status().state, WatchdogState::Online);
    assert_eq!(h.watchdog.status().reboot_state, RebootState::Shutdown);

    // The session reboots naturally (exits)
    h.executor.exit(pid, 0);
    let status = wait_until(&h.watchdog, |s| s.state == WatchdogState::Offline).await;
    assert_eq!(status.pid, None);
    assert!(h.store.with(|s| s.reattach.is_empty()));
}

#[tokio::test]
async fn soft_restart_relaunches_at_natural_reboot() {
    let h = harness(params(42170, 0), true).await;
    spawn_handshaker(h.executor.clone(), Arc::clone(&h.registrar));

    h.watchdog.start().await.unwrap();
    let pid = h.watchdog.status().pid.unwrap();

    h.watchdog.soft_restart().await.unwrap();
    h.executor.exit(pid, 0);

    let status = wait_until(&h.watchdog, |s| {
        s.state == WatchdogState::Online && s.pid != Some(pid)
    })
    .await;
    assert_eq!(status.reboot_state, RebootState::Normal);
}

#[tokio::test]
async fn zero_downtime_swap_promotes_staged_deployment() {
    let mut h = harness(params(42180, 0), true).await;
    spawn_handshaker(h.executor.clone(), Arc::clone(&h.registrar));

    h.watchdog.start().await.unwrap();
    let old_pid = h.watchdog.status().pid.unwrap();
    let d1 = h.watchdog.status().active_deployment.clone().unwrap();

    let d2 = commit_deployment(&h.deployments, "bbb");

    // A cooperative old session exits when asked to gracefully reboot
    {
        let topic = h.topic.clone();
        let executor = h.executor.clone();
        tokio::spawn(async move {
            loop {
                if topic.sent().iter().any(|(_, p)| p == "command=graceful_reboot") {
                    executor.exit(old_pid, 0);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
    }

    h.watchdog.restart_with_latest().await.unwrap();

    let status = h.watchdog.status();
    assert_eq!(status.state, WatchdogState::Online);
    assert_eq!(status.active_deployment, Some(d2.clone()));
    assert_eq!(status.staged_deployment, None);
    assert_ne!(status.active_deployment, Some(d1));
    // The replacement bound the other configured port
    assert_eq!(status.port, Some(42181));
    assert_ne!(status.pid, Some(old_pid));
    assert!(!h.executor.running_pids().contains(&old_pid));

    next_event(&mut h.events, |e| matches!(e, Event::WatchdogSwapComplete { .. })).await;
}

#[tokio::test]
async fn restart_while_offline_is_a_plain_start() {
    let h = harness(params(42190, 0), true).await;
    spawn_handshaker(h.executor.clone(), Arc::clone(&h.registrar));

    h.watchdog.restart_with_latest().await.unwrap();
    assert_eq!(h.watchdog.status().state, WatchdogState::Online);
}

#[tokio::test]
async fn stop_terminates_and_clears_record() {
    let mut h = harness(params(42200, 0), true).await;
    spawn_handshaker(h.executor.clone(), Arc::clone(&h.registrar));

    h.watchdog.start().await.unwrap();
    h.watchdog.stop(true).await.unwrap();

    assert_eq!(h.watchdog.status().state, WatchdogState::Offline);
    assert!(h.executor.running_pids().is_empty());
    assert!(h.store.with(|s| s.reattach.is_empty()));
    next_event(&mut h.events, |e| matches!(e, Event::WatchdogShutdown { .. })).await;
}

#[tokio::test]
async fn reattach_rebinds_a_live_process() {
    let h = harness(params(42210, 0), true).await;
    let deployment = h.deployments.latest().unwrap().id;

    h.executor.seed_pid(777);
    let record = ReattachRecord {
        instance: InstanceId::from_string("ins-wd"),
        pid: 777,
        access_identifier: "aaaabbbbccccdddd".into(),
        port: 42210,
        is_primary: true,
        reboot_state: RebootState::Normal,
        security_level: warden_core::SecurityLevel::Safe,
        deployment,
    };

    assert!(h.watchdog.reattach(record).await.unwrap());
    let status = h.watchdog.status();
    assert_eq!(status.state, WatchdogState::Online);
    assert_eq!(status.pid, Some(777));
    // No new process was spawned
    assert!(h.executor.launches().is_empty());
}

#[tokio::test]
async fn reattach_clears_record_when_process_is_gone() {
    let h = harness(params(42220, 0), true).await;
    let deployment = h.deployments.latest().unwrap().id;

    let record = ReattachRecord {
        instance: InstanceId::from_string("ins-wd"),
        pid: 888,
        access_identifier: "aaaabbbbccccdddd".into(),
        port: 42220,
        is_primary: false,
        reboot_state: RebootState::Normal,
        security_level: warden_core::SecurityLevel::Safe,
        deployment,
    };
    h.store
        .update(|s| {
            s.reattach.insert(record.instance.clone(), record.clone());
        })
        .unwrap();

    assert!(!h.watchdog.reattach(record).await.unwrap());
    assert_eq!(h.watchdog.status().state, WatchdogState::Offline);
    assert!(h.store.with(|s| s.reattach.is_empty()));
}

#[tokio::test]
async fn lost_heartbeats_count_as_unexpected_exit() {
    let mut h = harness(params(42230, 1), true).await;
    spawn_handshaker(h.executor.clone(), Arc::clone(&h.registrar));

    h.watchdog.start().await.unwrap();
    let old_pid = h.watchdog.status().pid.unwrap();

    h.topic.set_failing(true);
    let crash = next_event(&mut h.events, |e| matches!(e, Event::WatchdogCrashed { .. })).await;
    // Let the relaunched session heartbeat cleanly again
    h.topic.set_failing(false);

    if let Event::WatchdogCrashed { message, .. } = crash {
        assert!(message.contains("heartbeats"));
    }

    let status = wait_until(&h.watchdog, |s| {
        s.state == WatchdogState::Online && s.pid != Some(old_pid)
    })
    .await;
    assert_ne!(status.pid, Some(old_pid));
}
