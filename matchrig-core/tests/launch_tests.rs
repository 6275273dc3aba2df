// tests/launch_tests.rs
//
// Launch queue end to end over the fake launcher: strict serialization,
// duplicate handling and per-account failure isolation.

use std::sync::Arc;
use std::time::Duration;

use matchrig_core::config::AppConfig;
use matchrig_core::eventbus::{EventBus, MatchEvent};
use matchrig_core::launch::LaunchQueue;
use matchrig_core::logwatch::LogWatchService;
use matchrig_core::os::{ProcessApi, WindowSystem};
use matchrig_core::registry::AccountRegistry;
use matchrig_core::test_utils::{FakeDesktop, FakeLauncher, FakeProcs};
use matchrig_core::windows::{WindowArranger, WindowResolver};
use matchrig_common::models::{AccountRecord, StatusColor};

struct LaunchRig {
    queue: Arc<LaunchQueue>,
    launcher: Arc<FakeLauncher>,
    registry: Arc<AccountRegistry>,
    bus: Arc<EventBus>,
}

fn launch_rig(logins: &[&str]) -> LaunchRig {
    let cfg = AppConfig {
        post_launch_delay_secs: 0,
        inter_account_delay_secs: 0,
        ..AppConfig::default()
    };
    let desktop = Arc::new(FakeDesktop::new());
    let procs = Arc::new(FakeProcs::new());
    let launcher = Arc::new(FakeLauncher::with_procs(procs.clone(), &cfg.client_exe));
    let windows: Arc<dyn WindowSystem> = desktop;
    let process: Arc<dyn ProcessApi> = procs;

    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(AccountRegistry::new(process.clone(), bus.clone(), &cfg));
    registry.insert_all(
        logins
            .iter()
            .map(|l| AccountRecord::new(*l, "pw", 76561198000000001))
            .collect(),
    );
    let resolver = Arc::new(WindowResolver::new(windows.clone(), process.clone(), &cfg));
    let arranger = Arc::new(WindowArranger::new(windows, process, &cfg));
    let logwatch = Arc::new(LogWatchService::new(
        &cfg,
        resolver,
        arranger,
        bus.clone(),
    ));
    let queue = Arc::new(LaunchQueue::new(
        registry.clone(),
        launcher.clone(),
        logwatch,
        bus.clone(),
        &cfg,
    ));
    LaunchRig {
        queue,
        launcher,
        registry,
        bus,
    }
}

/// Drains bus events until `count` launch completions arrived.
async fn wait_for_launches(
    rx: &mut tokio::sync::mpsc::Receiver<MatchEvent>,
    count: usize,
) -> Vec<(String, bool)> {
    let mut finished = Vec::new();
    while finished.len() < count {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("launch events should keep arriving")
            .expect("bus must stay open");
        if let MatchEvent::LaunchFinished { login, success } = event {
            finished.push((login, success));
        }
    }
    finished
}

#[tokio::test]
async fn launches_run_one_at_a_time_in_submission_order() {
    let rig = launch_rig(&["alpha", "bravo", "charlie"]);
    let mut rx = rig.bus.subscribe(None).await;
    rig.queue.spawn_worker();

    let accepted = rig
        .queue
        .enqueue_batch(&["alpha".into(), "bravo".into(), "charlie".into()])
        .await;
    assert_eq!(accepted, 3);

    let finished = wait_for_launches(&mut rx, 3).await;
    assert_eq!(
        finished,
        vec![
            ("alpha".to_string(), true),
            ("bravo".to_string(), true),
            ("charlie".to_string(), true),
        ]
    );
    assert_eq!(rig.launcher.started(), ["alpha", "bravo", "charlie"]);
    assert_eq!(rig.registry.count_valid(), 3);
    for login in ["alpha", "bravo", "charlie"] {
        assert_eq!(
            rig.registry.get(login).unwrap().status(),
            StatusColor::Running
        );
    }
}

#[tokio::test]
async fn running_account_is_not_launched_again() {
    let rig = launch_rig(&["alpha"]);
    let mut rx = rig.bus.subscribe(None).await;
    rig.queue.spawn_worker();

    assert!(rig.queue.enqueue("alpha").await.unwrap());
    wait_for_launches(&mut rx, 1).await;

    // Client is up now; a second enqueue is a no-op, not a restart.
    assert!(!rig.queue.enqueue("alpha").await.unwrap());
    assert_eq!(rig.launcher.started(), ["alpha"]);
}

#[tokio::test]
async fn one_failed_launch_does_not_stop_the_batch() {
    let rig = launch_rig(&["alpha", "bravo"]);
    rig.launcher.fail_for("alpha");
    let mut rx = rig.bus.subscribe(None).await;
    rig.queue.spawn_worker();

    let accepted = rig
        .queue
        .enqueue_batch(&["alpha".into(), "bravo".into()])
        .await;
    assert_eq!(accepted, 2);

    let finished = wait_for_launches(&mut rx, 2).await;
    assert_eq!(
        finished,
        vec![("alpha".to_string(), false), ("bravo".to_string(), true)]
    );
    assert_eq!(
        rig.registry.get("alpha").unwrap().status(),
        StatusColor::Error
    );
    assert_eq!(
        rig.registry.get("bravo").unwrap().status(),
        StatusColor::Running
    );
    assert!(rig.registry.is_account_valid(&rig.registry.get("bravo").unwrap()));
}
