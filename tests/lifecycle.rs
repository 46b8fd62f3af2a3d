//! End-to-end session lifecycle tests against the local process provider.
//!
//! These run real child processes: create, stream output to viewers, feed
//! input, observe termination and grace-window removal.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use podexec::activity::ActivityMonitor;
use podexec::events::{ChannelNotifier, ExecEvent, NullNotifier};
use podexec::local::LocalExecutor;
use podexec::manager::{CreateExec, ExecManager, ManagerConfig};
use podexec::remote::ExecMode;
use podexec::session::LifecycleState;

fn manager_with_grace(grace: Duration) -> ExecManager {
    let local = Arc::new(LocalExecutor::new());
    ExecManager::new(
        local.clone(),
        local,
        Arc::new(NullNotifier),
        ActivityMonitor::new(),
        ManagerConfig {
            grace_window: grace,
            ..ManagerConfig::default()
        },
    )
}

fn process_request(command: &[&str]) -> CreateExec {
    CreateExec {
        command: command.iter().map(|s| s.to_string()).collect(),
        mode: Some(ExecMode::Process),
        tty: Some(false),
        ..CreateExec::default()
    }
}

async fn wait_terminal(manager: &ExecManager, id: u64) -> LifecycleState {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        match manager.get(id) {
            Some(s) if s.is_terminal() => return s.state(),
            Some(_) => {}
            None => panic!("session {id} removed before it was observed terminal"),
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "session {id} never reached a terminal state"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn collect_output(mut rx: tokio::sync::mpsc::Receiver<Bytes>) -> Vec<u8> {
    let mut out = Vec::new();
    while let Ok(Some(chunk)) =
        tokio::time::timeout(Duration::from_secs(5), rx.recv()).await
    {
        out.extend_from_slice(&chunk);
    }
    out
}

#[tokio::test]
async fn echo_exits_zero_and_viewer_sees_output() {
    let manager = manager_with_grace(Duration::from_secs(30));
    let id = manager
        .create(process_request(&["echo", "hi"]))
        .await
        .unwrap();

    assert_eq!(wait_terminal(&manager, id).await, LifecycleState::Exited(0));

    // Attach after termination: the buffered tail is still served.
    let (_handle, rx) = manager.attach(id).unwrap();
    let output = collect_output(rx).await;
    assert_eq!(String::from_utf8_lossy(&output), "hi\n");
}

#[tokio::test]
async fn nonzero_exit_code_is_recorded() {
    let manager = manager_with_grace(Duration::from_secs(30));
    let id = manager
        .create(process_request(&["sh", "-c", "exit 3"]))
        .await
        .unwrap();
    assert_eq!(wait_terminal(&manager, id).await, LifecycleState::Exited(3));
}

#[tokio::test]
async fn input_reaches_the_child() {
    let manager = manager_with_grace(Duration::from_secs(30));
    let id = manager
        .create(process_request(&["sh", "-c", "read line; echo got:$line"]))
        .await
        .unwrap();

    let (_handle, rx) = manager.attach(id).unwrap();
    manager
        .input(id, Bytes::from_static(b"hello\n"))
        .await
        .unwrap();

    assert_eq!(wait_terminal(&manager, id).await, LifecycleState::Exited(0));
    let output = collect_output(rx).await;
    assert_eq!(String::from_utf8_lossy(&output), "got:hello\n");
}

#[tokio::test]
async fn session_is_removed_after_grace_window() {
    let manager = manager_with_grace(Duration::from_millis(100));
    let id = manager.create(process_request(&["true"])).await.unwrap();

    wait_terminal(&manager, id).await;
    assert!(manager.check(id), "retained during the grace window");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.check(id) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "session should be removed after the grace window"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(manager.get(id).is_none());
    assert!(manager.attach(id).is_err());
}

#[tokio::test]
async fn ids_are_never_reused_across_removal() {
    let manager = manager_with_grace(Duration::from_millis(50));
    let first = manager.create(process_request(&["true"])).await.unwrap();

    wait_terminal(&manager, first).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.check(first) {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let second = manager.create(process_request(&["true"])).await.unwrap();
    assert!(second > first, "ids must stay monotonic across removals");
}

#[tokio::test]
async fn empty_container_name_falls_back_to_local() {
    let manager = manager_with_grace(Duration::from_secs(30));
    let id = manager
        .create(process_request(&["echo", "fallback"]))
        .await
        .unwrap();
    let session = manager.get(id).unwrap();
    assert_eq!(session.container.container_name, "local");
}

#[tokio::test]
async fn termination_event_is_published() {
    let notifier = ChannelNotifier::new();
    let mut events = notifier.subscribe();
    let local = Arc::new(LocalExecutor::new());
    let manager = ExecManager::new(
        local.clone(),
        local,
        Arc::new(notifier),
        ActivityMonitor::new(),
        ManagerConfig::default(),
    );

    let id = manager.create(process_request(&["true"])).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("event within deadline")
        .unwrap();
    assert_eq!(event, ExecEvent::Exited { id });
}

#[tokio::test]
async fn two_viewers_see_the_same_stream() {
    let manager = manager_with_grace(Duration::from_secs(30));
    let id = manager
        .create(process_request(&["echo", "shared"]))
        .await
        .unwrap();

    let (_h1, rx1) = manager.attach(id).unwrap();
    let (_h2, rx2) = manager.attach(id).unwrap();

    wait_terminal(&manager, id).await;
    let a = collect_output(rx1).await;
    let b = collect_output(rx2).await;
    assert_eq!(String::from_utf8_lossy(&a), "shared\n");
    assert_eq!(a, b);
}

#[tokio::test]
async fn spawn_failure_surfaces_as_launch_error() {
    let manager = manager_with_grace(Duration::from_secs(5));
    let err = manager
        .create(process_request(&["/nonexistent/definitely-not-a-binary"]))
        .await
        .unwrap_err();
    assert!(matches!(err, podexec::manager::ManagerError::Launch(_)));
    assert!(manager.list().is_empty());
}

#[tokio::test]
async fn shutdown_cancels_running_sessions() {
    let manager = manager_with_grace(Duration::from_secs(30));
    let id = manager
        .create(process_request(&["sleep", "60"]))
        .await
        .unwrap();
    assert!(manager.check(id));

    manager.shutdown();
    assert!(!manager.check(id));
    assert!(manager.input(id, Bytes::from_static(b"x")).await.is_err());
}
