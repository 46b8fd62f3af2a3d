//! Integration tests for the HTTP/WebSocket control plane against a real
//! server bound to an ephemeral port, driven with reqwest and
//! tokio-tungstenite.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use podexec::activity::ActivityMonitor;
use podexec::api::{router, AppState, RouterConfig};
use podexec::events::NullNotifier;
use podexec::local::LocalExecutor;
use podexec::manager::{ExecManager, ManagerConfig};
use podexec::shutdown::ShutdownCoordinator;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

async fn spawn_server(config: RouterConfig) -> SocketAddr {
    let activity = ActivityMonitor::new();
    let local = Arc::new(LocalExecutor::new());
    let manager = ExecManager::new(
        local.clone(),
        local,
        Arc::new(NullNotifier),
        activity.clone(),
        ManagerConfig {
            grace_window: Duration::from_secs(30),
            ..ManagerConfig::default()
        },
    );
    let state = AppState {
        manager,
        activity,
        shutdown: ShutdownCoordinator::new(),
    };
    let app = router(state, config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn create_exec(
    client: &reqwest::Client,
    addr: SocketAddr,
    body: serde_json::Value,
) -> u64 {
    let response = client
        .post(format!("http://{addr}/exec"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    response.json::<serde_json::Value>().await.unwrap()["id"]
        .as_u64()
        .unwrap()
}

/// Poll GET /exec/{id} until the reported state matches.
async fn wait_state(
    client: &reqwest::Client,
    addr: SocketAddr,
    id: u64,
    state: &str,
) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let response = client
            .get(format!("http://{addr}/exec/{id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let json: serde_json::Value = response.json().await.unwrap();
        if json["state"] == state {
            return json;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "session never reached state {state}: {json}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn healthz_returns_ok() {
    let addr = spawn_server(RouterConfig::default()).await;
    let response = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn create_and_observe_exit() {
    let addr = spawn_server(RouterConfig::default()).await;
    let client = reqwest::Client::new();

    let id = create_exec(
        &client,
        addr,
        serde_json::json!({
            "command": ["echo", "hi"],
            "mode": "process",
            "tty": false,
        }),
    )
    .await;

    let json = wait_state(&client, addr, id, "exited").await;
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["mode"], "process");
}

#[tokio::test]
async fn unknown_exec_is_404_with_error_body() {
    let addr = spawn_server(RouterConfig::default()).await;
    let response = reqwest::get(format!("http://{addr}/exec/12345"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"]["code"], "exec_not_found");
}

#[tokio::test]
async fn containers_endpoint_lists_local() {
    let addr = spawn_server(RouterConfig::default()).await;
    let response = reqwest::get(format!("http://{addr}/containers"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json[0]["container_name"], "local");
}

#[tokio::test]
async fn websocket_attach_streams_output_and_accepts_input() {
    let addr = spawn_server(RouterConfig::default()).await;
    let client = reqwest::Client::new();

    let id = create_exec(
        &client,
        addr,
        serde_json::json!({
            "command": ["sh", "-c", "echo ready; read line; echo got:$line"],
            "mode": "process",
            "tty": false,
        }),
    )
    .await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/attach/{id}"))
        .await
        .unwrap();

    // Read until the prompt line arrives.
    let mut seen = String::new();
    while !seen.contains("ready") {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("output within deadline")
            .expect("stream open")
            .unwrap()
        {
            Message::Binary(data) => seen.push_str(&String::from_utf8_lossy(&data)),
            Message::Close(_) => panic!("closed before output"),
            _ => {}
        }
    }

    ws.send(Message::Binary(b"hello\n".to_vec().into()))
        .await
        .unwrap();

    let mut closed = false;
    while !seen.contains("got:hello") {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("echo within deadline")
        {
            Some(Ok(Message::Binary(data))) => {
                seen.push_str(&String::from_utf8_lossy(&data))
            }
            Some(Ok(Message::Close(_))) | None => {
                closed = true;
                break;
            }
            _ => {}
        }
    }
    assert!(
        seen.contains("got:hello"),
        "input should round-trip, saw {seen:?} (closed={closed})"
    );
}

#[tokio::test]
async fn late_attach_receives_replay() {
    let addr = spawn_server(RouterConfig::default()).await;
    let client = reqwest::Client::new();

    let id = create_exec(
        &client,
        addr,
        serde_json::json!({
            "command": ["echo", "banner"],
            "mode": "process",
            "tty": false,
        }),
    )
    .await;
    wait_state(&client, addr, id, "exited").await;

    // Attach after exit, inside the grace window.
    let (mut ws, _) = connect_async(format!("ws://{addr}/attach/{id}"))
        .await
        .unwrap();
    let mut seen = String::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("replay within deadline")
        {
            Some(Ok(Message::Binary(data))) => {
                seen.push_str(&String::from_utf8_lossy(&data))
            }
            Some(Ok(Message::Close(_))) | None => break,
            _ => {}
        }
    }
    assert_eq!(seen, "banner\n");
}

#[tokio::test]
async fn websocket_attach_unknown_id_is_rejected() {
    let addr = spawn_server(RouterConfig::default()).await;
    let err = connect_async(format!("ws://{addr}/attach/9999"))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 404);
        }
        other => panic!("expected HTTP 404 rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn resize_running_session_returns_204() {
    let addr = spawn_server(RouterConfig::default()).await;
    let client = reqwest::Client::new();

    // Interactive shell defaults to a TTY.
    let id = create_exec(&client, addr, serde_json::json!({})).await;

    let response = client
        .post(format!("http://{addr}/exec/{id}/resize"))
        .json(&serde_json::json!({ "cols": 132, "rows": 43 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn bearer_token_is_enforced() {
    let addr = spawn_server(RouterConfig {
        token: Some("it-token".into()),
        ..RouterConfig::default()
    })
    .await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/containers"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let response = client
        .get(format!("http://{addr}/containers"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    let response = client
        .get(format!("http://{addr}/containers"))
        .bearer_auth("it-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Health stays open for probes.
    let response = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}
