use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::AppState;
use crate::manager::CreateExec;
use crate::remote::{Credential, ExecMode, TermSize};
use crate::session::{LifecycleState, Session};

/// The Bearer token doubles as the credential handed to the cluster-facing
/// provider. Absent header means an anonymous credential.
fn credential_from(headers: &HeaderMap) -> Credential {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(Credential::new)
        .unwrap_or_default()
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct CreateExecRequest {
    container: String,
    command: Vec<String>,
    mode: Option<ExecMode>,
    tty: Option<bool>,
    working_dir: Option<String>,
    cols: Option<u16>,
    rows: Option<u16>,
}

#[derive(Debug, Serialize)]
pub(super) struct CreatedResponse {
    id: u64,
}

#[derive(Debug, Serialize)]
pub(super) struct ExecInfo {
    id: u64,
    pod: String,
    container: String,
    command: Vec<String>,
    mode: ExecMode,
    tty: bool,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ExecInfo {
    fn from_session(session: &Session) -> Self {
        let (state, exit_code, error) = match session.state() {
            LifecycleState::Created => ("created", None, None),
            LifecycleState::Running => ("running", None, None),
            LifecycleState::Exited(code) => ("exited", Some(code), None),
            LifecycleState::Errored(message) => ("errored", None, Some(message)),
        };
        Self {
            id: session.id,
            pod: session.container.pod_name.clone(),
            container: session.container.container_name.clone(),
            command: session.command.clone(),
            mode: session.mode,
            tty: session.tty,
            state,
            exit_code,
            error,
        }
    }
}

pub(super) async fn create_exec(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateExecRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let term_size = match (req.cols, req.rows) {
        (None, None) => None,
        (Some(0), _) | (_, Some(0)) => {
            return Err(ApiError::InvalidRequest(
                "cols and rows must be greater than 0".into(),
            ))
        }
        (cols, rows) => Some(TermSize {
            cols: cols.unwrap_or(80),
            rows: rows.unwrap_or(24),
        }),
    };
    let id = state
        .manager
        .create(CreateExec {
            container: req.container,
            command: req.command,
            mode: req.mode,
            tty: req.tty,
            working_dir: req.working_dir,
            term_size,
            credential: credential_from(&headers),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

pub(super) async fn get_exec(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ExecInfo>, ApiError> {
    let session = state.manager.get(id).ok_or(ApiError::ExecNotFound(id))?;
    Ok(Json(ExecInfo::from_session(&session)))
}

#[derive(Debug, Deserialize)]
pub(super) struct ResizeRequest {
    cols: u16,
    rows: u16,
}

pub(super) async fn resize_exec(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<ResizeRequest>,
) -> Result<StatusCode, ApiError> {
    if req.cols == 0 || req.rows == 0 {
        return Err(ApiError::InvalidRequest(
            "cols and rows must be greater than 0".into(),
        ));
    }
    state.manager.resize(id, req.cols, req.rows).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn list_containers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<crate::remote::ContainerRef>>, ApiError> {
    let containers = state
        .manager
        .list_containers(&credential_from(&headers))
        .await?;
    Ok(Json(containers))
}

pub(super) async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// WebSocket attach: binary frames carry raw output to the viewer and raw
/// input back. The existence check runs before the upgrade so stale ids get
/// a proper 404 instead of a dropped socket.
pub(super) async fn attach(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    if !state.manager.check(id) {
        return Err(ApiError::ExecNotFound(id));
    }
    Ok(ws.on_upgrade(move |socket| handle_attach(state, id, socket)))
}

async fn handle_attach(state: AppState, id: u64, socket: WebSocket) {
    let (handle, mut output) = match state.manager.attach(id) {
        Ok(v) => v,
        // Removed between the check and the upgrade.
        Err(_) => {
            let mut socket = socket;
            let _ = socket.close().await;
            return;
        }
    };
    tracing::debug!(id, "viewer attached");

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            chunk = output.recv() => {
                match chunk {
                    Some(chunk) => {
                        if sender.send(Message::Binary(chunk)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Session closed or this viewer was evicted.
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        state.activity.tick();
                        if state.manager.input(id, data).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        state.activity.tick();
                        if state.manager.input(id, Bytes::from(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(id, %err, "viewer socket error");
                        break;
                    }
                }
            }
        }
    }

    handle.detach();
    tracing::debug!(id, "viewer detached");
}
