//! Types and collaborator contracts for remote command execution.
//!
//! The cluster-facing side of an exec session (client construction,
//! credential resolution, wire protocol) lives behind the
//! [`RemoteExecutor`] and [`ContainerResolver`] traits. The core only sees
//! the narrow channel bundle a provider hands back from `launch`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// Identifies the target container of an exec session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub pod_name: String,
    pub container_name: String,
}

/// Terminal dimensions, forwarded to the remote side on resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// How the command is run inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Interactive shell with a TTY and line editing. The default when the
    /// requested command is empty.
    #[default]
    Shell,
    /// Single non-interactive invocation.
    Process,
}

/// Everything a provider needs to launch one remote command.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub container: ContainerRef,
    pub command: Vec<String>,
    pub mode: ExecMode,
    pub tty: bool,
    pub working_dir: Option<String>,
    pub term_size: TermSize,
}

/// Opaque bearer credential used only to construct the remote-execution
/// client. Redacted from all debug output; never exposed to viewers.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw token, for handing to the cluster client. Deliberately not
    /// `Display` so it cannot end up in log output by accident.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("Credential(<none>)")
        } else {
            f.write_str("Credential(<redacted>)")
        }
    }
}

/// How a remote command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with a status code.
    Exited(i32),
    /// Execution-layer failure (broken pipe, container gone, ...).
    Failed(String),
}

/// The live handle to one spawned remote command.
///
/// `termination` is a one-shot signal consumed exactly once, by the
/// manager's exit watcher.
#[derive(Debug)]
pub struct ExecChannels {
    pub input: mpsc::Sender<Bytes>,
    pub output: mpsc::Receiver<Bytes>,
    pub resize: mpsc::Sender<TermSize>,
    pub termination: oneshot::Receiver<Termination>,
}

/// Channel capacity for the input and output halves of a binding.
pub const BINDING_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("container could not be resolved: {0}")]
    Resolution(String),
    #[error("remote command could not be started: {0}")]
    Launch(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("container listing unavailable: {0}")]
    Unavailable(String),
}

/// Launches commands inside containers.
///
/// `launch` is the only operation allowed to block for the duration of
/// remote connection negotiation.
#[async_trait::async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        credential: &Credential,
    ) -> Result<ExecChannels, LaunchError>;
}

impl std::fmt::Debug for dyn RemoteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RemoteExecutor")
    }
}

/// Enumerates and resolves candidate containers.
#[async_trait::async_trait]
pub trait ContainerResolver: Send + Sync {
    async fn list(&self, credential: &Credential) -> Result<Vec<ContainerRef>, ResolveError>;

    async fn resolve(
        &self,
        credential: &Credential,
        container_name: &str,
    ) -> Result<ContainerRef, ResolveError>;
}
