//! The exec session orchestrator.
//!
//! `ExecManager` is the public entry point tying the registry, the
//! execution provider, the broadcaster, and the event notifier together.
//! It owns the per-session drain task (binding output → replay buffer +
//! fan-out) and the exit watcher that publishes termination events and
//! removes the record after a grace window.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::activity::ActivityMonitor;
use crate::broadcast::{AttachHandle, Broadcaster};
use crate::events::EventNotifier;
use crate::remote::{
    ContainerRef, ContainerResolver, Credential, ExecMode, LaunchSpec, RemoteExecutor,
    TermSize, Termination,
};
use crate::ring::ReplayBuffer;
use crate::session::{RegistryError, Session, SessionRegistry};

/// A client's request to create an exec session.
#[derive(Debug, Clone, Default)]
pub struct CreateExec {
    /// Target container name. Empty means "first available", the Cloud
    /// Shell fallback.
    pub container: String,
    /// Requested argv. Empty defaults to an interactive shell.
    pub command: Vec<String>,
    pub mode: Option<ExecMode>,
    pub tty: Option<bool>,
    pub working_dir: Option<String>,
    pub term_size: Option<TermSize>,
    pub credential: Credential,
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("container resolution failed: {0}")]
    Resolution(String),
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("exec session not found: {0}")]
    NotFound(u64),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Session policy knobs, derived from [`crate::config::Settings`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub replay_capacity: usize,
    pub viewer_backlog: usize,
    pub grace_window: Duration,
    pub max_sessions: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            replay_capacity: crate::ring::DEFAULT_REPLAY_CAPACITY,
            viewer_backlog: crate::broadcast::DEFAULT_VIEWER_BACKLOG,
            grace_window: Duration::from_secs(5),
            max_sessions: SessionRegistry::DEFAULT_MAX_SESSIONS,
        }
    }
}

#[derive(Clone)]
pub struct ExecManager {
    registry: SessionRegistry,
    executor: Arc<dyn RemoteExecutor>,
    resolver: Arc<dyn ContainerResolver>,
    notifier: Arc<dyn EventNotifier>,
    activity: ActivityMonitor,
    config: Arc<ManagerConfig>,
}

impl ExecManager {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        resolver: Arc<dyn ContainerResolver>,
        notifier: Arc<dyn EventNotifier>,
        activity: ActivityMonitor,
        config: ManagerConfig,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(config.max_sessions),
            executor,
            resolver,
            notifier,
            activity,
            config: Arc::new(config),
        }
    }

    /// Create a new exec session and return its id.
    ///
    /// Admission is decided before the launch: a create rejected at the
    /// session limit never spawns a remote process, and a failed launch
    /// releases its reserved slot, so a failed create leaves no trace.
    pub async fn create(&self, request: CreateExec) -> Result<u64, ManagerError> {
        // An empty command means an interactive shell; shell mode implies
        // a TTY.
        let mode = if request.command.is_empty() {
            ExecMode::Shell
        } else {
            request.mode.unwrap_or(ExecMode::Process)
        };
        let tty = request.tty.unwrap_or(mode == ExecMode::Shell) || mode == ExecMode::Shell;

        let container = self
            .resolve_target(&request.credential, &request.container)
            .await?;

        let spec = LaunchSpec {
            container: container.clone(),
            command: request.command.clone(),
            mode,
            tty,
            working_dir: request.working_dir.clone(),
            term_size: request.term_size.unwrap_or_default(),
        };

        // Dropping the slot on a launch error releases the reservation.
        let slot = self.registry.reserve()?;

        let channels = self
            .executor
            .launch(&spec, &request.credential)
            .await
            .map_err(|e| match e {
                crate::remote::LaunchError::Resolution(msg) => ManagerError::Resolution(msg),
                crate::remote::LaunchError::Launch(msg) => ManagerError::Launch(msg),
            })?;

        let broadcaster = Broadcaster::new(
            ReplayBuffer::new(self.config.replay_capacity),
            self.config.viewer_backlog,
        );

        let session = slot.fill(|id| {
            Session::new(
                id,
                container.clone(),
                spec.command.clone(),
                mode,
                tty,
                spec.working_dir.clone(),
                spec.term_size,
                channels.input.clone(),
                channels.resize.clone(),
                broadcaster.clone(),
            )
        });
        session.mark_running();
        tracing::info!(
            id = session.id,
            pod = %container.pod_name,
            container = %container.container_name,
            ?mode,
            tty,
            "exec session created"
        );

        self.spawn_session_tasks(session.clone(), channels.output, channels.termination);
        Ok(session.id)
    }

    /// Existence probe. Lets clients detect stale ids.
    pub fn check(&self, id: u64) -> bool {
        self.registry.contains(id)
    }

    /// Forward a resize. Not an error on non-TTY sessions; `NotFound` for
    /// unknown or already-terminal sessions.
    pub async fn resize(&self, id: u64, cols: u16, rows: u16) -> Result<(), ManagerError> {
        let session = self.registry.get(id).ok_or(ManagerError::NotFound(id))?;
        if session.is_terminal() {
            return Err(ManagerError::NotFound(id));
        }
        if !session.tty {
            return Ok(());
        }
        let size = TermSize { cols, rows };
        session.set_size(size);
        if session.resize_tx.send(size).await.is_err() {
            // Binding already gone; the exit watcher will retire the record.
            return Err(ManagerError::NotFound(id));
        }
        Ok(())
    }

    /// Attach a viewer. Legal while running and after termination (to read
    /// the buffered tail), until the record is removed.
    pub fn attach(
        &self,
        id: u64,
    ) -> Result<(AttachHandle, mpsc::Receiver<Bytes>), ManagerError> {
        let session = self.registry.get(id).ok_or(ManagerError::NotFound(id))?;
        Ok(session.broadcaster.attach())
    }

    /// Forward viewer input to the remote process.
    pub async fn input(&self, id: u64, data: Bytes) -> Result<(), ManagerError> {
        let session = self.registry.get(id).ok_or(ManagerError::NotFound(id))?;
        if session.input_tx.send(data).await.is_err() {
            return Err(ManagerError::NotFound(id));
        }
        Ok(())
    }

    /// Session metadata for the control plane.
    pub fn get(&self, id: u64) -> Option<Session> {
        self.registry.get(id)
    }

    pub fn list(&self) -> Vec<Session> {
        self.registry.list()
    }

    /// Candidate containers, from the cluster collaborator.
    pub async fn list_containers(
        &self,
        credential: &Credential,
    ) -> Result<Vec<ContainerRef>, ManagerError> {
        self.resolver
            .list(credential)
            .await
            .map_err(|e| ManagerError::Resolution(e.to_string()))
    }

    /// Graceful-phase teardown: cancel every session and empty the
    /// registry.
    pub fn shutdown(&self) {
        let drained = self.registry.drain();
        if !drained.is_empty() {
            tracing::info!(sessions = drained.len(), "closed all exec sessions");
        }
    }

    async fn resolve_target(
        &self,
        credential: &Credential,
        container: &str,
    ) -> Result<ContainerRef, ManagerError> {
        if container.is_empty() {
            // No target given: fall back to the first available container.
            let containers = self
                .resolver
                .list(credential)
                .await
                .map_err(|e| ManagerError::Resolution(e.to_string()))?;
            return containers
                .into_iter()
                .next()
                .ok_or_else(|| ManagerError::Resolution("no containers found to exec".into()));
        }
        self.resolver
            .resolve(credential, container)
            .await
            .map_err(|e| ManagerError::Resolution(e.to_string()))
    }

    /// Start the drain task and the exit watcher for a freshly created
    /// session.
    fn spawn_session_tasks(
        &self,
        session: Session,
        mut output: mpsc::Receiver<Bytes>,
        termination: tokio::sync::oneshot::Receiver<Termination>,
    ) {
        let drain = {
            let session = session.clone();
            let activity = self.activity.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        chunk = output.recv() => {
                            match chunk {
                                Some(chunk) => {
                                    activity.tick();
                                    session.broadcaster.broadcast(chunk);
                                }
                                None => break,
                            }
                        }
                        _ = session.cancelled.cancelled() => break,
                    }
                }
            })
        };

        let registry = self.registry.clone();
        let notifier = Arc::clone(&self.notifier);
        let grace = self.config.grace_window;
        tokio::spawn(async move {
            let termination = tokio::select! {
                result = termination => result.unwrap_or_else(|_| {
                    Termination::Failed("execution binding lost".into())
                }),
                _ = session.cancelled.cancelled() => {
                    // Removed or shut down externally; nothing to publish.
                    return;
                }
            };

            // Let the drain task flush the output tail before the session
            // turns terminal: providers close the output channel before
            // (or when) they signal termination.
            let _ = drain.await;

            if !session.mark_terminal(termination.clone()) {
                return;
            }
            // Terminal sessions accept no further output; buffered bytes
            // stay readable until removal.
            session.broadcaster.close();

            match &termination {
                Termination::Exited(code) => {
                    tracing::info!(id = session.id, code, "exec session exited");
                    notifier.publish_exit(session.id);
                }
                Termination::Failed(message) => {
                    tracing::warn!(id = session.id, %message, "exec session errored");
                    notifier.publish_error(session.id, message);
                }
            }

            // Grace window: already-attached viewers (and late attaches)
            // can still read the buffered tail.
            tokio::select! {
                _ = tokio::time::sleep(grace) => {}
                _ = session.cancelled.cancelled() => return,
            }
            registry.remove(session.id);
            tracing::debug!(id = session.id, "exec session removed");
        });
    }
}
