//! Session records and the id-keyed registry.
//!
//! A `Session` is the server-side record for one live or recently-terminated
//! remote command. Ids are process-unique, monotonically assigned, and never
//! reused while the process lives; clients only ever see the id, never a
//! cluster-native execution handle.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcaster;
use crate::remote::{ContainerRef, ExecMode, TermSize, Termination};

/// Lifecycle of a session. Transitions only ever move forward:
/// `Created → Running → {Exited | Errored}`, and a terminal state is
/// entered at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Exited(i32),
    Errored(String),
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Exited(_) | LifecycleState::Errored(_))
    }
}

/// One exec session. Cloning is cheap; all mutable state is shared.
#[derive(Clone)]
pub struct Session {
    pub id: u64,
    pub container: ContainerRef,
    pub command: Vec<String>,
    pub mode: ExecMode,
    pub tty: bool,
    pub working_dir: Option<String>,
    pub input_tx: mpsc::Sender<Bytes>,
    pub resize_tx: mpsc::Sender<TermSize>,
    pub broadcaster: Broadcaster,
    /// Fires when the session is removed or the process shuts down. Drain
    /// and watcher tasks select on this to exit promptly.
    pub cancelled: CancellationToken,
    state: Arc<RwLock<LifecycleState>>,
    size: Arc<RwLock<TermSize>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("container", &self.container)
            .field("command", &self.command)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        container: ContainerRef,
        command: Vec<String>,
        mode: ExecMode,
        tty: bool,
        working_dir: Option<String>,
        size: TermSize,
        input_tx: mpsc::Sender<Bytes>,
        resize_tx: mpsc::Sender<TermSize>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            id,
            container,
            command,
            mode,
            tty,
            working_dir,
            input_tx,
            resize_tx,
            broadcaster,
            cancelled: CancellationToken::new(),
            state: Arc::new(RwLock::new(LifecycleState::Created)),
            size: Arc::new(RwLock::new(size)),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.read().clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.read().is_terminal()
    }

    pub fn mark_running(&self) {
        let mut state = self.state.write();
        if *state == LifecycleState::Created {
            *state = LifecycleState::Running;
        }
    }

    /// Record the terminal state. Returns `false` if the session is already
    /// terminal: when an exit and an error race, exactly one wins and the
    /// loser's signal is discarded.
    pub fn mark_terminal(&self, termination: Termination) -> bool {
        let mut state = self.state.write();
        if state.is_terminal() {
            return false;
        }
        *state = match termination {
            Termination::Exited(code) => LifecycleState::Exited(code),
            Termination::Failed(msg) => LifecycleState::Errored(msg),
        };
        true
    }

    pub fn size(&self) -> TermSize {
        *self.size.read()
    }

    pub fn set_size(&self, size: TermSize) {
        *self.size.write() = size;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("maximum number of sessions reached")]
    MaxSessionsReached,
}

struct RegistryInner {
    sessions: HashMap<u64, Session>,
    next_id: u64,
    /// Slots handed out by [`SessionRegistry::reserve`] and not yet filled
    /// or released. Counted against the admission limit.
    reserved: usize,
    max_sessions: usize,
}

/// An admitted-but-not-yet-registered session slot.
///
/// Reserving a slot decides admission and allocates the id before the
/// caller performs the (fallible, possibly slow) launch. Filling the slot
/// registers the session; dropping it unfilled releases the reservation,
/// so an abandoned launch frees its capacity.
pub struct SessionSlot {
    registry: SessionRegistry,
    id: u64,
    filled: bool,
}

impl std::fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSlot")
            .field("id", &self.id)
            .field("filled", &self.filled)
            .finish_non_exhaustive()
    }
}

impl SessionSlot {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Register the session built for the reserved id.
    pub fn fill(mut self, build: impl FnOnce(u64) -> Session) -> Session {
        let session = build(self.id);
        debug_assert_eq!(session.id, self.id);
        let mut inner = self.registry.inner.write();
        inner.reserved -= 1;
        inner.sessions.insert(self.id, session.clone());
        self.filled = true;
        session
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        if !self.filled {
            self.registry.inner.write().reserved -= 1;
        }
    }
}

/// Maps session id → record. Mutations are serialized under one write lock;
/// reads proceed concurrently.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl SessionRegistry {
    /// Default admission limit. Each session costs a remote connection plus
    /// a drain task and replay buffer.
    pub const DEFAULT_MAX_SESSIONS: usize = 128;

    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                next_id: 1,
                reserved: 0,
                max_sessions,
            })),
        }
    }

    /// Decide admission and allocate the next id, atomically under the
    /// write lock. Ids are collision-free under concurrent reservations and
    /// never reassigned within the process lifetime.
    pub fn reserve(&self) -> Result<SessionSlot, RegistryError> {
        let mut inner = self.inner.write();
        if inner.sessions.len() + inner.reserved >= inner.max_sessions {
            return Err(RegistryError::MaxSessionsReached);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.reserved += 1;
        Ok(SessionSlot {
            registry: self.clone(),
            id,
            filled: false,
        })
    }

    /// Reserve-and-fill in one step, for callers with nothing fallible
    /// between admission and registration.
    pub fn insert(
        &self,
        build: impl FnOnce(u64) -> Session,
    ) -> Result<Session, RegistryError> {
        Ok(self.reserve()?.fill(build))
    }

    pub fn get(&self, id: u64) -> Option<Session> {
        self.inner.read().sessions.get(&id).cloned()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.inner.read().sessions.contains_key(&id)
    }

    /// Remove a session. The cancellation token is fired and the
    /// broadcaster closed under the write lock, so an attach racing with
    /// the removal either completes before it (and is then closed out) or
    /// observes the session as gone.
    pub fn remove(&self, id: u64) -> Option<Session> {
        let mut inner = self.inner.write();
        let removed = inner.sessions.remove(&id);
        if let Some(ref session) = removed {
            session.cancelled.cancel();
            session.broadcaster.close();
        }
        removed
    }

    pub fn list(&self) -> Vec<Session> {
        self.inner.read().sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every session, cancelling each one. Used by the graceful
    /// shutdown phase. A single write lock prevents in-flight creates from
    /// escaping the sweep.
    pub fn drain(&self) -> Vec<Session> {
        let mut inner = self.inner.write();
        let drained: Vec<Session> = inner.sessions.drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.cancelled.cancel();
            session.broadcaster.close();
        }
        drained
    }
}
