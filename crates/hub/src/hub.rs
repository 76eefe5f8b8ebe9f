//! The hub actor.
//!
//! ```text
//!       register / unregister / broadcast / refresh / shutdown
//!  handles ─────────────────────────────────────────────▶ [bounded mpsc] ──▶ hub task
//!                                                                             │ owns
//!                                                                             ▼
//!                                                              HashMap<ConnectionId, Box<dyn Connection>>
//! ```
//!
//! State machine: `Running` → `ShuttingDown` → `Stopped`. Read loops watch the
//! state through [`HubHandle::subscribe_state`] and exit on `Stopped`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use warden_core::{Classify, ErrorClass};

use crate::connection::{Connection, ConnectionError, ConnectionId};
use crate::envelope::Envelope;
use crate::snapshot::{self, SnapshotSource};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Copy, Clone)]
pub struct HubConfig {
    /// Capacity of the event queue; submitters wait when it is full.
    pub queue_capacity: usize,
    /// Upper bound on a single write (and on a close).
    pub write_timeout: Duration,
    /// Upper bound on fetching a snapshot from the source. The loop is
    /// blocked for at most this long per registration or refresh.
    pub snapshot_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("hub is shutting down; registration rejected")]
    ShuttingDown,

    #[error("hub has stopped")]
    Stopped,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("message could not be encoded: {0}")]
    Encode(String),
}

impl Classify for HubError {
    fn class(&self) -> ErrorClass {
        match self {
            HubError::Encode(_) => ErrorClass::StoreUnavailable,
            _ => ErrorClass::ConnectionLost,
        }
    }
}

enum Command {
    Register {
        id: ConnectionId,
        conn: Box<dyn Connection>,
        ack: oneshot::Sender<RegisterOutcome>,
    },
    Unregister(ConnectionId),
    Broadcast(Arc<str>),
    /// Fetch the snapshot now and broadcast it.
    Refresh,
    LiveCount(oneshot::Sender<usize>),
    Shutdown,
}

enum RegisterOutcome {
    Registered,
    /// Handed back so the caller closes it.
    Rejected(Box<dyn Connection>),
    /// The initial snapshot could not be written; the hub already closed it.
    Failed(ConnectionError),
}

pub struct Hub;

impl Hub {
    /// Start the hub task.
    pub fn spawn(source: Arc<dyn SnapshotSource>, config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(HubState::Running);

        let actor = HubLoop {
            rx,
            conns: HashMap::new(),
            source,
            write_timeout: config.write_timeout,
            snapshot_timeout: config.snapshot_timeout,
            state: state_tx,
        };
        let join = tokio::spawn(actor.run());

        let handle = HubHandle {
            tx,
            state: state_rx,
            latch: Arc::new(AtomicBool::new(false)),
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (handle, join)
    }
}

struct HubLoop {
    rx: mpsc::Receiver<Command>,
    conns: HashMap<ConnectionId, Box<dyn Connection>>,
    source: Arc<dyn SnapshotSource>,
    write_timeout: Duration,
    snapshot_timeout: Duration,
    state: watch::Sender<HubState>,
}

impl HubLoop {
    async fn run(mut self) {
        info!("notification hub running");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Register { id, conn, ack } => {
                    let outcome = self.register(id, conn).await;
                    if let Err(RegisterOutcome::Registered) = ack.send(outcome) {
                        // Registrant went away before the ack; its read loop
                        // never started, so nobody else will unregister it.
                        self.unregister(id).await;
                    }
                }
                Command::Unregister(id) => self.unregister(id).await,
                Command::Broadcast(message) => self.broadcast(message).await,
                Command::Refresh => self.refresh().await,
                Command::LiveCount(reply) => {
                    let _ = reply.send(self.conns.len());
                }
                Command::Shutdown => break,
            }
        }

        self.shutdown().await;
    }

    async fn register(&mut self, id: ConnectionId, mut conn: Box<dyn Connection>) -> RegisterOutcome {
        if *self.state.borrow() != HubState::Running {
            return RegisterOutcome::Rejected(conn);
        }

        match snapshot::encode_user_list_within(self.source.as_ref(), self.snapshot_timeout).await {
            Ok(frame) => {
                if let Err(err) = write(conn.as_mut(), frame, self.write_timeout).await {
                    warn!(connection = %id, error = %err, "initial snapshot write failed");
                    close(conn.as_mut(), self.write_timeout).await;
                    return RegisterOutcome::Failed(err);
                }
            }
            Err(err) => {
                warn!(connection = %id, error = %err, "initial snapshot unavailable; registering without it");
            }
        }

        self.conns.insert(id, conn);
        info!(connection = %id, live = self.conns.len(), "connection registered");
        RegisterOutcome::Registered
    }

    async fn unregister(&mut self, id: ConnectionId) {
        if let Some(mut conn) = self.conns.remove(&id) {
            close(conn.as_mut(), self.write_timeout).await;
            info!(connection = %id, live = self.conns.len(), "connection unregistered");
        }
    }

    async fn refresh(&mut self) {
        match snapshot::encode_user_list_within(self.source.as_ref(), self.snapshot_timeout).await {
            Ok(frame) => self.broadcast(frame).await,
            Err(err) => warn!(error = %err, "snapshot refresh skipped"),
        }
    }

    async fn broadcast(&mut self, message: Arc<str>) {
        let timeout = self.write_timeout;
        let results = join_all(self.conns.iter_mut().map(|(id, conn)| {
            let message = Arc::clone(&message);
            async move { (*id, write(conn.as_mut(), message, timeout).await) }
        }))
        .await;

        let total = results.len();
        let failed: Vec<ConnectionId> = results
            .into_iter()
            .filter_map(|(id, result)| {
                result.err().map(|err| {
                    warn!(connection = %id, error = %err, "broadcast write failed; evicting");
                    id
                })
            })
            .collect();

        for id in &failed {
            if let Some(mut conn) = self.conns.remove(id) {
                close(conn.as_mut(), timeout).await;
            }
        }

        debug!(
            delivered = total - failed.len(),
            evicted = failed.len(),
            "broadcast processed"
        );
    }

    async fn shutdown(&mut self) {
        self.state.send_replace(HubState::ShuttingDown);
        self.rx.close();

        let live = self.conns.len();
        for (_, mut conn) in self.conns.drain() {
            close(conn.as_mut(), self.write_timeout).await;
        }

        // Whatever was queued behind the shutdown still gets an answer.
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Register { conn, ack, .. } => {
                    if let Err(RegisterOutcome::Rejected(mut conn)) = ack.send(RegisterOutcome::Rejected(conn)) {
                        close(conn.as_mut(), self.write_timeout).await;
                    }
                }
                Command::LiveCount(reply) => {
                    let _ = reply.send(0);
                }
                Command::Unregister(_) | Command::Broadcast(_) | Command::Refresh | Command::Shutdown => {}
            }
        }

        self.state.send_replace(HubState::Stopped);
        info!(closed = live, "notification hub stopped");
    }
}

async fn write(conn: &mut dyn Connection, message: Arc<str>, timeout: Duration) -> Result<(), ConnectionError> {
    match tokio::time::timeout(timeout, conn.send(message)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Timeout(timeout)),
    }
}

async fn close(conn: &mut dyn Connection, timeout: Duration) {
    if tokio::time::timeout(timeout, conn.close()).await.is_err() {
        warn!(timeout_ms = timeout.as_millis() as u64, "connection close timed out");
    }
}

/// Cloneable front door to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<HubState>,
    latch: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl core::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HubHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl HubHandle {
    pub fn state(&self) -> HubState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<HubState> {
        self.state.clone()
    }

    /// Hand a connection to the hub.
    ///
    /// On success the hub has already sent the initial snapshot and owns the
    /// connection. On rejection the connection is closed here.
    pub async fn register(&self, mut conn: Box<dyn Connection>) -> Result<ConnectionId, HubError> {
        if self.latch.load(Ordering::SeqCst) {
            conn.close().await;
            return Err(HubError::ShuttingDown);
        }

        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (ack, outcome) = oneshot::channel();

        if let Err(mpsc::error::SendError(cmd)) = self.tx.send(Command::Register { id, conn, ack }).await {
            if let Command::Register { mut conn, .. } = cmd {
                conn.close().await;
            }
            return Err(HubError::Stopped);
        }

        match outcome.await {
            Ok(RegisterOutcome::Registered) => Ok(id),
            Ok(RegisterOutcome::Rejected(mut conn)) => {
                conn.close().await;
                Err(HubError::ShuttingDown)
            }
            Ok(RegisterOutcome::Failed(err)) => Err(err.into()),
            Err(_) => Err(HubError::Stopped),
        }
    }

    /// Remove and close a connection. Unknown ids and a stopped hub are fine.
    pub async fn unregister(&self, id: ConnectionId) {
        if self.tx.send(Command::Unregister(id)).await.is_err() {
            debug!(connection = %id, "unregister after hub stopped");
        }
    }

    /// Queue a pre-encoded frame for every live connection.
    pub async fn broadcast(&self, message: Arc<str>) -> Result<(), HubError> {
        self.tx
            .send(Command::Broadcast(message))
            .await
            .map_err(|_| HubError::Stopped)
    }

    pub async fn broadcast_envelope<P: Serialize>(&self, envelope: &Envelope<P>) -> Result<(), HubError> {
        let frame = envelope.encode().map_err(|e| HubError::Encode(e.to_string()))?;
        self.broadcast(frame).await
    }

    /// Queue a `user_list` refresh.
    ///
    /// The hub fetches the snapshot when it reaches the request, so the frame
    /// reflects every event queued before it. A source failure is logged by
    /// the hub and costs subscribers this one update.
    pub async fn publish_snapshot(&self) -> Result<(), HubError> {
        if self.latch.load(Ordering::SeqCst) {
            return Err(HubError::ShuttingDown);
        }
        self.tx.send(Command::Refresh).await.map_err(|_| HubError::Stopped)
    }

    pub async fn live_count(&self) -> Result<usize, HubError> {
        let (reply, count) = oneshot::channel();
        self.tx
            .send(Command::LiveCount(reply))
            .await
            .map_err(|_| HubError::Stopped)?;
        count.await.map_err(|_| HubError::Stopped)
    }

    /// Close every connection and stop the hub.
    ///
    /// Only the first call sends the stop request, but every call returns
    /// once the hub reports `Stopped` (or the hub task is gone).
    pub async fn shutdown(&self) {
        if !self.latch.swap(true, Ordering::SeqCst) {
            info!("notification hub shutting down");
            if self.tx.send(Command::Shutdown).await.is_err() {
                debug!("shutdown after hub stopped");
            }
        }

        let mut state = self.state.clone();
        while *state.borrow_and_update() != HubState::Stopped {
            if state.changed().await.is_err() {
                break;
            }
        }
    }
}
