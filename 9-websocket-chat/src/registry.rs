//! Tracking of admitted websocket connections and fan-out of chat lines.
//!
//! Each [`Connection`] owns the sending half of an unbounded queue; the
//! receiving half belongs to the connection's writer task, which is the only
//! code that touches the socket. Delivering a message therefore never awaits
//! the network, and the registry lock is only held long enough to mutate the
//! member list or copy it.

use std::sync::{
    Arc,
    atomic::{AtomicU8, AtomicU64, Ordering},
};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::{
    error::SendError,
    message::{self, ClientId},
};

pub type ConnectionId = u64;

/// Lifecycle of a connection handle. `Unregistered` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Registered,
    Unregistered,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Pending,
            1 => ConnectionState::Registered,
            _ => ConnectionState::Unregistered,
        }
    }
}

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    client_id: ClientId,
    outbound: mpsc::UnboundedSender<String>,
    state: AtomicU8,
}

impl Connection {
    fn new(id: ConnectionId, client_id: ClientId) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (outbound, inbox) = mpsc::unbounded_channel();
        let connection = Self {
            id,
            client_id,
            outbound,
            state: AtomicU8::new(ConnectionState::Pending as u8),
        };
        (Arc::new(connection), inbox)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Queues a text frame for the writer task.
    ///
    /// Fails once the handle is unregistered or the writer has gone away.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        if self.state() == ConnectionState::Unregistered {
            return Err(SendError::Unregistered(self.id));
        }
        self.outbound
            .send(text.into())
            .map_err(|_| SendError::Closed(self.id))
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn mark_unregistered(&self) {
        self.state
            .store(ConnectionState::Unregistered as u8, Ordering::Release);
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members whose queue accepted the line.
    pub delivered: usize,
    /// Members whose writer was gone; they were unregistered by this broadcast.
    pub dropped: usize,
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    members: Mutex<Vec<Arc<Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates a pending handle for an admitted client. The returned receiver
    /// feeds the connection's writer task.
    pub fn open(&self, client_id: ClientId) -> (Arc<Connection>, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Connection::new(id, client_id)
    }

    /// Adds a pending connection. Returns `false` if the handle was already
    /// registered or has been unregistered before.
    pub async fn register(&self, connection: Arc<Connection>) -> bool {
        let mut members = self.members.lock().await;
        if !connection.transition(ConnectionState::Pending, ConnectionState::Registered) {
            debug!(
                conn_id = connection.id(),
                state = ?connection.state(),
                "ignoring registration of non-pending connection"
            );
            return false;
        }
        members.push(connection);
        true
    }

    /// Removes a member. Unknown ids are a no-op since disconnect cleanup can
    /// race with a broadcast that already dropped the member.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut members = self.members.lock().await;
        let Some(position) = members.iter().position(|member| member.id() == id) else {
            return false;
        };
        let connection = members.remove(position);
        connection.mark_unregistered();
        true
    }

    /// Relays `payload` from `sender` to every member, the sender included.
    pub async fn broadcast(&self, payload: &str, sender: ClientId) -> BroadcastReport {
        self.broadcast_text(&message::wrote(sender, payload)).await
    }

    pub async fn announce_departure(&self, client_id: ClientId) -> BroadcastReport {
        self.broadcast_text(&message::left(client_id)).await
    }

    /// Delivers `text` to a snapshot of the current members. A member whose
    /// writer is gone is skipped and then unregistered.
    pub async fn broadcast_text(&self, text: &str) -> BroadcastReport {
        let snapshot: Vec<Arc<Connection>> = self.members.lock().await.clone();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for member in &snapshot {
            match member.send_text(text) {
                Ok(()) => report.delivered += 1,
                // Unregistered after the snapshot was taken.
                Err(SendError::Unregistered(_)) => {}
                Err(err @ SendError::Closed(_)) => {
                    warn!(
                        conn_id = member.id(),
                        client_id = member.client_id(),
                        error = %err,
                        "failed to deliver chat line"
                    );
                    failed.push(member.id());
                }
            }
        }

        for id in failed {
            if self.unregister(id).await {
                report.dropped += 1;
            }
        }

        debug!(
            recipients = snapshot.len(),
            delivered = report.delivered,
            dropped = report.dropped,
            "broadcast chat line"
        );
        report
    }

    /// Unregisters every member. Used when the server shuts down.
    pub async fn drain(&self) -> usize {
        let drained = std::mem::take(&mut *self.members.lock().await);
        for connection in &drained {
            connection.mark_unregistered();
        }
        drained.len()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.members
            .lock()
            .await
            .iter()
            .any(|member| member.id() == id)
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ids of the current members in registration order.
    pub async fn member_ids(&self) -> Vec<ConnectionId> {
        self.members
            .lock()
            .await
            .iter()
            .map(|member| member.id())
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
