//! The registration table: protocol servers (one per wire dialect)
//! register a name, a role, and whether they want the broadcast
//! topic, and receive a bounded channel of `(RepeaterId, Packet)` the
//! subscription manager delivers into. Per spec §4.H, a server's name
//! equals the repeater's `dialect` string, so a packet addressed to a
//! given repeater id is handed to the right dialect implementation.

use dashmap::DashMap;
use dmr_ids::RepeaterId;
use dmr_proto::Packet;
use tokio::sync::mpsc;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServerRole {
    Repeater,
    Peer,
}

struct Registered {
    role: ServerRole,
    broadcast: bool,
    tx: mpsc::Sender<(RepeaterId, Packet)>,
}

#[derive(Default)]
pub struct RegistrationTable {
    servers: DashMap<String, Registered>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dialect server with the given delivery channel
    /// capacity (§5/§6 `serverChannelCapacity`), returning the receive
    /// side of its delivery channel. Re-registering the same name
    /// replaces it.
    pub fn register(
        &self,
        name: impl Into<String>,
        role: ServerRole,
        broadcast: bool,
        capacity: usize,
    ) -> mpsc::Receiver<(RepeaterId, Packet)> {
        let (tx, rx) = mpsc::channel(capacity);
        self.servers
            .insert(name.into(), Registered { role, broadcast, tx });
        rx
    }

    pub fn unregister(&self, name: &str) {
        self.servers.remove(name);
    }

    pub fn role_of(&self, name: &str) -> Option<ServerRole> {
        self.servers.get(name).map(|s| s.role)
    }

    pub fn peer_server_names(&self, exclude: &str) -> Vec<String> {
        self.servers
            .iter()
            .filter(|entry| entry.value().role == ServerRole::Peer && entry.key() != exclude)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn broadcast_server_names(&self, exclude: &str) -> Vec<String> {
        self.servers
            .iter()
            .filter(|entry| entry.value().broadcast && entry.key() != exclude)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// `deliverToServer` from spec §4.H: best-effort, bounded. A full
    /// channel is a drop, not a block, so one stuck dialect server
    /// cannot wedge the subscription manager's goroutines.
    pub async fn deliver_to_server(&self, name: &str, repeater: RepeaterId, packet: Packet) {
        let Some(server) = self.servers.get(name) else {
            tracing::debug!(name, "delivery to unregistered server dropped");
            return;
        };
        if server.tx.try_send((repeater, packet)).is_err() {
            tracing::trace!(name, "server delivery channel full or closed, dropping");
        }
    }
}
