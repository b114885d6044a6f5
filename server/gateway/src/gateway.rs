//! The Homebrew/MMDVM UDP wire protocol server (spec §4.F). Owns one
//! shared `UdpSocket`; every repeater's connection state lives in a
//! `ConnectionTable` keyed by id rather than one task per peer, since
//! the transport has no per-connection socket to hang a task off.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dmr_ids::RepeaterId;
use dmr_proto::command::{self, Command};
use dmr_proto::{config_blob, packet};
use dmr_router::{RegistrationTable, RoutingHub, ServerRole, SubscriptionManager};
use dmr_store::{Repeater, Store};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth;
use crate::config::Config;
use crate::metrics_adapter::gateway_metrics;
use crate::state::{ConnectionState, ConnectionTable};

pub struct Gateway {
    socket: UdpSocket,
    conns: ConnectionTable,
    store: Arc<dyn Store>,
    hub: Arc<RoutingHub>,
    subscriptions: Arc<SubscriptionManager>,
    registrations: Arc<RegistrationTable>,
    dialect_name: String,
    ping_timeout: Duration,
    keepalive_debounce: Duration,
    channel_capacity: usize,
    metrics: dmr_metrics::GatewayMetrics,
    shutdown: CancellationToken,
}

impl Gateway {
    pub async fn bind(
        config: &Config,
        store: Arc<dyn Store>,
        hub: Arc<RoutingHub>,
        subscriptions: Arc<SubscriptionManager>,
        registrations: Arc<RegistrationTable>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let addr = format!("{}:{}", config.bind, config.port);
        let socket = UdpSocket::bind(&addr).await?;
        info!(addr, "dmr gateway bound");
        Ok(Self {
            socket,
            conns: ConnectionTable::new(),
            store,
            hub,
            subscriptions,
            registrations,
            dialect_name: config.dialect_name.clone(),
            ping_timeout: config.ping_timeout(),
            keepalive_debounce: config.keepalive_debounce(),
            channel_capacity: config.channel_capacity,
            metrics: gateway_metrics(),
            shutdown,
        })
    }

    /// Runs the recv loop, the egress task delivering routed packets
    /// back out over UDP, and the keepalive sweep, until `shutdown` is
    /// cancelled.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let egress_rx = self.registrations.register(
            self.dialect_name.clone(),
            ServerRole::Repeater,
            false,
            self.channel_capacity,
        );

        let egress = tokio::spawn(Arc::clone(&self).run_egress(egress_rx));
        let sweep = tokio::spawn(Arc::clone(&self).run_keepalive_sweep());

        let mut buf = vec![0u8; packet::MAX_LEN.max(config_blob::BLOB_LEN + 16)];
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((n, addr)) => self.handle_datagram(&buf[..n], addr).await,
                        Err(err) => warn!(?err, "udp recv error"),
                    }
                }
            }
        }

        self.registrations.unregister(&self.dialect_name);
        let _ = egress.await;
        let _ = sweep.await;
        Ok(())
    }

    async fn run_egress(
        self: Arc<Self>,
        mut rx: tokio::sync::mpsc::Receiver<(RepeaterId, dmr_proto::Packet)>,
    ) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                maybe = rx.recv() => {
                    let Some((id, pkt)) = maybe else { break };
                    let Some(addr) = self.conns.addr_of(id) else {
                        debug!(repeater = id.get(), "egress packet for unconnected repeater dropped");
                        continue;
                    };
                    let bytes = packet::encode(&pkt);
                    if let Err(err) = self.socket.send_to(&bytes, addr).await {
                        warn!(?err, repeater = id.get(), "udp send error");
                    }
                }
            }
        }
    }

    async fn run_keepalive_sweep(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let expired = self.conns.expired(self.ping_timeout);
                    if expired.is_empty() {
                        continue;
                    }
                    for id in &expired {
                        self.subscriptions.deactivate(*id);
                        self.conns.remove(*id);
                        self.metrics.repeater_disconnected();
                    }
                    self.metrics.keepalive_sweep_expired(expired.len());
                    debug!(count = expired.len(), "keepalive sweep expired repeaters");
                }
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        match command::parse(data) {
            Ok(Command::Login { id }) => self.handle_login(id, addr).await,
            Ok(Command::Challenge { id, hash }) => self.handle_challenge(id, hash, addr).await,
            Ok(Command::Config { id, blob }) => self.handle_config(id, blob, addr).await,
            Ok(Command::Close { id }) => self.handle_close(id).await,
            Ok(Command::Ping { id }) => self.handle_ping(id, addr).await,
            Ok(Command::Options { id, options }) => {
                self.metrics.command_rx("options");
                debug!(repeater = id, options, "options string received");
                self.conns.touch(RepeaterId::new(id));
            }
            Ok(Command::Data(bytes)) => self.handle_dmrd(&bytes, addr).await,
            Err(err) => {
                self.metrics.command_rejected("unparsable");
                debug!(?err, len = data.len(), "unrecognised or malformed datagram discarded");
            }
        }
    }

    async fn handle_login(&self, id: u32, addr: SocketAddr) {
        self.metrics.command_rx("login");
        let repeater_id = RepeaterId::new(id);
        let salt = auth::random_salt();
        self.conns
            .set(repeater_id, addr, ConnectionState::ChallengeSent { salt });
        let _ = self.socket.send_to(&command::encode_rptack(&salt), addr).await;
    }

    async fn handle_challenge(&self, id: u32, hash: [u8; 32], addr: SocketAddr) {
        self.metrics.command_rx("challenge");
        let repeater_id = RepeaterId::new(id);

        let Some(conn) = self.conns.get(repeater_id) else {
            self.nak(id, addr).await;
            return;
        };
        let ConnectionState::ChallengeSent { salt } = conn.state else {
            self.nak(id, addr).await;
            return;
        };

        let repeater = match self.store.get_repeater(repeater_id).await {
            Ok(Some(r)) => r,
            _ => {
                self.metrics.auth_failed();
                self.nak(id, addr).await;
                return;
            }
        };

        if !auth::verify(&salt, &repeater.password, &hash) {
            self.metrics.auth_failed();
            self.conns.remove(repeater_id);
            self.nak(id, addr).await;
            return;
        }

        self.metrics.auth_success();
        self.conns.set(repeater_id, addr, ConnectionState::WaitingConfig);
        let _ = self.socket.send_to(&command::encode_rptack(&[]), addr).await;
    }

    async fn handle_config(&self, id: u32, blob: Vec<u8>, addr: SocketAddr) {
        self.metrics.command_rx("config");
        let repeater_id = RepeaterId::new(id);

        let Some(conn) = self.conns.get(repeater_id) else {
            self.nak(id, addr).await;
            return;
        };
        if !matches!(conn.state, ConnectionState::WaitingConfig | ConnectionState::Connected) {
            self.nak(id, addr).await;
            return;
        }

        let parsed = match config_blob::decode(&blob) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(?err, repeater = id, "malformed config blob rejected");
                self.metrics.command_rejected("config");
                self.nak(id, addr).await;
                return;
            }
        };

        let mut repeater = self
            .store
            .get_repeater(repeater_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| default_repeater(repeater_id, &self.dialect_name));

        apply_config_blob(&mut repeater, parsed);

        if self.store.upsert_repeater(&repeater).await.is_err() {
            self.nak(id, addr).await;
            return;
        }
        let _ = self.store.touch_last_connected(repeater_id).await;

        if matches!(conn.state, ConnectionState::WaitingConfig) {
            if let Some(elapsed) = self.conns.login_elapsed(repeater_id) {
                self.metrics.login_seconds(elapsed.as_secs_f64());
            }
        }
        self.conns.set(repeater_id, addr, ConnectionState::Connected);
        self.metrics.repeater_connected();
        self.subscriptions.activate(repeater_id, &self.dialect_name).await;

        let _ = self.socket.send_to(&command::encode_rptack(&[]), addr).await;
    }

    async fn handle_close(&self, id: u32) {
        self.metrics.command_rx("close");
        let repeater_id = RepeaterId::new(id);
        self.subscriptions.deactivate(repeater_id);
        self.conns.remove(repeater_id);
        self.metrics.repeater_disconnected();
    }

    async fn handle_ping(&self, id: u32, addr: SocketAddr) {
        self.metrics.command_rx("ping");
        let repeater_id = RepeaterId::new(id);
        match self.conns.get(repeater_id) {
            Some(conn) if matches!(conn.state, ConnectionState::Connected) => {
                if self
                    .conns
                    .touch_and_check_db_debounce(repeater_id, self.keepalive_debounce)
                {
                    let _ = self.store.touch_last_connected(repeater_id).await;
                }
                let _ = self
                    .socket
                    .send_to(&command::encode_mstpong(id), addr)
                    .await;
            }
            _ => self.nak(id, addr).await,
        }
    }

    async fn handle_dmrd(&self, bytes: &[u8], addr: SocketAddr) {
        let Some(repeater_id) = self.conns.id_for_addr(addr) else {
            self.metrics.command_rejected("dmrd-unauthenticated");
            return;
        };
        match self.conns.get(repeater_id) {
            Some(conn) if matches!(conn.state, ConnectionState::Connected) => {}
            _ => {
                self.metrics.command_rejected("dmrd-not-connected");
                return;
            }
        }

        let mut decoded = match packet::decode(bytes) {
            Ok(p) => p,
            Err(err) => {
                debug!(?err, "malformed dmrd burst dropped");
                self.metrics.command_rejected("dmrd-malformed");
                return;
            }
        };

        // Stamp the authenticated id over whatever the caller sent, per
        // spec §4.F: the repeater field is never trusted from the wire.
        decoded.repeater = repeater_id.get();
        self.conns.touch(repeater_id);
        self.hub.route_packet(decoded, &self.dialect_name).await;
    }

    async fn nak(&self, id: u32, addr: SocketAddr) {
        let _ = self.socket.send_to(&command::encode_mstnak(id), addr).await;
    }
}

fn default_repeater(id: RepeaterId, dialect: &str) -> Repeater {
    Repeater {
        id,
        owner_id: dmr_ids::UserId::new(0),
        dialect: dialect.to_string(),
        password: String::new(),
        simplex: false,
        ts1_static: Vec::new(),
        ts2_static: Vec::new(),
        ts1_dynamic: None,
        ts2_dynamic: None,
        callsign: String::new(),
        rx_freq_hz: String::new(),
        tx_freq_hz: String::new(),
        colour_code: 1,
        latitude: 0.0,
        longitude: 0.0,
        height: 0,
        location: String::new(),
        description: String::new(),
        last_connected_at: None,
    }
}

fn apply_config_blob(repeater: &mut Repeater, blob: config_blob::RepeaterConfigBlob) {
    repeater.callsign = blob.callsign;
    repeater.rx_freq_hz = blob.rx_freq_hz;
    repeater.tx_freq_hz = blob.tx_freq_hz;
    repeater.colour_code = blob.colour_code;
    repeater.latitude = blob.latitude;
    repeater.longitude = blob.longitude;
    repeater.height = blob.height;
    repeater.location = blob.location;
    repeater.description = blob.description;
}
