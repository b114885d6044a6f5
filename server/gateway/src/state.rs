//! Per-source-address connection state, per spec §4.F's state
//! machine. One entry per repeater id, guarded by a `DashMap` rather
//! than a task-per-connection: the transport is a single shared UDP
//! socket, not one stream per peer.

use std::net::SocketAddr;
use std::time::Instant;

use dashmap::DashMap;
use dmr_ids::RepeaterId;

#[derive(Clone, Debug)]
pub enum ConnectionState {
    Initial,
    ChallengeSent { salt: [u8; 4] },
    WaitingConfig,
    Connected,
}

#[derive(Clone, Debug)]
pub struct Connection {
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub last_activity: Instant,
    last_db_touch: Option<Instant>,
    login_started_at: Option<Instant>,
}

/// All live per-repeater connections known to this dialect server.
#[derive(Default)]
pub struct ConnectionTable {
    conns: DashMap<u32, Connection>,
    by_addr: DashMap<SocketAddr, u32>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: RepeaterId) -> Option<Connection> {
        self.conns.get(&id.get()).map(|c| c.clone())
    }

    pub fn set(&self, id: RepeaterId, addr: SocketAddr, state: ConnectionState) {
        let fresh_login = matches!(state, ConnectionState::ChallengeSent { .. });
        let login_started_at = if fresh_login {
            Some(Instant::now())
        } else {
            self.conns.get(&id.get()).and_then(|c| c.login_started_at)
        };
        self.conns.insert(
            id.get(),
            Connection {
                addr,
                state,
                last_activity: Instant::now(),
                last_db_touch: None,
                login_started_at,
            },
        );
        self.by_addr.insert(addr, id.get());
    }

    /// Seconds since this repeater's most recent `RPTL` login attempt
    /// began, for `GatewayMetrics::login_seconds` on the handshake that
    /// reaches `Connected`.
    pub fn login_elapsed(&self, id: RepeaterId) -> Option<std::time::Duration> {
        self.conns
            .get(&id.get())
            .and_then(|c| c.login_started_at)
            .map(|started| started.elapsed())
    }

    pub fn touch(&self, id: RepeaterId) {
        if let Some(mut conn) = self.conns.get_mut(&id.get()) {
            conn.last_activity = Instant::now();
        }
    }

    /// Updates in-memory last-activity and reports whether a
    /// `last_connected_at` DB write is due for this repeater, per
    /// spec §5's keepalive-write debounce. At most one caller per
    /// tick observes `true` for a given debounce window, since the
    /// check-and-set happens under the map entry's lock.
    pub fn touch_and_check_db_debounce(&self, id: RepeaterId, debounce: std::time::Duration) -> bool {
        let Some(mut conn) = self.conns.get_mut(&id.get()) else {
            return false;
        };
        let now = Instant::now();
        conn.last_activity = now;
        let due = conn
            .last_db_touch
            .map(|t| now.duration_since(t) >= debounce)
            .unwrap_or(true);
        if due {
            conn.last_db_touch = Some(now);
        }
        due
    }

    pub fn remove(&self, id: RepeaterId) {
        if let Some((_, conn)) = self.conns.remove(&id.get()) {
            self.by_addr.remove(&conn.addr);
        }
    }

    pub fn addr_of(&self, id: RepeaterId) -> Option<SocketAddr> {
        self.conns.get(&id.get()).map(|c| c.addr)
    }

    /// The authenticated repeater id that last spoke from `addr`, if
    /// any. Used to stamp the `repeater` field on inbound DMRD bursts
    /// rather than trusting the caller-supplied value.
    pub fn id_for_addr(&self, addr: SocketAddr) -> Option<RepeaterId> {
        self.by_addr.get(&addr).map(|id| RepeaterId::new(*id))
    }

    /// Repeater ids whose last activity is older than `timeout`.
    pub fn expired(&self, timeout: std::time::Duration) -> Vec<RepeaterId> {
        let now = Instant::now();
        self.conns
            .iter()
            .filter(|entry| now.duration_since(entry.value().last_activity) >= timeout)
            .map(|entry| RepeaterId::new(*entry.key()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn db_debounce_fires_once_then_withholds_until_the_window_elapses() {
        let table = ConnectionTable::new();
        let id = RepeaterId::new(312_990);
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        table.set(id, addr, ConnectionState::Connected);

        assert!(table.touch_and_check_db_debounce(id, Duration::from_secs(30)));
        assert!(!table.touch_and_check_db_debounce(id, Duration::from_secs(30)));
        assert!(table.touch_and_check_db_debounce(id, Duration::from_millis(0)));
    }

    #[test]
    fn db_debounce_on_unknown_repeater_is_never_due() {
        let table = ConnectionTable::new();
        assert!(!table.touch_and_check_db_debounce(RepeaterId::new(1), Duration::from_secs(30)));
    }
}
