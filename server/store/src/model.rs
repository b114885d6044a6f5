//! Persisted entities, per spec §3 Data Model.

use chrono::{DateTime, Utc};
use dmr_ids::{PeerId, RepeaterId, StreamId, TalkgroupId, UserId};
use serde::{Deserialize, Serialize};

/// Persisted repeater configuration. Runtime connection state (peer
/// address, state-machine state, salt, ping counters) is private to
/// the owning protocol server, per spec §3's ownership rules, and is
/// not part of this row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Repeater {
    pub id: RepeaterId,
    pub owner_id: UserId,
    pub dialect: String,
    pub password: String,
    pub simplex: bool,
    pub ts1_static: Vec<TalkgroupId>,
    pub ts2_static: Vec<TalkgroupId>,
    pub ts1_dynamic: Option<TalkgroupId>,
    pub ts2_dynamic: Option<TalkgroupId>,
    pub callsign: String,
    pub rx_freq_hz: String,
    pub tx_freq_hz: String,
    pub colour_code: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub height: u32,
    pub location: String,
    pub description: String,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl Repeater {
    /// `WantRX(dst, slot)` from spec §3: a pure function of persisted
    /// subscription state. Returns the slot to deliver on when the
    /// repeater wants to receive `dst`.
    pub fn want_rx(&self, dst: TalkgroupId, slot: bool) -> Option<bool> {
        if dst.get() == self.id.get() || dst.get() == self.owner_id.get() {
            return Some(slot);
        }
        if self.ts1_dynamic == Some(dst) {
            return Some(false);
        }
        if self.ts2_dynamic == Some(dst) {
            return Some(true);
        }
        if self.ts1_static.contains(&dst) {
            return Some(false);
        }
        if self.ts2_static.contains(&dst) {
            return Some(true);
        }
        None
    }

    /// All talkgroup ids this repeater is currently subscribed to,
    /// across both slots, for subscription-manager activation.
    pub fn subscribed_talkgroups(&self) -> Vec<TalkgroupId> {
        let mut out = self.ts1_static.clone();
        out.extend(self.ts2_static.iter().copied());
        out.extend(self.ts1_dynamic);
        out.extend(self.ts2_dynamic);
        out.sort_by_key(|tg| tg.get());
        out.dedup();
        out
    }

    /// Whether `tg` is still needed on the *other* slot after an
    /// unlink or unsubscribe on `slot`, per spec §4.H `unsubscribe`.
    pub fn still_needs(&self, tg: TalkgroupId, slot_just_cleared: bool) -> bool {
        let other_dynamic = if slot_just_cleared {
            self.ts1_dynamic
        } else {
            self.ts2_dynamic
        };
        other_dynamic == Some(tg) || self.ts1_static.contains(&tg) || self.ts2_static.contains(&tg)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Talkgroup {
    pub id: TalkgroupId,
    pub name: String,
    pub description: String,
    pub admins: Vec<UserId>,
    pub ncos: Vec<UserId>,
}

impl Talkgroup {
    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }

    pub fn is_nco(&self, user: UserId) -> bool {
        self.ncos.contains(&user)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub callsign: String,
    pub name: String,
}

/// An OpenBridge-style peer, exercising the registration table's
/// `Peer` role without implementing a second wire dialect.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub address: String,
    pub passphrase: String,
}

/// A recorded transmission session, per spec §3/§4.D.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Call {
    pub stream_id: StreamId,
    pub start_time: DateTime<Utc>,
    pub active: bool,
    pub src_user_id: UserId,
    pub repeater_id: RepeaterId,
    pub dst_id: u32,
    pub slot: bool,
    pub group_call: bool,
    pub duration_ms: u64,
    pub loss_count: u32,
    pub jitter_ms_sum: u64,
    pub jitter_samples: u32,
    pub ber_sum: i64,
    pub rssi_sum: i64,
    pub packet_count: u32,
}

impl Call {
    pub fn new(
        stream_id: StreamId,
        src_user_id: UserId,
        repeater_id: RepeaterId,
        dst_id: u32,
        slot: bool,
        group_call: bool,
    ) -> Self {
        Self {
            stream_id,
            start_time: Utc::now(),
            active: true,
            src_user_id,
            repeater_id,
            dst_id,
            slot,
            group_call,
            duration_ms: 0,
            loss_count: 0,
            jitter_ms_sum: 0,
            jitter_samples: 0,
            ber_sum: 0,
            rssi_sum: 0,
            packet_count: 0,
        }
    }

    pub fn matches(
        &self,
        stream_id: StreamId,
        src: UserId,
        dst: u32,
        slot: bool,
        group_call: bool,
    ) -> bool {
        self.stream_id == stream_id
            && self.src_user_id == src
            && self.dst_id == dst
            && self.slot == slot
            && self.group_call == group_call
    }

    pub fn record_packet(&mut self, ber: i8, rssi: i8) {
        self.packet_count += 1;
        if ber >= 0 {
            self.ber_sum += ber as i64;
        }
        if rssi != -1 {
            self.rssi_sum += rssi as i64;
        }
        self.duration_ms = (Utc::now() - self.start_time).num_milliseconds().max(0) as u64;
    }

    pub fn end(&mut self) {
        self.active = false;
        self.duration_ms = (Utc::now() - self.start_time).num_milliseconds().max(0) as u64;
    }
}
