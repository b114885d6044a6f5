//! The persistent store abstraction (component C): repeaters,
//! talkgroups, users, call history, peers. The hub only ever talks to
//! this trait, never to a concrete backend.

use std::time::Instant;

use async_trait::async_trait;
use dmr_ids::{PeerId, RepeaterId, StreamId, TalkgroupId, UserId};
use dmr_metrics::StoreMetrics;

use crate::error::{StoreError, StoreResult};
use crate::model::{Call, Peer, Repeater, Talkgroup, User};

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_repeater(&self, id: RepeaterId) -> StoreResult<Option<Repeater>>;
    async fn upsert_repeater(&self, repeater: &Repeater) -> StoreResult<()>;

    /// Set (or clear) the dynamic talkgroup on one slot. Used by
    /// dynamic-TG learning and unlink (§4.G steps 3-4). Atomic with
    /// respect to concurrent reads of the same repeater.
    async fn set_dynamic_talkgroup(
        &self,
        id: RepeaterId,
        slot: bool,
        tg: Option<TalkgroupId>,
    ) -> StoreResult<()>;

    /// Debounced per spec §5: callers are responsible for only
    /// calling this at most once per debounce window; the store does
    /// not itself rate-limit.
    async fn touch_last_connected(&self, id: RepeaterId) -> StoreResult<()>;

    async fn get_talkgroup(&self, id: TalkgroupId) -> StoreResult<Option<Talkgroup>>;
    async fn talkgroup_exists(&self, id: TalkgroupId) -> StoreResult<bool> {
        Ok(self.get_talkgroup(id).await?.is_some())
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn get_peer(&self, id: PeerId) -> StoreResult<Option<Peer>>;

    /// For private (non-group) calls addressed to a user id: the
    /// repeater the user was most recently heard on, per §4.G step 6.
    async fn most_recent_repeater_for_user(&self, user: UserId) -> StoreResult<Option<RepeaterId>>;

    // -- Call tracker backing store (component D) --

    async fn find_active_call(
        &self,
        stream_id: StreamId,
        src: UserId,
        dst: u32,
        slot: bool,
        group_call: bool,
    ) -> StoreResult<Option<Call>>;

    /// Fetch a call row by id regardless of active/ended state, for
    /// callers that already hold the stream id from a tracked packet.
    async fn get_call(&self, stream_id: StreamId) -> StoreResult<Option<Call>>;

    async fn start_call(&self, call: Call) -> StoreResult<()>;
    async fn update_call(&self, call: &Call) -> StoreResult<()>;
    async fn end_call(&self, stream_id: StreamId) -> StoreResult<Option<Call>>;
}

/// Postgres-backed `Store`. Ids are stored as `bigint` (all numeric
/// ids here fit comfortably in an `i64`), mirroring the teacher's raw
/// `sqlx::query(...).bind(...)` style rather than the query! macros.
pub struct PgStore {
    pool: sqlx::PgPool,
    metrics: StoreMetrics,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            pool,
            metrics: StoreMetrics::new("dmr"),
        }
    }

    fn record(&self, query: &'static str, started: Instant) {
        self.metrics.query_seconds(query, started.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_repeater(&self, id: RepeaterId) -> StoreResult<Option<Repeater>> {
        let started = Instant::now();
        let row = sqlx::query_as::<_, RepeaterRow>(
            r#"SELECT id, owner_id, dialect, password, simplex,
                      ts1_static, ts2_static, ts1_dynamic, ts2_dynamic,
                      callsign, rx_freq_hz, tx_freq_hz, colour_code,
                      latitude, longitude, height, location, description,
                      last_connected_at
               FROM repeaters WHERE id = $1"#,
        )
        .bind(id.get() as i64)
        .fetch_optional(&self.pool)
        .await?;
        self.record("get_repeater", started);
        Ok(row.map(RepeaterRow::into_model))
    }

    async fn upsert_repeater(&self, repeater: &Repeater) -> StoreResult<()> {
        let started = Instant::now();
        sqlx::query(
            r#"INSERT INTO repeaters
                 (id, owner_id, dialect, password, simplex,
                  ts1_static, ts2_static, ts1_dynamic, ts2_dynamic,
                  callsign, rx_freq_hz, tx_freq_hz, colour_code,
                  latitude, longitude, height, location, description,
                  last_connected_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)
               ON CONFLICT (id) DO UPDATE SET
                 owner_id = EXCLUDED.owner_id,
                 dialect = EXCLUDED.dialect,
                 password = EXCLUDED.password,
                 simplex = EXCLUDED.simplex,
                 ts1_static = EXCLUDED.ts1_static,
                 ts2_static = EXCLUDED.ts2_static,
                 ts1_dynamic = EXCLUDED.ts1_dynamic,
                 ts2_dynamic = EXCLUDED.ts2_dynamic,
                 callsign = EXCLUDED.callsign,
                 rx_freq_hz = EXCLUDED.rx_freq_hz,
                 tx_freq_hz = EXCLUDED.tx_freq_hz,
                 colour_code = EXCLUDED.colour_code,
                 latitude = EXCLUDED.latitude,
                 longitude = EXCLUDED.longitude,
                 height = EXCLUDED.height,
                 location = EXCLUDED.location,
                 description = EXCLUDED.description"#,
        )
        .bind(repeater.id.get() as i64)
        .bind(repeater.owner_id.get() as i64)
        .bind(&repeater.dialect)
        .bind(&repeater.password)
        .bind(repeater.simplex)
        .bind(ids_to_i64(&repeater.ts1_static))
        .bind(ids_to_i64(&repeater.ts2_static))
        .bind(repeater.ts1_dynamic.map(|t| t.get() as i64))
        .bind(repeater.ts2_dynamic.map(|t| t.get() as i64))
        .bind(&repeater.callsign)
        .bind(&repeater.rx_freq_hz)
        .bind(&repeater.tx_freq_hz)
        .bind(repeater.colour_code as i32)
        .bind(repeater.latitude)
        .bind(repeater.longitude)
        .bind(repeater.height as i32)
        .bind(&repeater.location)
        .bind(&repeater.description)
        .bind(repeater.last_connected_at)
        .execute(&self.pool)
        .await?;
        self.record("upsert_repeater", started);
        Ok(())
    }

    async fn set_dynamic_talkgroup(
        &self,
        id: RepeaterId,
        slot: bool,
        tg: Option<TalkgroupId>,
    ) -> StoreResult<()> {
        let started = Instant::now();
        let column = if slot { "ts2_dynamic" } else { "ts1_dynamic" };
        let sql = format!("UPDATE repeaters SET {column} = $1 WHERE id = $2");
        let result = sqlx::query(&sql)
            .bind(tg.map(|t| t.get() as i64))
            .bind(id.get() as i64)
            .execute(&self.pool)
            .await?;
        self.record("set_dynamic_talkgroup", started);
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("repeater"));
        }
        Ok(())
    }

    async fn touch_last_connected(&self, id: RepeaterId) -> StoreResult<()> {
        let started = Instant::now();
        let result = sqlx::query("UPDATE repeaters SET last_connected_at = now() WHERE id = $1")
            .bind(id.get() as i64)
            .execute(&self.pool)
            .await?;
        self.record("touch_last_connected", started);
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("repeater"));
        }
        Ok(())
    }

    async fn get_talkgroup(&self, id: TalkgroupId) -> StoreResult<Option<Talkgroup>> {
        let started = Instant::now();
        let row = sqlx::query_as::<_, TalkgroupRow>(
            "SELECT id, name, description, admins, ncos FROM talkgroups WHERE id = $1",
        )
        .bind(id.get() as i64)
        .fetch_optional(&self.pool)
        .await?;
        self.record("get_talkgroup", started);
        Ok(row.map(TalkgroupRow::into_model))
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let started = Instant::now();
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, callsign, name FROM users WHERE id = $1",
        )
        .bind(id.get() as i64)
        .fetch_optional(&self.pool)
        .await?;
        self.record("get_user", started);
        Ok(row.map(UserRow::into_model))
    }

    async fn get_peer(&self, id: PeerId) -> StoreResult<Option<Peer>> {
        let started = Instant::now();
        let row = sqlx::query_as::<_, PeerRow>(
            "SELECT id, address, passphrase FROM peers WHERE id = $1",
        )
        .bind(id.get() as i64)
        .fetch_optional(&self.pool)
        .await?;
        self.record("get_peer", started);
        Ok(row.map(PeerRow::into_model))
    }

    async fn most_recent_repeater_for_user(&self, user: UserId) -> StoreResult<Option<RepeaterId>> {
        let started = Instant::now();
        let row: Option<(i64,)> = sqlx::query_as(
            r#"SELECT repeater_id FROM calls
               WHERE src_user_id = $1
               ORDER BY start_time DESC LIMIT 1"#,
        )
        .bind(user.get() as i64)
        .fetch_optional(&self.pool)
        .await?;
        self.record("most_recent_repeater_for_user", started);
        Ok(row.map(|(id,)| RepeaterId::new(id as u32)))
    }

    async fn find_active_call(
        &self,
        stream_id: StreamId,
        src: UserId,
        dst: u32,
        slot: bool,
        group_call: bool,
    ) -> StoreResult<Option<Call>> {
        let started = Instant::now();
        let row = sqlx::query_as::<_, CallRow>(
            r#"SELECT stream_id, start_time, active, src_user_id, repeater_id, dst_id,
                      slot, group_call, duration_ms, loss_count, jitter_ms_sum,
                      jitter_samples, ber_sum, rssi_sum, packet_count
               FROM calls
               WHERE stream_id = $1 AND src_user_id = $2 AND dst_id = $3
                 AND slot = $4 AND group_call = $5 AND active"#,
        )
        .bind(stream_id.get() as i64)
        .bind(src.get() as i64)
        .bind(dst as i64)
        .bind(slot)
        .bind(group_call)
        .fetch_optional(&self.pool)
        .await?;
        self.record("find_active_call", started);
        Ok(row.map(CallRow::into_model))
    }

    async fn get_call(&self, stream_id: StreamId) -> StoreResult<Option<Call>> {
        let started = Instant::now();
        let row = sqlx::query_as::<_, CallRow>(
            r#"SELECT stream_id, start_time, active, src_user_id, repeater_id, dst_id,
                      slot, group_call, duration_ms, loss_count, jitter_ms_sum,
                      jitter_samples, ber_sum, rssi_sum, packet_count
               FROM calls WHERE stream_id = $1"#,
        )
        .bind(stream_id.get() as i64)
        .fetch_optional(&self.pool)
        .await?;
        self.record("get_call", started);
        Ok(row.map(CallRow::into_model))
    }

    async fn start_call(&self, call: Call) -> StoreResult<()> {
        let started = Instant::now();
        sqlx::query(
            r#"INSERT INTO calls
                 (stream_id, start_time, active, src_user_id, repeater_id, dst_id,
                  slot, group_call, duration_ms, loss_count, jitter_ms_sum,
                  jitter_samples, ber_sum, rssi_sum, packet_count)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)"#,
        )
        .bind(call.stream_id.get() as i64)
        .bind(call.start_time)
        .bind(call.active)
        .bind(call.src_user_id.get() as i64)
        .bind(call.repeater_id.get() as i64)
        .bind(call.dst_id as i64)
        .bind(call.slot)
        .bind(call.group_call)
        .bind(call.duration_ms as i64)
        .bind(call.loss_count as i32)
        .bind(call.jitter_ms_sum as i64)
        .bind(call.jitter_samples as i32)
        .bind(call.ber_sum)
        .bind(call.rssi_sum)
        .bind(call.packet_count as i32)
        .execute(&self.pool)
        .await?;
        self.record("start_call", started);
        Ok(())
    }

    async fn update_call(&self, call: &Call) -> StoreResult<()> {
        let started = Instant::now();
        sqlx::query(
            r#"UPDATE calls SET active = $2, duration_ms = $3, loss_count = $4,
                 jitter_ms_sum = $5, jitter_samples = $6, ber_sum = $7,
                 rssi_sum = $8, packet_count = $9
               WHERE stream_id = $1"#,
        )
        .bind(call.stream_id.get() as i64)
        .bind(call.active)
        .bind(call.duration_ms as i64)
        .bind(call.loss_count as i32)
        .bind(call.jitter_ms_sum as i64)
        .bind(call.jitter_samples as i32)
        .bind(call.ber_sum)
        .bind(call.rssi_sum)
        .bind(call.packet_count as i32)
        .execute(&self.pool)
        .await?;
        self.record("update_call", started);
        Ok(())
    }

    async fn end_call(&self, stream_id: StreamId) -> StoreResult<Option<Call>> {
        let started = Instant::now();
        let row = sqlx::query_as::<_, CallRow>(
            r#"UPDATE calls SET active = false,
                 duration_ms = (EXTRACT(EPOCH FROM (now() - start_time)) * 1000)::bigint
               WHERE stream_id = $1
               RETURNING stream_id, start_time, active, src_user_id, repeater_id, dst_id,
                         slot, group_call, duration_ms, loss_count, jitter_ms_sum,
                         jitter_samples, ber_sum, rssi_sum, packet_count"#,
        )
        .bind(stream_id.get() as i64)
        .fetch_optional(&self.pool)
        .await?;
        self.record("end_call", started);
        Ok(row.map(CallRow::into_model))
    }
}

fn ids_to_i64(ids: &[TalkgroupId]) -> Vec<i64> {
    ids.iter().map(|id| id.get() as i64).collect()
}

#[derive(sqlx::FromRow)]
struct RepeaterRow {
    id: i64,
    owner_id: i64,
    dialect: String,
    password: String,
    simplex: bool,
    ts1_static: Vec<i64>,
    ts2_static: Vec<i64>,
    ts1_dynamic: Option<i64>,
    ts2_dynamic: Option<i64>,
    callsign: String,
    rx_freq_hz: String,
    tx_freq_hz: String,
    colour_code: i32,
    latitude: f64,
    longitude: f64,
    height: i32,
    location: String,
    description: String,
    last_connected_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl RepeaterRow {
    fn into_model(self) -> Repeater {
        Repeater {
            id: RepeaterId::new(self.id as u32),
            owner_id: UserId::new(self.owner_id as u32),
            dialect: self.dialect,
            password: self.password,
            simplex: self.simplex,
            ts1_static: self.ts1_static.into_iter().map(|i| TalkgroupId::new(i as u32)).collect(),
            ts2_static: self.ts2_static.into_iter().map(|i| TalkgroupId::new(i as u32)).collect(),
            ts1_dynamic: self.ts1_dynamic.map(|i| TalkgroupId::new(i as u32)),
            ts2_dynamic: self.ts2_dynamic.map(|i| TalkgroupId::new(i as u32)),
            callsign: self.callsign,
            rx_freq_hz: self.rx_freq_hz,
            tx_freq_hz: self.tx_freq_hz,
            colour_code: self.colour_code as u32,
            latitude: self.latitude,
            longitude: self.longitude,
            height: self.height as u32,
            location: self.location,
            description: self.description,
            last_connected_at: self.last_connected_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TalkgroupRow {
    id: i64,
    name: String,
    description: String,
    admins: Vec<i64>,
    ncos: Vec<i64>,
}

impl TalkgroupRow {
    fn into_model(self) -> Talkgroup {
        Talkgroup {
            id: TalkgroupId::new(self.id as u32),
            name: self.name,
            description: self.description,
            admins: self.admins.into_iter().map(|i| UserId::new(i as u32)).collect(),
            ncos: self.ncos.into_iter().map(|i| UserId::new(i as u32)).collect(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    callsign: String,
    name: String,
}

impl UserRow {
    fn into_model(self) -> User {
        User {
            id: UserId::new(self.id as u32),
            callsign: self.callsign,
            name: self.name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PeerRow {
    id: i64,
    address: String,
    passphrase: String,
}

impl PeerRow {
    fn into_model(self) -> Peer {
        Peer {
            id: PeerId::new(self.id as u32),
            address: self.address,
            passphrase: self.passphrase,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CallRow {
    stream_id: i64,
    start_time: chrono::DateTime<chrono::Utc>,
    active: bool,
    src_user_id: i64,
    repeater_id: i64,
    dst_id: i64,
    slot: bool,
    group_call: bool,
    duration_ms: i64,
    loss_count: i32,
    jitter_ms_sum: i64,
    jitter_samples: i32,
    ber_sum: i64,
    rssi_sum: i64,
    packet_count: i32,
}

impl CallRow {
    fn into_model(self) -> Call {
        Call {
            stream_id: StreamId::new(self.stream_id as u32),
            start_time: self.start_time,
            active: self.active,
            src_user_id: UserId::new(self.src_user_id as u32),
            repeater_id: RepeaterId::new(self.repeater_id as u32),
            dst_id: self.dst_id as u32,
            slot: self.slot,
            group_call: self.group_call,
            duration_ms: self.duration_ms as u64,
            loss_count: self.loss_count as u32,
            jitter_ms_sum: self.jitter_ms_sum as u64,
            jitter_samples: self.jitter_samples as u32,
            ber_sum: self.ber_sum,
            rssi_sum: self.rssi_sum,
            packet_count: self.packet_count as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmr_ids::{RepeaterId, TalkgroupId, UserId};

    fn sample_repeater() -> Repeater {
        Repeater {
            id: RepeaterId::new(312_990),
            owner_id: UserId::new(3129900),
            dialect: "mmdvm".into(),
            password: "secret".into(),
            simplex: false,
            ts1_static: vec![TalkgroupId::new(9)],
            ts2_static: vec![],
            ts1_dynamic: None,
            ts2_dynamic: None,
            callsign: "W1ABC".into(),
            rx_freq_hz: "446500000".into(),
            tx_freq_hz: "446500000".into(),
            colour_code: 1,
            latitude: 42.0,
            longitude: -71.0,
            height: 30,
            location: "Boston".into(),
            description: "".into(),
            last_connected_at: None,
        }
    }

    #[tokio::test]
    async fn mem_store_upserts_and_fetches_repeaters() {
        let store = crate::mem::MemStore::new();
        store.upsert_repeater(&sample_repeater()).await.unwrap();
        let fetched = store.get_repeater(RepeaterId::new(312_990)).await.unwrap();
        assert_eq!(fetched.unwrap().callsign, "W1ABC");
    }

    #[tokio::test]
    async fn mem_store_dynamic_talkgroup_round_trips() {
        let store = crate::mem::MemStore::new();
        store.upsert_repeater(&sample_repeater()).await.unwrap();
        store
            .set_dynamic_talkgroup(RepeaterId::new(312_990), true, Some(TalkgroupId::new(3120)))
            .await
            .unwrap();
        let repeater = store
            .get_repeater(RepeaterId::new(312_990))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repeater.ts2_dynamic, Some(TalkgroupId::new(3120)));
    }

    #[tokio::test]
    async fn mem_store_set_dynamic_on_unknown_repeater_errors() {
        let store = crate::mem::MemStore::new();
        let err = store
            .set_dynamic_talkgroup(RepeaterId::new(1), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
