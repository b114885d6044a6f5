//! Call tracker (component D): the hub's `trackCall` step, called on
//! every voice-classified packet. Looks the call up by `(streamID,
//! src, dst, slot, groupCall)`, starts a row on first sight, updates
//! running stats on every packet, and ends the call on a terminator
//! or a 2-second idle timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dmr_ids::{RepeaterId, StreamId, UserId};
use dmr_metrics::{LabelPolicy, RouterMetrics};
use dmr_proto::{HubError, Packet};
use dmr_store::{Call, Store};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// Idle timeout per spec §4.D: a call with no packets for this long
/// is force-ended even without an explicit terminator frame.
pub const CALL_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait::async_trait]
pub trait CallTracker: Send + Sync {
    /// Runs the full `IsCallActive` → `StartCall`/`ProcessCallPacket`
    /// → (on terminator) `EndCall` sequence for one voice packet.
    async fn track_call(
        &self,
        packet: &Packet,
        repeater: RepeaterId,
    ) -> Result<(), HubError>;

    /// Sweep idle calls; the owning task calls this on a timer.
    async fn expire_idle(&self);
}

struct Tracked {
    started_at: Instant,
    last_packet_at: Instant,
}

/// Default implementation, backed by a `Store` for persisted call
/// rows and an in-memory liveness map for the idle-timeout sweep —
/// the store alone can't answer "is this active" cheaply enough for
/// the hot routing path, so liveness is tracked twice: authoritative
/// rows in the store, fast membership in `live`.
pub struct DefaultCallTracker {
    store: Arc<dyn Store>,
    live: RwLock<HashMap<u32, Tracked>>,
    // Guards start/end races on the same stream id.
    lock: Mutex<()>,
    metrics: RouterMetrics,
}

impl DefaultCallTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            live: RwLock::new(HashMap::new()),
            lock: Mutex::new(()),
            metrics: RouterMetrics::new("dmr", LabelPolicy::default()),
        }
    }

    async fn start_call(
        &self,
        packet: &Packet,
        repeater: RepeaterId,
    ) -> Result<(), HubError> {
        let call = Call::new(
            StreamId::new(packet.stream_id),
            UserId::new(packet.src),
            repeater,
            packet.dst,
            packet.slot,
            packet.group_call,
        );
        self.store.start_call(call).await.map_err(HubError::from)?;
        let now = Instant::now();
        self.live.write().await.insert(
            packet.stream_id,
            Tracked {
                started_at: now,
                last_packet_at: now,
            },
        );
        self.metrics.call_started();
        debug!(stream_id = packet.stream_id, "call started");
        Ok(())
    }

    async fn end_call(&self, stream_id: u32) -> Result<(), HubError> {
        let _guard = self.lock.lock().await;
        let Some(tracked) = self.live.write().await.remove(&stream_id) else {
            // Idempotent: a duplicate terminator or a sweep racing a
            // terminator both land here harmlessly.
            return Ok(());
        };
        self.store
            .end_call(StreamId::new(stream_id))
            .await
            .map_err(HubError::from)?;
        self.metrics
            .call_ended(tracked.started_at.elapsed().as_secs_f64());
        debug!(stream_id, "call ended");
        Ok(())
    }
}

#[async_trait::async_trait]
impl CallTracker for DefaultCallTracker {
    async fn track_call(
        &self,
        packet: &Packet,
        repeater: RepeaterId,
    ) -> Result<(), HubError> {
        let _guard = self.lock.lock().await;
        let already_active = self.live.read().await.contains_key(&packet.stream_id);
        drop(_guard);

        // `IsCallActive` per spec §4.D: a cache miss in `live` does not
        // necessarily mean this is a new call — e.g. after a process
        // restart the authoritative store may already have an active
        // row for this exact (streamID, src, dst, slot, groupCall).
        // Adopt it into `live` rather than starting a duplicate row.
        let already_active = if already_active {
            true
        } else if let Some(_active) = self
            .store
            .find_active_call(
                StreamId::new(packet.stream_id),
                UserId::new(packet.src),
                packet.dst,
                packet.slot,
                packet.group_call,
            )
            .await
            .map_err(HubError::from)?
        {
            let now = Instant::now();
            self.live.write().await.insert(
                packet.stream_id,
                Tracked {
                    started_at: now,
                    last_packet_at: now,
                },
            );
            true
        } else {
            false
        };

        if !already_active {
            self.start_call(packet, repeater).await?;
        } else if let Some(mut call) = self
            .store
            .get_call(StreamId::new(packet.stream_id))
            .await
            .map_err(HubError::from)?
        {
            call.record_packet(packet.ber, packet.rssi);
            self.store.update_call(&call).await.map_err(HubError::from)?;
            if let Some(tracked) = self.live.write().await.get_mut(&packet.stream_id) {
                tracked.last_packet_at = Instant::now();
            }
        }

        if packet.is_terminator() {
            self.end_call(packet.stream_id).await?;
        }
        Ok(())
    }

    async fn expire_idle(&self) {
        let now = Instant::now();
        let stale: Vec<u32> = self
            .live
            .read()
            .await
            .iter()
            .filter(|(_, t)| now.duration_since(t.last_packet_at) >= CALL_IDLE_TIMEOUT)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            let _ = self.end_call(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmr_proto::packet::{DMR_DATA_LEN, FrameType, Signature};
    use dmr_store::MemStore;

    fn tracker() -> DefaultCallTracker {
        DefaultCallTracker::new(Arc::new(MemStore::new()))
    }

    fn voice_packet(stream_id: u32, terminator: bool) -> Packet {
        Packet {
            signature: Signature::Dmrd,
            seq: 0,
            src: 3129900,
            dst: 9,
            repeater: 312_990,
            slot: false,
            group_call: true,
            frame_type: if terminator {
                FrameType::DataSync
            } else {
                FrameType::Voice
            },
            dtype_or_vseq: if terminator { 2 } else { 0 },
            stream_id,
            dmr_data: [0u8; DMR_DATA_LEN],
            ber: -1,
            rssi: -1,
        }
    }

    #[tokio::test]
    async fn repeated_packets_keep_the_same_call_active() {
        let t = tracker();
        let repeater = RepeaterId::new(312_990);
        t.track_call(&voice_packet(1, false), repeater).await.unwrap();
        t.track_call(&voice_packet(1, false), repeater).await.unwrap();
        assert!(t.live.read().await.contains_key(&1));
    }

    #[tokio::test]
    async fn terminator_ends_the_call() {
        let t = tracker();
        let repeater = RepeaterId::new(312_990);
        t.track_call(&voice_packet(2, false), repeater).await.unwrap();
        t.track_call(&voice_packet(2, true), repeater).await.unwrap();
        assert!(!t.live.read().await.contains_key(&2));
    }

    #[tokio::test]
    async fn duplicate_terminator_is_idempotent() {
        let t = tracker();
        let repeater = RepeaterId::new(312_990);
        t.track_call(&voice_packet(3, false), repeater).await.unwrap();
        t.track_call(&voice_packet(3, true), repeater).await.unwrap();
        t.end_call(3).await.unwrap();
        assert!(!t.live.read().await.contains_key(&3));
    }

    #[tokio::test]
    async fn idle_sweep_expires_a_stale_call() {
        tokio::time::pause();
        let t = tracker();
        let repeater = RepeaterId::new(312_990);
        t.track_call(&voice_packet(4, false), repeater).await.unwrap();
        tokio::time::advance(CALL_IDLE_TIMEOUT + Duration::from_millis(1)).await;
        t.expire_idle().await;
        assert!(!t.live.read().await.contains_key(&4));
    }
}
