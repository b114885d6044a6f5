//! The parrot/echo service (component E). A transmission addressed
//! to the well-known parrot destination is buffered in memory as it
//! arrives; once the call ends, the whole burst is replayed back to
//! the originating repeater after a 3-second lead-in, paced at the
//! DMR frame interval (60ms).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dmr_ids::RepeaterId;
use dmr_metrics::{LabelPolicy, RouterMetrics};
use dmr_proto::Packet;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{Bus, Topic};
use crate::call_tracker::CallTracker;

/// Silence inserted before playback starts, per spec §4.E.
pub const LEAD_IN: Duration = Duration::from_secs(3);
/// DMR frame interval; playback is paced one packet per tick.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(60);

pub struct ParrotService {
    bus: Arc<Bus>,
    call_tracker: Arc<dyn CallTracker>,
    buffers: Mutex<HashMap<u32, Vec<Packet>>>,
    shutdown: CancellationToken,
    metrics: RouterMetrics,
}

impl ParrotService {
    pub fn new(
        bus: Arc<Bus>,
        call_tracker: Arc<dyn CallTracker>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bus,
            call_tracker,
            buffers: Mutex::new(HashMap::new()),
            shutdown,
            metrics: RouterMetrics::new("dmr", LabelPolicy::default()),
        }
    }

    /// Append a packet to the in-flight buffer for `stream_id`.
    pub async fn record(&self, stream_id: u32, packet: Packet) {
        self.buffers.lock().await.entry(stream_id).or_default().push(packet);
    }

    /// Called when the call tracker ends the stream: takes ownership
    /// of the buffered burst and spawns the delayed, paced playback
    /// back to `repeater`.
    pub fn play_back(self: &Arc<Self>, stream_id: u32, repeater: RepeaterId) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let burst = {
                let mut guard = this.buffers.lock().await;
                guard.remove(&stream_id)
            };
            let Some(burst) = burst else {
                return;
            };
            if burst.is_empty() {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(LEAD_IN) => {}
                _ = this.shutdown.cancelled() => {
                    debug!(stream_id, "parrot playback cancelled during lead-in");
                    return;
                }
            }

            let topic = Topic::RepeaterPrivate(repeater);
            let mut ticker = tokio::time::interval(FRAME_INTERVAL);
            for packet in burst {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = this.shutdown.cancelled() => {
                        debug!(stream_id, "parrot playback cancelled mid-burst");
                        return;
                    }
                }
                if let Err(err) = this.call_tracker.track_call(&packet, repeater).await {
                    warn!(?err, stream_id, "call tracker error during parrot playback");
                }
                this.bus.publish(topic, Arc::new(packet));
            }
            this.metrics.parrot_playback();
            debug!(stream_id, "parrot playback complete");
        });
    }

    /// Drop a buffer without playing it back, e.g. on a bad/aborted
    /// call that never reaches a clean terminator.
    pub async fn discard(&self, stream_id: u32) {
        if self.buffers.lock().await.remove(&stream_id).is_none() {
            warn!(stream_id, "discard on unknown parrot buffer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmr_proto::packet::{DMR_DATA_LEN, FrameType, Signature};
    use dmr_store::MemStore;

    use crate::call_tracker::DefaultCallTracker;

    fn test_call_tracker() -> Arc<dyn CallTracker> {
        Arc::new(DefaultCallTracker::new(Arc::new(MemStore::new())))
    }

    fn sample_packet(seq: u8) -> Packet {
        Packet {
            signature: Signature::Dmrd,
            seq,
            src: 3129900,
            dst: dmr_ids::well_known::PARROT_USER,
            repeater: 312_990,
            slot: false,
            group_call: false,
            frame_type: FrameType::Voice,
            dtype_or_vseq: 0,
            stream_id: 1,
            dmr_data: [0u8; DMR_DATA_LEN],
            ber: -1,
            rssi: -1,
        }
    }

    #[tokio::test]
    async fn records_and_plays_back_buffered_burst() {
        tokio::time::pause();
        let bus = Arc::new(Bus::new());
        let shutdown = CancellationToken::new();
        let parrot = Arc::new(ParrotService::new(Arc::clone(&bus), test_call_tracker(), shutdown));

        let repeater = RepeaterId::new(312_990);
        let (_id, mut rx) = bus.subscribe(Topic::RepeaterPrivate(repeater), crate::bus::SUBSCRIBER_QUEUE_CAPACITY);

        parrot.record(1, sample_packet(0)).await;
        parrot.record(1, sample_packet(1)).await;
        parrot.play_back(1, repeater);

        tokio::time::advance(LEAD_IN + FRAME_INTERVAL).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn shutdown_cancels_playback_before_it_sends() {
        tokio::time::pause();
        let bus = Arc::new(Bus::new());
        let shutdown = CancellationToken::new();
        let parrot = Arc::new(ParrotService::new(
            Arc::clone(&bus),
            test_call_tracker(),
            shutdown.clone(),
        ));

        let repeater = RepeaterId::new(312_990);
        let (_id, mut rx) = bus.subscribe(Topic::RepeaterPrivate(repeater), crate::bus::SUBSCRIBER_QUEUE_CAPACITY);

        parrot.record(2, sample_packet(0)).await;
        parrot.play_back(2, repeater);
        shutdown.cancel();

        tokio::time::advance(LEAD_IN + FRAME_INTERVAL).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
