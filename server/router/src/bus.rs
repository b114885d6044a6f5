//! The pub/sub fanout bus (component B). Topics are coarse routing
//! destinations; subscribers get a bounded mpsc channel and are
//! dropped-and-counted on overflow rather than blocking the
//! publisher, mirroring the teacher's per-receiver queue backpressure
//! in `voice_forwarder.rs`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use dmr_ids::{PeerId, RepeaterId, TalkgroupId};
use dmr_proto::Packet;
use tokio::sync::mpsc;
use tracing::trace;

/// Routing destinations a packet can be published to, per spec §6's
/// topic names (`tg:<id>`, `rptr:<id>`, `peer:<id>`) plus the two
/// generic administrative topics named in the expanded spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Talkgroup(TalkgroupId),
    RepeaterPrivate(RepeaterId),
    Peer(PeerId),
    NetEvents,
    NetCheckins,
}

/// Per-subscriber channel capacity. Matches the teacher's
/// `per_receiver_queue` default order of magnitude, sized per spec §5
/// ("bounded channels, ~500 capacity, to bound memory under a
/// slow/stuck receiver").
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 500;

pub type RoutedPacket = Arc<Packet>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<RoutedPacket>,
}

/// The bus itself: a `DashMap` of topic to its live subscriber list,
/// grounded on the teacher's dashmap-backed channel registry.
#[derive(Default)]
pub struct Bus {
    topics: DashMap<Topic, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `topic` with the given channel capacity (§5/§6
    /// `serverChannelCapacity`), returning a handle to unsubscribe and
    /// a receiver of routed packets.
    pub fn subscribe(&self, topic: Topic, capacity: usize) -> (SubscriberId, mpsc::Receiver<RoutedPacket>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(capacity);
        self.topics.entry(topic).or_default().push(Subscriber { id, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, topic: Topic, id: SubscriberId) {
        if let Some(mut subs) = self.topics.get_mut(&topic) {
            subs.retain(|s| s.id != id);
        }
    }

    /// Publish to every live subscriber on `topic`. A full queue is a
    /// drop, not a block — the publisher (the routing hub) must never
    /// stall behind one slow repeater connection.
    pub fn publish(&self, topic: Topic, packet: RoutedPacket) -> usize {
        let Some(subs) = self.topics.get(&topic) else {
            return 0;
        };
        let mut delivered = 0;
        for sub in subs.iter() {
            match sub.tx.try_send(packet.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!(?topic, "subscriber queue full, dropping packet");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.get(&topic).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> RoutedPacket {
        Arc::new(Packet {
            signature: dmr_proto::packet::Signature::Dmrd,
            seq: 0,
            src: 3129900,
            dst: 9,
            repeater: 312_990,
            slot: false,
            group_call: true,
            frame_type: dmr_proto::packet::FrameType::Voice,
            dtype_or_vseq: 0,
            stream_id: 1,
            dmr_data: [0u8; dmr_proto::packet::DMR_DATA_LEN],
            ber: -1,
            rssi: -1,
        })
    }

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers() {
        let bus = Bus::new();
        let topic = Topic::Talkgroup(TalkgroupId::new(9));
        let (_id_a, mut rx_a) = bus.subscribe(topic, SUBSCRIBER_QUEUE_CAPACITY);
        let (_id_b, mut rx_b) = bus.subscribe(topic, SUBSCRIBER_QUEUE_CAPACITY);

        let delivered = bus.publish(topic, sample_packet());
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = Bus::new();
        let topic = Topic::Talkgroup(TalkgroupId::new(9));
        let (id, mut rx) = bus.subscribe(topic, SUBSCRIBER_QUEUE_CAPACITY);
        bus.unsubscribe(topic, id);

        let delivered = bus.publish(topic, sample_packet());
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_rather_than_blocks() {
        let bus = Bus::new();
        let topic = Topic::Talkgroup(TalkgroupId::new(9));
        let (_id, _rx) = bus.subscribe(topic, SUBSCRIBER_QUEUE_CAPACITY);

        for _ in 0..SUBSCRIBER_QUEUE_CAPACITY + 10 {
            bus.publish(topic, sample_packet());
        }
        // No panic, no block: the excess was simply dropped.
    }
}
