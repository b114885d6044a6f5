//! The routing hub (component G): `RoutePacket`, the single entry
//! point every protocol server calls for an inbound DMRD burst. Pure
//! side effects — publishes to the bus, never returns routed packets.

use std::sync::Arc;

use dmr_ids::{well_known, RepeaterId, RepeaterIdKind, TalkgroupId, UserId};
use dmr_metrics::{LabelPolicy, RouterMetrics};
use dmr_proto::Packet;
use dmr_store::Store;
use tracing::{debug, warn};

use crate::bus::{Bus, Topic};
use crate::call_tracker::CallTracker;
use crate::parrot::ParrotService;
use crate::registration::RegistrationTable;
use crate::subscriptions::SubscriptionManager;

pub struct RoutingHub {
    bus: Arc<Bus>,
    store: Arc<dyn Store>,
    call_tracker: Arc<dyn CallTracker>,
    parrot: Arc<ParrotService>,
    subscriptions: Arc<SubscriptionManager>,
    registrations: Arc<RegistrationTable>,
    metrics: RouterMetrics,
}

impl RoutingHub {
    pub fn new(
        bus: Arc<Bus>,
        store: Arc<dyn Store>,
        call_tracker: Arc<dyn CallTracker>,
        parrot: Arc<ParrotService>,
        subscriptions: Arc<SubscriptionManager>,
        registrations: Arc<RegistrationTable>,
    ) -> Self {
        Self {
            bus,
            store,
            call_tracker,
            parrot,
            subscriptions,
            registrations,
            metrics: RouterMetrics::new("dmr", LabelPolicy::default()),
        }
    }

    /// `RoutePacket(ctx, packet, sourceName)` from spec §4.G.
    pub async fn route_packet(&self, packet: Packet, source_name: &str) {
        self.metrics.rx_packet();
        let (is_voice, is_data) = packet.classify();
        let repeater = RepeaterId::new(packet.repeater);

        // Step 2: notify the call tracker unless unlink or neither.
        if packet.dst != well_known::UNLINK && (is_voice || is_data) {
            if let Err(err) = self.call_tracker.track_call(&packet, repeater).await {
                warn!(?err, "call tracker error, continuing route");
            }
        }

        // Step 3: special destinations.
        if packet.dst == well_known::PARROT_USER && is_voice {
            self.metrics.per_talkgroup_rx(packet.dst);
            self.parrot.record(packet.stream_id, packet.clone()).await;
            if packet.is_terminator() {
                self.parrot.play_back(packet.stream_id, repeater);
            }
            return;
        }
        if packet.dst == well_known::UNLINK && is_voice {
            self.unlink(repeater, packet.slot).await;
            return;
        }

        // Step 4: dynamic-talkgroup learning on group voice calls.
        if packet.group_call && is_voice {
            self.learn_dynamic_talkgroup(repeater, packet.dst, packet.slot)
                .await;
        }

        // Step 5: forward to peer-role servers.
        if self.registrations.role_of(source_name) != Some(crate::registration::ServerRole::Peer) {
            for peer_name in self.registrations.peer_server_names(source_name) {
                self.registrations
                    .deliver_to_server(&peer_name, repeater, packet.clone())
                    .await;
            }
        }

        // Step 6: route.
        if packet.group_call && is_voice {
            self.route_group_voice(packet, source_name).await;
        } else if !packet.group_call && is_voice {
            self.route_private_voice(packet).await;
        } else if is_data {
            debug!(stream_id = packet.stream_id, "data packet not routed");
        }
    }

    async fn unlink(&self, repeater: RepeaterId, slot: bool) {
        let prior = match self.store.get_repeater(repeater).await {
            Ok(Some(r)) => {
                if slot {
                    r.ts2_dynamic
                } else {
                    r.ts1_dynamic
                }
            }
            _ => None,
        };
        if self
            .store
            .set_dynamic_talkgroup(repeater, slot, None)
            .await
            .is_err()
        {
            warn!(repeater = repeater.get(), "unlink failed to update store");
            self.metrics.drop_reason("unlink_store_error");
            return;
        }
        if let Some(tg) = prior {
            self.subscriptions.unsubscribe(repeater, tg, slot).await;
        }
    }

    async fn learn_dynamic_talkgroup(&self, repeater: RepeaterId, dst: u32, slot: bool) {
        let Ok(Some(current)) = self.store.get_repeater(repeater).await else {
            return;
        };
        let dst_tg = TalkgroupId::new(dst);
        let already = if slot {
            current.ts2_dynamic
        } else {
            current.ts1_dynamic
        };
        if already == Some(dst_tg) {
            return;
        }

        let prior = already;
        if self
            .store
            .set_dynamic_talkgroup(repeater, slot, Some(dst_tg))
            .await
            .is_err()
        {
            return;
        }
        if let Some(prior_tg) = prior {
            self.subscriptions.unsubscribe(repeater, prior_tg, slot).await;
        }
        self.subscriptions
            .subscribe(repeater, dst_tg, &current.dialect);
    }

    async fn route_group_voice(&self, packet: Packet, source_name: &str) {
        let tg = TalkgroupId::new(packet.dst);
        match self.store.get_talkgroup(tg).await {
            Ok(Some(_)) => {}
            _ => {
                warn!(tg = tg.get(), "group voice to unknown talkgroup dropped");
                self.metrics.drop_reason("unknown_talkgroup");
                return;
            }
        }

        self.metrics.per_talkgroup_rx(tg.get());
        let packet = Arc::new(packet);
        let fanout = self.bus.publish(Topic::Talkgroup(tg), Arc::clone(&packet));
        self.metrics.forwarded(fanout);

        // Broadcast subscribers get the source name prefixed for
        // self-echo filtering on their end.
        for name in self.registrations.broadcast_server_names(source_name) {
            self.registrations
                .deliver_to_server(&name, RepeaterId::new(packet.repeater), (*packet).clone())
                .await;
        }
    }

    async fn route_private_voice(&self, packet: Packet) {
        match RepeaterIdKind::classify(packet.dst) {
            RepeaterIdKind::Repeater | RepeaterIdKind::Hotspot => {
                let dst_repeater = RepeaterId::new(packet.dst);
                match self.store.get_repeater(dst_repeater).await {
                    Ok(Some(_)) => {
                        let fanout = self
                            .bus
                            .publish(Topic::RepeaterPrivate(dst_repeater), Arc::new(packet));
                        self.metrics.forwarded(fanout);
                    }
                    _ => {
                        warn!(dst = packet.dst, "private call to unknown repeater dropped");
                        self.metrics.drop_reason("unknown_repeater");
                    }
                }
            }
            RepeaterIdKind::User => {
                let user = UserId::new(packet.dst);
                match self.store.most_recent_repeater_for_user(user).await {
                    Ok(Some(dst_repeater)) => {
                        let fanout = self
                            .bus
                            .publish(Topic::RepeaterPrivate(dst_repeater), Arc::new(packet));
                        self.metrics.forwarded(fanout);
                    }
                    _ => {
                        warn!(dst = packet.dst, "private call to user with no recent repeater dropped");
                        self.metrics.drop_reason("user_no_recent_repeater");
                    }
                }
            }
            RepeaterIdKind::Unrecognized => {
                warn!(dst = packet.dst, "private call dst does not match any known id shape");
                self.metrics.drop_reason("unrecognized_dst");
            }
        }
    }
}

/// End-to-end scenarios from spec.md §8's numbered test list, wiring a
/// real `Bus`/`SubscriptionManager`/`RegistrationTable` together over
/// `MemStore` rather than exercising each component in isolation.
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dmr_proto::packet::{FrameType, Signature, DMR_DATA_LEN};
    use dmr_store::{MemStore, Repeater, Talkgroup, User};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::call_tracker::DefaultCallTracker;
    use crate::registration::ServerRole;

    fn sample_repeater(
        id: u32,
        owner: u32,
        ts1_static: Vec<u32>,
        ts2_dynamic: Option<u32>,
    ) -> Repeater {
        Repeater {
            id: RepeaterId::new(id),
            owner_id: UserId::new(owner),
            dialect: "mmdvm".to_string(),
            password: "secret".to_string(),
            simplex: false,
            ts1_static: ts1_static.into_iter().map(TalkgroupId::new).collect(),
            ts2_static: Vec::new(),
            ts1_dynamic: None,
            ts2_dynamic: ts2_dynamic.map(TalkgroupId::new),
            callsign: "W1ABC".to_string(),
            rx_freq_hz: "446500000".to_string(),
            tx_freq_hz: "441500000".to_string(),
            colour_code: 1,
            latitude: 0.0,
            longitude: 0.0,
            height: 0,
            location: String::new(),
            description: String::new(),
            last_connected_at: None,
        }
    }

    fn voice_packet(src: u32, dst: u32, repeater: u32, slot: bool, stream_id: u32) -> Packet {
        Packet {
            signature: Signature::Dmrd,
            seq: 0,
            src,
            dst,
            repeater,
            slot,
            group_call: true,
            frame_type: FrameType::Voice,
            dtype_or_vseq: 0,
            stream_id,
            dmr_data: [0u8; DMR_DATA_LEN],
            ber: -1,
            rssi: -1,
        }
    }

    struct Harness {
        store: MemStore,
        hub: RoutingHub,
        subscriptions: Arc<SubscriptionManager>,
    }

    impl Harness {
        fn new() -> (Self, Arc<RegistrationTable>) {
            let store = MemStore::new();
            let store_dyn: Arc<dyn Store> = Arc::new(store.clone());
            let bus = Arc::new(Bus::new());
            let registrations = Arc::new(RegistrationTable::new());
            let shutdown = CancellationToken::new();
            let subscriptions = Arc::new(SubscriptionManager::new(
                Arc::clone(&bus),
                Arc::clone(&store_dyn),
                Arc::clone(&registrations),
                shutdown.clone(),
            ));
            let call_tracker: Arc<dyn CallTracker> =
                Arc::new(DefaultCallTracker::new(Arc::clone(&store_dyn)));
            let parrot = Arc::new(ParrotService::new(
                Arc::clone(&bus),
                Arc::clone(&call_tracker),
                shutdown,
            ));
            let hub = RoutingHub::new(
                bus,
                store_dyn,
                call_tracker,
                parrot,
                Arc::clone(&subscriptions),
                Arc::clone(&registrations),
            );
            (
                Self {
                    store,
                    hub,
                    subscriptions,
                },
                registrations,
            )
        }
    }

    async fn recv_with_timeout(
        rx: &mut tokio::sync::mpsc::Receiver<(RepeaterId, Packet)>,
    ) -> Option<(RepeaterId, Packet)> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn scenario_2_group_voice_routes_only_to_the_static_subscriber() {
        let (h, registrations) = Harness::new();
        h.store.seed_user(User {
            id: UserId::new(1_000_001),
            callsign: "W1ABC".to_string(),
            name: "Someone".to_string(),
        });
        h.store
            .seed_repeater(sample_repeater(100_001, 1_000_001, vec![], None));
        h.store
            .seed_repeater(sample_repeater(100_002, 1_000_001, vec![10], None));
        h.store.seed_talkgroup(Talkgroup {
            id: TalkgroupId::new(10),
            name: "Test".to_string(),
            description: String::new(),
            admins: vec![],
            ncos: vec![],
        });

        let mut rx = registrations.register("mmdvm", ServerRole::Repeater, false, crate::bus::SUBSCRIBER_QUEUE_CAPACITY);
        h.subscriptions
            .activate(RepeaterId::new(100_001), "mmdvm")
            .await;
        h.subscriptions
            .activate(RepeaterId::new(100_002), "mmdvm")
            .await;
        tokio::task::yield_now().await;

        h.hub
            .route_packet(voice_packet(1_000_001, 10, 100_001, false, 1), "mmdvm")
            .await;

        let (repeater, delivered) = recv_with_timeout(&mut rx).await.expect("one delivery");
        assert_eq!(repeater.get(), 100_002);
        assert_eq!(delivered.dst, 10);
        assert!(!delivered.slot);
        assert!(rx.try_recv().is_err(), "100001 must not also receive it");
    }

    #[tokio::test]
    async fn scenario_3_dynamic_tg_learn_then_self_echo_suppressed() {
        let (h, registrations) = Harness::new();
        h.store
            .seed_repeater(sample_repeater(100_001, 1_000_001, vec![], None));
        h.store
            .seed_repeater(sample_repeater(100_002, 1_000_001, vec![], None));
        h.store.seed_talkgroup(Talkgroup {
            id: TalkgroupId::new(7),
            name: "Test".to_string(),
            description: String::new(),
            admins: vec![],
            ncos: vec![],
        });

        let mut rx = registrations.register("mmdvm", ServerRole::Repeater, false, crate::bus::SUBSCRIBER_QUEUE_CAPACITY);
        h.subscriptions
            .activate(RepeaterId::new(100_001), "mmdvm")
            .await;

        h.hub
            .route_packet(voice_packet(1_000_001, 7, 100_001, false, 2), "mmdvm")
            .await;

        let learned = h
            .store
            .get_repeater(RepeaterId::new(100_001))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(learned.ts1_dynamic, Some(TalkgroupId::new(7)));

        h.hub
            .route_packet(voice_packet(1_000_001, 7, 100_001, false, 3), "mmdvm")
            .await;
        assert!(
            rx.try_recv().is_err(),
            "repeater must not receive its own transmission back"
        );
    }

    #[tokio::test]
    async fn scenario_4_unlink_clears_dynamic_tg_and_cancels_subscription() {
        let (h, registrations) = Harness::new();
        h.store
            .seed_repeater(sample_repeater(100_001, 1_000_001, vec![], Some(5)));
        h.store
            .seed_repeater(sample_repeater(100_002, 1_000_001, vec![5], None));
        h.store.seed_talkgroup(Talkgroup {
            id: TalkgroupId::new(5),
            name: "Test".to_string(),
            description: String::new(),
            admins: vec![],
            ncos: vec![],
        });

        let mut rx = registrations.register("mmdvm", ServerRole::Repeater, false, crate::bus::SUBSCRIBER_QUEUE_CAPACITY);
        h.subscriptions
            .activate(RepeaterId::new(100_001), "mmdvm")
            .await;
        h.subscriptions
            .activate(RepeaterId::new(100_002), "mmdvm")
            .await;
        tokio::task::yield_now().await;

        let mut unlink = voice_packet(1_000_001, 4000, 100_001, true, 4);
        unlink.frame_type = FrameType::DataSync;
        unlink.dtype_or_vseq = 2; // VoiceTerm
        unlink.group_call = false;
        h.hub.route_packet(unlink, "mmdvm").await;

        let after = h
            .store
            .get_repeater(RepeaterId::new(100_001))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.ts2_dynamic, None);

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        // Repeater 100001's subscription to TG 5 is gone; only 100002
        // (statically subscribed) should see a subsequent packet.
        h.hub
            .route_packet(voice_packet(2_000_002, 5, 100_099, false, 5), "mmdvm")
            .await;
        let (repeater, _) = recv_with_timeout(&mut rx).await.expect("one delivery");
        assert_eq!(repeater.get(), 100_002);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn scenario_6_saturated_channel_never_blocks_and_stop_is_immediate() {
        let (h, registrations) = Harness::new();
        h.store
            .seed_repeater(sample_repeater(100_001, 1_000_001, vec![77], None));
        h.store.seed_talkgroup(Talkgroup {
            id: TalkgroupId::new(77),
            name: "Test".to_string(),
            description: String::new(),
            admins: vec![],
            ncos: vec![],
        });

        let _rx = registrations.register("mmdvm", ServerRole::Repeater, false, crate::bus::SUBSCRIBER_QUEUE_CAPACITY);
        h.subscriptions
            .activate(RepeaterId::new(100_001), "mmdvm")
            .await;
        tokio::task::yield_now().await;

        let routed = tokio::time::timeout(Duration::from_secs(5), async {
            for i in 0..600u32 {
                h.hub
                    .route_packet(voice_packet(1_000_001, 77, 100_099, false, i), "mmdvm")
                    .await;
            }
        })
        .await;
        assert!(routed.is_ok(), "routing must not block on a full channel");

        let stopped = tokio::time::timeout(Duration::from_secs(5), async {
            h.subscriptions.stop_all();
        })
        .await;
        assert!(stopped.is_ok(), "stop_all must return promptly");
    }
}
