//! Subscription manager (component H). For each connected repeater,
//! keeps exactly one live subscriber task per relevant topic: its own
//! repeater-private topic, plus one per currently-assigned talkgroup
//! (static or dynamic). Activation/deactivation is idempotent via a
//! per-repeater map from subscribed key to cancel handle.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dmr_ids::{RepeaterId, TalkgroupId};
use dmr_proto::Packet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{Bus, Topic, SUBSCRIBER_QUEUE_CAPACITY};
use crate::registration::RegistrationTable;
use dmr_store::Store;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum SubKey {
    RepeaterPrivate,
    Talkgroup(TalkgroupId),
}

struct Subscription {
    cancel: CancellationToken,
}

pub struct SubscriptionManager {
    bus: Arc<Bus>,
    store: Arc<dyn Store>,
    registrations: Arc<RegistrationTable>,
    shutdown: CancellationToken,
    channel_capacity: usize,
    // One map per repeater; guarded at the entry level so unrelated
    // repeaters never contend on the same lock.
    per_repeater: DashMap<u32, HashMap<SubKey, Subscription>>,
}

impl SubscriptionManager {
    pub fn new(
        bus: Arc<Bus>,
        store: Arc<dyn Store>,
        registrations: Arc<RegistrationTable>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::with_channel_capacity(bus, store, registrations, shutdown, SUBSCRIBER_QUEUE_CAPACITY)
    }

    /// As `new`, but with an explicit per-subscriber channel capacity
    /// (§5/§6 `serverChannelCapacity`) instead of the default.
    pub fn with_channel_capacity(
        bus: Arc<Bus>,
        store: Arc<dyn Store>,
        registrations: Arc<RegistrationTable>,
        shutdown: CancellationToken,
        channel_capacity: usize,
    ) -> Self {
        Self {
            bus,
            store,
            registrations,
            shutdown,
            channel_capacity,
            per_repeater: DashMap::new(),
        }
    }

    /// `activate(repeaterID)`: ensure subscriptions for the repeater's
    /// own private topic plus its full static/dynamic talkgroup set.
    pub async fn activate(self: &Arc<Self>, id: RepeaterId, dialect: &str) {
        let Ok(Some(repeater)) = self.store.get_repeater(id).await else {
            warn!(repeater = id.get(), "activate on unknown repeater");
            return;
        };

        self.ensure(id, SubKey::RepeaterPrivate, dialect.to_string());
        for tg in repeater.subscribed_talkgroups() {
            self.ensure(id, SubKey::Talkgroup(tg), dialect.to_string());
        }
    }

    /// `deactivate(repeaterID)`: force-cancel every subscription for
    /// this id without consulting the store. Used on disconnect and
    /// shutdown.
    pub fn deactivate(&self, id: RepeaterId) {
        if let Some((_, subs)) = self.per_repeater.remove(&id.get()) {
            for (_, sub) in subs {
                sub.cancel.cancel();
            }
        }
    }

    /// `reload(repeaterID)`: deactivate then activate, but only if the
    /// repeater already had subscriptions — a non-connected repeater
    /// must not gain subscriptions as a side effect of an admin edit.
    pub async fn reload(self: &Arc<Self>, id: RepeaterId, dialect: &str) {
        let was_active = self.per_repeater.contains_key(&id.get());
        self.deactivate(id);
        if was_active {
            self.activate(id, dialect).await;
        }
    }

    /// `subscribe(repeaterID, tg)`: incremental add used by dynamic
    /// talkgroup learning. Idempotent.
    pub fn subscribe(self: &Arc<Self>, id: RepeaterId, tg: TalkgroupId, dialect: &str) {
        self.ensure(id, SubKey::Talkgroup(tg), dialect.to_string());
    }

    /// `unsubscribe(repeaterID, tg, slot)`: remove `tg` unless it is
    /// still needed by the other slot's dynamic TG or either static
    /// list. Caller has already updated the store before calling this.
    pub async fn unsubscribe(&self, id: RepeaterId, tg: TalkgroupId, slot_just_cleared: bool) {
        let still_needed = match self.store.get_repeater(id).await {
            Ok(Some(repeater)) => repeater.still_needs(tg, slot_just_cleared),
            _ => false,
        };
        if still_needed {
            return;
        }
        if let Some(mut subs) = self.per_repeater.get_mut(&id.get()) {
            if let Some(sub) = subs.remove(&SubKey::Talkgroup(tg)) {
                sub.cancel.cancel();
            }
        }
    }

    /// `stopAll()`: deactivate every repeater currently tracked. Takes
    /// a snapshot of keys first since `deactivate` mutates the map.
    pub fn stop_all(&self) {
        let ids: Vec<u32> = self.per_repeater.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.deactivate(RepeaterId::new(id));
        }
    }

    fn ensure(self: &Arc<Self>, id: RepeaterId, key: SubKey, dialect: String) {
        let mut subs = self.per_repeater.entry(id.get()).or_default();
        if subs.contains_key(&key) {
            return;
        }
        let cancel = self.shutdown.child_token();
        subs.insert(key, Subscription { cancel: cancel.clone() });
        drop(subs);

        match key {
            SubKey::RepeaterPrivate => self.spawn_repeater_private(id, dialect, cancel),
            SubKey::Talkgroup(tg) => self.spawn_talkgroup(id, tg, cancel),
        }
    }

    fn spawn_repeater_private(
        self: &Arc<Self>,
        id: RepeaterId,
        dialect: String,
        cancel: CancellationToken,
    ) {
        let bus = Arc::clone(&self.bus);
        let registrations = Arc::clone(&self.registrations);
        let capacity = self.channel_capacity;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let topic = Topic::RepeaterPrivate(id);
            let (_sub_id, mut rx) = bus.subscribe(topic, capacity);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_packet = rx.recv() => {
                        let Some(packet) = maybe_packet else { break };
                        let mut stamped = (*packet).clone();
                        stamped.repeater = id.get();
                        registrations.deliver_to_server(&dialect, id, stamped).await;
                    }
                }
            }
            this.remove_key(id, SubKey::RepeaterPrivate);
            debug!(repeater = id.get(), "repeater-private subscriber exited");
        });
    }

    fn spawn_talkgroup(self: &Arc<Self>, id: RepeaterId, tg: TalkgroupId, cancel: CancellationToken) {
        let bus = Arc::clone(&self.bus);
        let store = Arc::clone(&self.store);
        let registrations = Arc::clone(&self.registrations);
        let capacity = self.channel_capacity;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let topic = Topic::Talkgroup(tg);
            let (_sub_id, mut rx) = bus.subscribe(topic, capacity);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_packet = rx.recv() => {
                        let Some(packet) = maybe_packet else { break };
                        if !Self::deliver_one(&store, &registrations, id, tg, &packet).await {
                            break;
                        }
                    }
                }
            }
            this.remove_key(id, SubKey::Talkgroup(tg));
            debug!(repeater = id.get(), tg = tg.get(), "talkgroup subscriber exited");
        });
    }

    /// Returns `false` when this subscriber should exit (WantRX false:
    /// no longer needed).
    async fn deliver_one(
        store: &Arc<dyn Store>,
        registrations: &Arc<RegistrationTable>,
        id: RepeaterId,
        tg: TalkgroupId,
        packet: &Packet,
    ) -> bool {
        let Ok(Some(repeater)) = store.get_repeater(id).await else {
            return false;
        };

        if packet.repeater == id.get() {
            if repeater.simplex {
                let mut stamped = packet.clone();
                stamped.slot = !stamped.slot;
                stamped.repeater = id.get();
                registrations
                    .deliver_to_server(&repeater.dialect, id, stamped)
                    .await;
            }
            return true;
        }

        match repeater.want_rx(tg, packet.slot) {
            Some(slot) => {
                let mut stamped = packet.clone();
                stamped.repeater = id.get();
                stamped.slot = slot;
                registrations
                    .deliver_to_server(&repeater.dialect, id, stamped)
                    .await;
                true
            }
            None => false,
        }
    }

    fn remove_key(&self, id: RepeaterId, key: SubKey) {
        if let Some(mut subs) = self.per_repeater.get_mut(&id.get()) {
            subs.remove(&key);
        }
    }
}
