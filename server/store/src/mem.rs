//! An in-process `Store` used by hub/router tests, grounded on the
//! teacher's `InMemoryStore` (`parking_lot::RwLock`-guarded maps
//! behind a cheap `Clone` handle).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use dmr_ids::{PeerId, RepeaterId, StreamId, TalkgroupId, UserId};

use crate::error::{StoreError, StoreResult};
use crate::model::{Call, Peer, Repeater, Talkgroup, User};
use crate::repo::Store;

#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    repeaters: HashMap<u32, Repeater>,
    talkgroups: HashMap<u32, Talkgroup>,
    users: HashMap<u32, User>,
    peers: HashMap<u32, Peer>,
    calls: HashMap<u32, Call>,
    last_heard_repeater: HashMap<u32, RepeaterId>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_repeater(&self, repeater: Repeater) {
        self.inner.write().repeaters.insert(repeater.id.get(), repeater);
    }

    pub fn seed_talkgroup(&self, tg: Talkgroup) {
        self.inner.write().talkgroups.insert(tg.id.get(), tg);
    }

    pub fn seed_user(&self, user: User) {
        self.inner.write().users.insert(user.id.get(), user);
    }

    pub fn seed_peer(&self, peer: Peer) {
        self.inner.write().peers.insert(peer.id.get(), peer);
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get_repeater(&self, id: RepeaterId) -> StoreResult<Option<Repeater>> {
        Ok(self.inner.read().repeaters.get(&id.get()).cloned())
    }

    async fn upsert_repeater(&self, repeater: &Repeater) -> StoreResult<()> {
        self.inner
            .write()
            .repeaters
            .insert(repeater.id.get(), repeater.clone());
        Ok(())
    }

    async fn set_dynamic_talkgroup(
        &self,
        id: RepeaterId,
        slot: bool,
        tg: Option<TalkgroupId>,
    ) -> StoreResult<()> {
        let mut guard = self.inner.write();
        let repeater = guard
            .repeaters
            .get_mut(&id.get())
            .ok_or(StoreError::NotFound("repeater"))?;
        if slot {
            repeater.ts2_dynamic = tg;
        } else {
            repeater.ts1_dynamic = tg;
        }
        Ok(())
    }

    async fn touch_last_connected(&self, id: RepeaterId) -> StoreResult<()> {
        let mut guard = self.inner.write();
        let repeater = guard
            .repeaters
            .get_mut(&id.get())
            .ok_or(StoreError::NotFound("repeater"))?;
        repeater.last_connected_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn get_talkgroup(&self, id: TalkgroupId) -> StoreResult<Option<Talkgroup>> {
        Ok(self.inner.read().talkgroups.get(&id.get()).cloned())
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.inner.read().users.get(&id.get()).cloned())
    }

    async fn get_peer(&self, id: PeerId) -> StoreResult<Option<Peer>> {
        Ok(self.inner.read().peers.get(&id.get()).cloned())
    }

    async fn most_recent_repeater_for_user(&self, user: UserId) -> StoreResult<Option<RepeaterId>> {
        Ok(self.inner.read().last_heard_repeater.get(&user.get()).copied())
    }

    async fn find_active_call(
        &self,
        stream_id: StreamId,
        src: UserId,
        dst: u32,
        slot: bool,
        group_call: bool,
    ) -> StoreResult<Option<Call>> {
        Ok(self
            .inner
            .read()
            .calls
            .get(&stream_id.get())
            .filter(|c| c.active && c.matches(stream_id, src, dst, slot, group_call))
            .cloned())
    }

    async fn get_call(&self, stream_id: StreamId) -> StoreResult<Option<Call>> {
        Ok(self.inner.read().calls.get(&stream_id.get()).cloned())
    }

    async fn start_call(&self, call: Call) -> StoreResult<()> {
        let mut guard = self.inner.write();
        guard
            .last_heard_repeater
            .insert(call.src_user_id.get(), call.repeater_id);
        guard.calls.insert(call.stream_id.get(), call);
        Ok(())
    }

    async fn update_call(&self, call: &Call) -> StoreResult<()> {
        self.inner
            .write()
            .calls
            .insert(call.stream_id.get(), call.clone());
        Ok(())
    }

    async fn end_call(&self, stream_id: StreamId) -> StoreResult<Option<Call>> {
        let mut guard = self.inner.write();
        if let Some(call) = guard.calls.get_mut(&stream_id.get()) {
            call.end();
            return Ok(Some(call.clone()));
        }
        Ok(None)
    }
}
