//! The authoritative side of a connection.
//!
//! An [`Authority`] owns the real simulation. Each tick it resolves an
//! input record for every input-taking entity (received, or produced by
//! the missing-input policy), steps the world, captures the canonical
//! snapshot, and publishes a per-peer delta against the newest snapshot
//! each peer has confirmed holding.
//!
//! Snapshots travel as datagrams while they fit. One that exceeds the
//! transport's ceiling is re-encoded against the zero baseline and sent
//! on the reliable channel instead, flagged so the receiver answers
//! with an explicit ack.

use std::collections::BTreeMap;

use backstep_codec::{
    capture_tick, DeltaSnapshotMessage, DeltaStrategy, InputMessage, Message, PayloadWriter,
    ValueZeroRle, WorldSnapshot,
};
use backstep_core::{EntityBehavior, EntityId, EntityLayout, PeerId, RingHistory, Tick, World};
use indexmap::IndexMap;

use crate::clock::TickClock;
use crate::config::ClockConfig;
use crate::error::{Error, Result};
use crate::event::SyncEvent;
use crate::peer::PeerState;
use crate::policy::{InputPolicy, RepeatLast};
use crate::transport::Transport;

/// Authoritative world driver.
pub struct Authority<T: Transport> {
    world: World,
    clock: TickClock,
    snapshots: RingHistory<WorldSnapshot>,
    peers: IndexMap<PeerId, PeerState>,
    /// Which peer supplies input for which entity.
    control: IndexMap<EntityId, PeerId>,
    strategy: Box<dyn DeltaStrategy>,
    policy: Box<dyn InputPolicy>,
    transport: T,
    time_scale: f32,
    events: Vec<SyncEvent>,
}

impl<T: Transport> Authority<T> {
    pub fn new(world: World, config: ClockConfig, transport: T) -> Self {
        let capacity = world.history_len();
        Self {
            world,
            clock: TickClock::new(config),
            snapshots: RingHistory::new(capacity),
            peers: IndexMap::new(),
            control: IndexMap::new(),
            strategy: Box::new(ValueZeroRle),
            policy: Box::new(RepeatLast),
            transport,
            time_scale: 1.0,
            events: Vec::new(),
        }
    }

    /// Last completed tick.
    pub fn tick(&self) -> Tick {
        self.clock.tick()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn peer(&self, peer: PeerId) -> Option<&PeerState> {
        self.peers.get(&peer)
    }

    /// Replaces the delta strategy; both sides must agree on it.
    pub fn set_strategy(&mut self, strategy: Box<dyn DeltaStrategy>) {
        self.strategy = strategy;
    }

    pub fn set_policy(&mut self, policy: Box<dyn InputPolicy>) {
        self.policy = policy;
    }

    /// Rate multiplier for the whole session, clamped to 0.25..=4.
    /// Applied to the local clock and broadcast to every peer.
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.clamp(0.25, 4.0);
        self.clock.set_time_scale(f64::from(self.time_scale));
    }

    pub fn register_entity(
        &mut self,
        id: EntityId,
        layout: EntityLayout,
        behavior: Box<dyn EntityBehavior>,
    ) -> Result<()> {
        self.world.register(id, layout, behavior)?;
        Ok(())
    }

    /// Removes an entity, revoking any control assignment first.
    pub fn deregister_entity(&mut self, id: EntityId) -> Result<()> {
        if self.control.shift_remove(&id).is_some() {
            for state in self.peers.values_mut() {
                state.revoke_control(id);
            }
        }
        self.world.deregister(id)?;
        Ok(())
    }

    pub fn connect_peer(&mut self, peer: PeerId) -> Result<()> {
        if self.peers.contains_key(&peer) {
            return Err(Error::PeerExists(peer));
        }
        self.peers.insert(peer, PeerState::new());
        log::info!("{peer} connected");
        Ok(())
    }

    pub fn disconnect_peer(&mut self, peer: PeerId) -> Result<()> {
        if self.peers.shift_remove(&peer).is_none() {
            return Err(Error::UnknownPeer(peer));
        }
        self.control.retain(|_, owner| *owner != peer);
        log::info!("{peer} disconnected");
        Ok(())
    }

    /// Lets `peer` supply input for `entity`.
    pub fn assign_control(&mut self, peer: PeerId, entity: EntityId) -> Result<()> {
        if !self.peers.contains_key(&peer) {
            return Err(Error::UnknownPeer(peer));
        }
        if self.world.input_len(entity)? == 0 {
            return Err(Error::PassiveEntity(entity));
        }
        if self.control.contains_key(&entity) {
            return Err(Error::AlreadyControlled(entity));
        }
        self.control.insert(entity, peer);
        let capacity = self.world.history_len();
        if let Some(state) = self.peers.get_mut(&peer) {
            state.grant_control(entity, capacity);
        }
        Ok(())
    }

    pub fn revoke_control(&mut self, entity: EntityId) -> Result<()> {
        let Some(owner) = self.control.shift_remove(&entity) else {
            return Err(Error::NotControlled(entity));
        };
        if let Some(state) = self.peers.get_mut(&owner) {
            state.revoke_control(entity);
        }
        Ok(())
    }

    /// Feeds one received payload from `peer` in.
    pub fn handle_message(&mut self, peer: PeerId, bytes: &[u8]) -> Result<()> {
        match Message::decode(bytes, &self.world)? {
            Message::Input(message) => self.handle_input(peer, message),
            Message::FragmentedAck(ack) => {
                let state = self.peers.get_mut(&peer).ok_or(Error::UnknownPeer(peer))?;
                state.fragment_acknowledged(ack.tick);
                Ok(())
            }
            Message::DeltaSnapshot(_) => {
                log::warn!("ignoring a snapshot sent by {peer}; only the authority sends them");
                Ok(())
            }
        }
    }

    /// Transport-level delivery confirmation for the snapshot of `tick`.
    ///
    /// Call this when the transport reports the datagram carrying that
    /// snapshot as received; it becomes the peer's delta baseline.
    pub fn acknowledge_snapshot(&mut self, peer: PeerId, tick: Tick) -> Result<()> {
        let state = self.peers.get_mut(&peer).ok_or(Error::UnknownPeer(peer))?;
        state.acknowledge(tick);
        Ok(())
    }

    fn handle_input(&mut self, peer: PeerId, mut message: InputMessage) -> Result<()> {
        if !self.peers.contains_key(&peer) {
            return Err(Error::UnknownPeer(peer));
        }
        let control = &self.control;
        message.entities.retain(|entry| {
            let owned = control.get(&entry.entity) == Some(&peer);
            if !owned {
                log::warn!("{peer} sent input for {} without controlling it", entry.entity);
            }
            owned
        });

        let next_tick = self.clock.tick() + 1;
        if let Some(state) = self.peers.get_mut(&peer) {
            state.accept_message(&message, next_tick);
        }
        Ok(())
    }

    /// Feeds elapsed wall-clock seconds in, simulating every tick that
    /// falls due and publishing its snapshot. Returns the sync events
    /// produced along the way.
    pub fn advance(&mut self, elapsed: f64) -> Result<Vec<SyncEvent>> {
        let mut due = Vec::new();
        self.clock.advance(elapsed, |tick| {
            due.push(tick);
            Ok(())
        })?;
        for tick in due {
            self.run_tick(tick)?;
        }
        Ok(std::mem::take(&mut self.events))
    }

    fn run_tick(&mut self, tick: Tick) -> Result<()> {
        let dt = self.clock.config().fixed_dt();

        // resolve an effective input for every input-taking entity
        let takers: Vec<(EntityId, usize)> = self
            .world
            .ids()
            .filter_map(|id| match self.world.input_len(id) {
                Ok(len) if len > 0 => Some((id, len)),
                _ => None,
            })
            .collect();
        let mut resolved: BTreeMap<EntityId, (Vec<u8>, Vec<u8>)> = BTreeMap::new();
        for (entity, record_len) in takers {
            let pair = match self.control.get(&entity) {
                Some(&owner) => {
                    let state = self.peers.get_mut(&owner).ok_or(Error::UnknownPeer(owner))?;
                    let current = match state.input_for(entity, tick) {
                        Some(record) => record.clone(),
                        None => {
                            let previous = state.newest_input_at_or_before(entity, tick - 1);
                            let stand_in = self.policy.missing_input(previous, record_len);
                            state.store_input(entity, tick, stand_in.clone());
                            stand_in
                        }
                    };
                    let previous = state
                        .input_for(entity, tick - 1)
                        .cloned()
                        .unwrap_or_else(|| vec![0; record_len]);
                    (current, previous)
                }
                None => (vec![0; record_len], vec![0; record_len]),
            };
            resolved.insert(entity, pair);
        }

        self.world
            .step_tick(tick, dt, |id| resolved.get(&id).cloned().unwrap_or_default())?;

        let snapshot = capture_tick(&self.world, tick)?;
        let peers: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer in peers {
            self.publish_to(peer, tick, &snapshot)?;
        }
        self.snapshots.set(tick, snapshot);
        Ok(())
    }

    fn publish_to(&mut self, peer: PeerId, tick: Tick, current: &WorldSnapshot) -> Result<()> {
        let capacity = self.snapshots.capacity();
        let time_scale = self.broadcast_time_scale();
        let state = self.peers.get_mut(&peer).ok_or(Error::UnknownPeer(peer))?;
        if !state.ready() {
            return Ok(());
        }
        if state.invalidate_stale_baseline(tick, capacity) {
            self.events.push(SyncEvent::FullResend { peer, tick });
        }

        let mut baseline_tick = state.last_acked_tick();
        let mut baseline_words: Option<&[u32]> = None;
        if let Some(acked) = baseline_tick {
            match self.snapshots.get(acked) {
                Ok(held) if held.words.len() == current.words.len() => {
                    baseline_words = Some(&held.words);
                }
                // evicted mid-window, or the entity set changed size
                _ => {
                    state.reset_baseline();
                    baseline_tick = None;
                    self.events.push(SyncEvent::FullResend { peer, tick });
                }
            }
        }

        let mut writer = PayloadWriter::new();
        self.strategy
            .encode(baseline_words, &current.words, &mut writer)?;
        let message = DeltaSnapshotMessage {
            tick,
            baseline_tick,
            time_scale,
            echoed_client_time: state.client_time(),
            word_count: current.words.len() as u32,
            fragmented: false,
            payload: writer.into_bytes(),
        };
        let bytes = Message::DeltaSnapshot(message).encode()?;
        if bytes.len() <= self.transport.max_unreliable_payload() {
            self.transport
                .send_unreliable(peer, &bytes)
                .map_err(|error| Error::Transport(error.to_string()))?;
            return Ok(());
        }

        // over the datagram ceiling: full image on the reliable channel
        let mut writer = PayloadWriter::new();
        self.strategy.encode(None, &current.words, &mut writer)?;
        let message = DeltaSnapshotMessage {
            tick,
            baseline_tick: None,
            time_scale,
            echoed_client_time: state.client_time(),
            word_count: current.words.len() as u32,
            fragmented: true,
            payload: writer.into_bytes(),
        };
        let bytes = Message::DeltaSnapshot(message).encode()?;
        self.transport
            .send_reliable(peer, &bytes)
            .map_err(|error| Error::Transport(error.to_string()))?;
        state.push_pending_fragment(tick);
        self.events.push(SyncEvent::Fragmented {
            peer,
            tick,
            bytes: bytes.len(),
        });
        Ok(())
    }

    fn broadcast_time_scale(&self) -> Option<f32> {
        if self.time_scale == 1.0 {
            None
        } else {
            Some(self.time_scale)
        }
    }
}
