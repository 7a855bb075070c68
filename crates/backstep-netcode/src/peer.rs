//! Per-peer connection state on the authority.
//!
//! One [`PeerState`] tracks everything the authority knows about a
//! connected peer: which entities it controls, the input windows it has
//! sent, the newest snapshot it confirmed (the delta baseline), and the
//! send-time echo for its round-trip estimate.

use backstep_codec::InputMessage;
use backstep_core::{EntityId, RingHistory, Tick};
use indexmap::IndexMap;

#[derive(Debug)]
pub struct PeerState {
    /// Newest snapshot tick the peer confirmed receiving.
    last_acked_tick: Option<Tick>,
    /// Newest input message tick seen from this peer.
    last_input_tick: Option<Tick>,
    /// Peer asked for state updates.
    ready: bool,
    /// Newest send time from the peer, echoed back in snapshots.
    client_time: f64,
    /// Received input records per controlled entity.
    inputs: IndexMap<EntityId, RingHistory<Vec<u8>>>,
    /// Reliable-path snapshot ticks awaiting a fragment ack.
    pending_fragments: Vec<Tick>,
}

impl PeerState {
    pub(crate) fn new() -> Self {
        Self {
            last_acked_tick: None,
            last_input_tick: None,
            ready: false,
            client_time: 0.0,
            inputs: IndexMap::new(),
            pending_fragments: Vec::new(),
        }
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn last_acked_tick(&self) -> Option<Tick> {
        self.last_acked_tick
    }

    pub fn last_input_tick(&self) -> Option<Tick> {
        self.last_input_tick
    }

    pub fn client_time(&self) -> f64 {
        self.client_time
    }

    pub fn controls(&self, entity: EntityId) -> bool {
        self.inputs.contains_key(&entity)
    }

    pub(crate) fn grant_control(&mut self, entity: EntityId, capacity: usize) {
        self.inputs.insert(entity, RingHistory::new(capacity));
    }

    pub(crate) fn revoke_control(&mut self, entity: EntityId) {
        self.inputs.shift_remove(&entity);
    }

    /// Admits the usable part of an input batch into the per-entity
    /// rings and returns how many records were stored.
    ///
    /// Admission is monotonic per peer: ticks at or below the newest
    /// message tick already seen are duplicates from the redundancy
    /// window and are skipped silently. Ticks the simulation has passed
    /// are skipped as late.
    pub(crate) fn accept_message(&mut self, message: &InputMessage, current_tick: Tick) -> usize {
        self.ready = message.ready;
        if message.client_time > self.client_time {
            self.client_time = message.client_time;
        }

        let floor = self.last_input_tick;
        let mut accepted = 0;
        for entry in &message.entities {
            let Some(ring) = self.inputs.get_mut(&entry.entity) else {
                continue;
            };
            for (offset, record) in entry.records.iter().enumerate() {
                let tick = message.tick - offset as Tick;
                if floor.map_or(false, |newest| tick <= newest) {
                    continue;
                }
                if tick < current_tick {
                    if floor.is_some() {
                        log::debug!(
                            "late input for {} at tick {} while simulating {}",
                            entry.entity,
                            tick,
                            current_tick
                        );
                    }
                    continue;
                }
                ring.set(tick, record.clone());
                accepted += 1;
            }
        }

        if self.last_input_tick.map_or(true, |newest| message.tick > newest) {
            self.last_input_tick = Some(message.tick);
        }
        accepted
    }

    /// Received record for `entity` at exactly `tick`.
    pub(crate) fn input_for(&self, entity: EntityId, tick: Tick) -> Option<&Vec<u8>> {
        self.inputs.get(&entity).and_then(|ring| ring.get(tick).ok())
    }

    /// Newest record for `entity` at or before `tick`.
    pub(crate) fn newest_input_at_or_before(&self, entity: EntityId, tick: Tick) -> Option<&[u8]> {
        self.inputs
            .get(&entity)
            .and_then(|ring| ring.nearest_at_or_before(tick))
            .map(|(_, record)| record.as_slice())
    }

    /// Stores a policy-produced record so later ticks see it as the
    /// previous input.
    pub(crate) fn store_input(&mut self, entity: EntityId, tick: Tick, record: Vec<u8>) {
        if let Some(ring) = self.inputs.get_mut(&entity) {
            ring.set(tick, record);
        }
    }

    /// Marks `tick` as the newest snapshot the peer holds.
    pub(crate) fn acknowledge(&mut self, tick: Tick) {
        if self.last_acked_tick.map_or(true, |newest| tick > newest) {
            self.last_acked_tick = Some(tick);
        }
    }

    pub(crate) fn reset_baseline(&mut self) {
        self.last_acked_tick = None;
    }

    /// Drops the baseline once it falls out of the snapshot ring.
    /// Returns whether a usable baseline was lost.
    pub(crate) fn invalidate_stale_baseline(&mut self, current_tick: Tick, capacity: usize) -> bool {
        if let Some(acked) = self.last_acked_tick {
            if current_tick - acked >= capacity as Tick {
                self.last_acked_tick = None;
                return true;
            }
        }
        false
    }

    pub(crate) fn push_pending_fragment(&mut self, tick: Tick) {
        self.pending_fragments.push(tick);
    }

    pub fn pending_fragments(&self) -> &[Tick] {
        &self.pending_fragments
    }

    /// Handles a fragment ack: the reliable channel is ordered, so the
    /// acked tick and everything pending before it are confirmed.
    pub(crate) fn fragment_acknowledged(&mut self, tick: Tick) {
        self.pending_fragments.retain(|&pending| pending > tick);
        self.acknowledge(tick);
    }
}
