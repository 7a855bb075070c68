//! Entity registry and per-tick simulation driver
//!
//! A [`World`] owns the arena, one [`StateTimeline`] per entity, and the
//! behavior object that animates each entity. It drives one fixed tick
//! at a time: seed every entity's record from the previous tick, fold
//! inputs in, step the entity, then step the shared environment hooks.
//!
//! Two orders matter and they are different:
//! - canonical order (ascending id) is the snapshot wire order
//! - simulation order (ascending order key, ties by id) is the order
//!   entities step within a tick

use crate::arena::{round_to_word, StateArena, WORD_SIZE};
use crate::error::{Error, Result};
use crate::identity::EntityId;
use crate::tick::Tick;
use crate::timeline::StateTimeline;
use std::collections::BTreeMap;

/// Per-entity simulation callbacks
///
/// Registered once per entity. Every method has a no-op default so
/// passive entities implement only what they need. State and input
/// records are raw little-endian bytes; the behavior owns their layout.
pub trait EntityBehavior {
    /// Fold the current and previous input records into the state
    fn apply_inputs(&mut self, _state: &mut [u8], _current: &[u8], _previous: &[u8]) {}

    /// Advance the state by one fixed timestep
    fn simulate(&mut self, _state: &mut [u8], _dt: f64) {}

    /// Sample fresh local input into `out` (predicting side only)
    fn collect_input(&mut self, _out: &mut [u8]) {}

    /// The stored state was replaced from outside the simulation step
    fn after_state_changed(&mut self, _state: &[u8]) {}

    /// A resimulation finished; `before` is the displaced prediction
    /// and `after` the replayed result for the same tick
    fn resimulation_transition(&mut self, _before: &[u8], _after: &[u8]) {}
}

/// Shared environment stepped once per tick, after every entity
pub trait WorldHooks {
    fn simulate(&mut self, dt: f64);
}

/// Hooks that do nothing
#[derive(Debug, Default)]
pub struct NoHooks;

impl WorldHooks for NoHooks {
    fn simulate(&mut self, _dt: f64) {}
}

/// Sizes and ordering for a registered entity
#[derive(Debug, Clone, Copy)]
pub struct EntityLayout {
    /// State record size in bytes; rounded up to whole words
    pub state_bytes: usize,
    /// Input record size in bytes; zero means the entity takes no input
    pub input_bytes: usize,
    /// Simulation order; lower keys step first, ties break by id
    pub order_key: i32,
}

struct EntityEntry {
    behavior: Box<dyn EntityBehavior>,
    timeline: StateTimeline,
    input_len: usize,
    order_key: i32,
}

/// The set of simulated entities and their state histories
pub struct World {
    arena: StateArena,
    entities: BTreeMap<EntityId, EntityEntry>,
    sim_order: Vec<EntityId>,
    hooks: Box<dyn WorldHooks>,
    history_len: usize,
}

impl World {
    /// Create a world whose entity timelines keep `history_len` ticks
    pub fn new(history_len: usize) -> Self {
        assert!(history_len > 0, "history_len must be greater than 0");
        Self {
            arena: StateArena::new(),
            entities: BTreeMap::new(),
            sim_order: Vec::new(),
            hooks: Box::new(NoHooks),
            history_len,
        }
    }

    /// Ticks of history every entity timeline keeps
    pub fn history_len(&self) -> usize {
        self.history_len
    }

    /// Replace the environment hooks
    pub fn set_hooks(&mut self, hooks: Box<dyn WorldHooks>) {
        self.hooks = hooks;
    }

    /// Read-only view of the backing arena
    pub fn arena(&self) -> &StateArena {
        &self.arena
    }

    /// Register an entity under a caller-assigned, nonzero id
    pub fn register(
        &mut self,
        id: EntityId,
        layout: EntityLayout,
        behavior: Box<dyn EntityBehavior>,
    ) -> Result<()> {
        if id.raw() == 0 {
            return Err(Error::NullEntityId);
        }
        if self.entities.contains_key(&id) {
            return Err(Error::EntityExists(id));
        }
        if layout.input_bytes != 0 && layout.input_bytes % WORD_SIZE != 0 {
            log::warn!(
                "input record for {} is {} bytes; rounding to {}",
                id,
                layout.input_bytes,
                round_to_word(layout.input_bytes)
            );
        }
        let timeline =
            StateTimeline::new(&mut self.arena, id, layout.state_bytes, self.history_len)?;
        self.entities.insert(
            id,
            EntityEntry {
                behavior,
                timeline,
                input_len: round_to_word(layout.input_bytes),
                order_key: layout.order_key,
            },
        );
        self.rebuild_sim_order();
        Ok(())
    }

    /// Remove an entity and release its state block
    pub fn deregister(&mut self, id: EntityId) -> Result<()> {
        if self.entities.remove(&id).is_none() {
            return Err(Error::EntityNotFound(id));
        }
        self.arena.release(id)?;
        self.rebuild_sim_order();
        Ok(())
    }

    fn rebuild_sim_order(&mut self) {
        let mut order: Vec<EntityId> = self.entities.keys().copied().collect();
        order.sort_by_key(|id| (self.entities[id].order_key, id.raw()));
        self.sim_order = order;
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity ids in canonical (ascending id) order
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    /// Entity ids in simulation order
    pub fn sim_order(&self) -> &[EntityId] {
        &self.sim_order
    }

    fn entry(&self, id: EntityId) -> Result<&EntityEntry> {
        self.entities.get(&id).ok_or(Error::EntityNotFound(id))
    }

    fn entry_mut(&mut self, id: EntityId) -> Result<&mut EntityEntry> {
        self.entities.get_mut(&id).ok_or(Error::EntityNotFound(id))
    }

    /// Word-rounded state record size for an entity
    pub fn state_len(&self, id: EntityId) -> Result<usize> {
        Ok(self.entry(id)?.timeline.record_len())
    }

    /// Word-rounded input record size; zero for passive entities
    pub fn input_len(&self, id: EntityId) -> Result<usize> {
        Ok(self.entry(id)?.input_len)
    }

    /// Whether the entity consumes input records
    pub fn has_input(&self, id: EntityId) -> Result<bool> {
        Ok(self.entry(id)?.input_len > 0)
    }

    /// State record stored for `id` at exactly `tick`
    pub fn state(&self, id: EntityId, tick: Tick) -> Result<&[u8]> {
        self.entry(id)?.timeline.get(&self.arena, tick)
    }

    /// Whether a record exists for `id` at exactly `tick`
    pub fn has_state(&self, id: EntityId, tick: Tick) -> Result<bool> {
        Ok(self.entry(id)?.timeline.is_set(tick))
    }

    /// Overwrite the state record for `id` at `tick`
    pub fn write_state(&mut self, id: EntityId, tick: Tick, record: &[u8]) -> Result<()> {
        let World { arena, entities, .. } = self;
        let entry = entities.get_mut(&id).ok_or(Error::EntityNotFound(id))?;
        entry.timeline.write(arena, tick, record)
    }

    /// Sample a fresh input record from the entity's behavior
    pub fn collect_input(&mut self, id: EntityId, out: &mut [u8]) -> Result<()> {
        let entry = self.entry_mut(id)?;
        if out.len() != entry.input_len {
            return Err(Error::RecordSizeMismatch {
                expected: entry.input_len,
                got: out.len(),
            });
        }
        entry.behavior.collect_input(out);
        Ok(())
    }

    /// Tell a behavior its stored state was replaced from outside
    pub fn notify_state_changed(&mut self, id: EntityId, tick: Tick) -> Result<()> {
        let World { arena, entities, .. } = self;
        let entry = entities.get_mut(&id).ok_or(Error::EntityNotFound(id))?;
        let state = entry.timeline.get(arena, tick)?;
        entry.behavior.after_state_changed(state);
        Ok(())
    }

    /// Run the blend hook after a resimulation
    pub fn notify_transition(&mut self, id: EntityId, before: &[u8], after: &[u8]) -> Result<()> {
        self.entry_mut(id)?
            .behavior
            .resimulation_transition(before, after);
        Ok(())
    }

    /// Step every entity through `tick`, then the environment hooks
    ///
    /// `inputs` supplies the (current, previous) input records for each
    /// input-capable entity; it is not consulted for passive entities.
    /// Each entity's record for `tick` starts as a copy of its record
    /// at `tick - 1`, which must still be in the timeline.
    pub fn step_tick<F>(&mut self, tick: Tick, dt: f64, mut inputs: F) -> Result<()>
    where
        F: FnMut(EntityId) -> (Vec<u8>, Vec<u8>),
    {
        let World {
            arena,
            entities,
            sim_order,
            hooks,
            ..
        } = self;
        for id in sim_order.iter().copied() {
            let entry = entities.get_mut(&id).ok_or(Error::EntityNotFound(id))?;
            entry.timeline.copy_forward(arena, tick - 1, tick)?;
            if entry.input_len > 0 {
                let (current, previous) = inputs(id);
                if current.len() != entry.input_len || previous.len() != entry.input_len {
                    return Err(Error::RecordSizeMismatch {
                        expected: entry.input_len,
                        got: current.len(),
                    });
                }
                let state = entry.timeline.get_mut(arena, tick)?;
                entry.behavior.apply_inputs(state, &current, &previous);
            }
            let state = entry.timeline.get_mut(arena, tick)?;
            entry.behavior.simulate(state, dt);
        }
        hooks.simulate(dt);
        Ok(())
    }

    /// Re-base every entity's record at `from` onto `to`
    ///
    /// Used after a clock jump so the next [`step_tick`](World::step_tick)
    /// at `to + 1` finds its predecessor record.
    pub fn reseed(&mut self, from: Tick, to: Tick) -> Result<()> {
        let World { arena, entities, .. } = self;
        for entry in entities.values_mut() {
            entry.timeline.copy_forward(arena, from, to)?;
        }
        Ok(())
    }
}
