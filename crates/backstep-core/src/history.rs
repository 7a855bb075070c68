//! Tick-tagged ring history
//!
//! A bounded history keyed directly by tick: slot `tick mod capacity`
//! holds the value for that tick, and each slot remembers which tick it
//! was written for, so a wrapped-over slot is reported as missing
//! instead of returning data from `capacity` ticks ago.

use crate::error::{Error, Result};
use crate::tick::{slot_for, Tick};

/// Ring buffer of per-tick values
///
/// Writing tick `t` implicitly evicts tick `t - capacity`. The buffer
/// imposes no ordering on writes; readers asking for a tick that was
/// never stored, or that has been evicted, get an error.
///
/// # Example
///
/// ```rust
/// use backstep_core::RingHistory;
///
/// let mut history: RingHistory<u32> = RingHistory::new(64);
/// history.set(10, 500);
/// assert_eq!(*history.get(10).unwrap(), 500);
/// assert!(history.get(11).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RingHistory<T> {
    slots: Vec<Option<(Tick, T)>>,
    count: usize,
}

impl<T> RingHistory<T> {
    /// Create a history holding `capacity` consecutive ticks
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn index(&self, tick: Tick) -> usize {
        slot_for(tick, self.slots.len())
    }

    /// Store a value for `tick`, evicting whatever occupied its slot
    pub fn set(&mut self, tick: Tick, value: T) {
        let index = self.index(tick);
        if self.slots[index].is_none() {
            self.count += 1;
        }
        self.slots[index] = Some((tick, value));
    }

    /// Value stored for exactly `tick`
    pub fn get(&self, tick: Tick) -> Result<&T> {
        match &self.slots[self.index(tick)] {
            Some((stored, value)) if *stored == tick => Ok(value),
            _ => Err(Error::TickNotStored(tick)),
        }
    }

    /// Mutable value stored for exactly `tick`
    pub fn get_mut(&mut self, tick: Tick) -> Result<&mut T> {
        let index = self.index(tick);
        match &mut self.slots[index] {
            Some((stored, value)) if *stored == tick => Ok(value),
            _ => Err(Error::TickNotStored(tick)),
        }
    }

    /// Whether a value is stored for exactly `tick`
    pub fn is_set(&self, tick: Tick) -> bool {
        matches!(&self.slots[self.index(tick)], Some((stored, _)) if *stored == tick)
    }

    /// Drop the value stored for exactly `tick`, if any
    pub fn clear(&mut self, tick: Tick) {
        let index = self.index(tick);
        if matches!(&self.slots[index], Some((stored, _)) if *stored == tick) {
            self.slots[index] = None;
            self.count -= 1;
        }
    }

    /// Drop every stored value
    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.count = 0;
    }

    /// Highest tick currently stored
    pub fn newest_tick(&self) -> Option<Tick> {
        self.slots.iter().flatten().map(|(t, _)| *t).max()
    }

    /// Newest stored value at or before `tick`
    pub fn nearest_at_or_before(&self, tick: Tick) -> Option<(Tick, &T)> {
        self.slots
            .iter()
            .flatten()
            .filter(|(t, _)| *t <= tick)
            .max_by_key(|(t, _)| *t)
            .map(|(t, v)| (*t, v))
    }

    /// Lowest tick currently stored
    pub fn oldest_tick(&self) -> Option<Tick> {
        self.slots.iter().flatten().map(|(t, _)| *t).min()
    }
}

impl<T: Clone + Default> RingHistory<T> {
    /// Stored value for `tick`, or `T::default()` when absent
    pub fn get_or_default(&self, tick: Tick) -> T {
        self.get(tick).map(|v| v.clone()).unwrap_or_default()
    }
}
