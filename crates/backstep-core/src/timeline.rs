//! Arena-backed per-entity state history

use crate::arena::{round_to_word, StateArena};
use crate::error::{Error, Result};
use crate::identity::{BlockId, EntityId};
use crate::tick::{slot_for, Tick};
use std::ops::Range;

/// Ring of fixed-size state records for one entity, stored in a single
/// arena block
///
/// Slot `tick mod capacity` holds the record simulated for that tick.
/// Slots carry tick tags exactly like [`RingHistory`](crate::RingHistory),
/// so a read for an evicted tick fails instead of returning bytes from
/// an unrelated tick.
#[derive(Debug)]
pub struct StateTimeline {
    block: BlockId,
    record_len: usize,
    tags: Vec<Option<Tick>>,
}

impl StateTimeline {
    /// Allocate a timeline of `capacity` records of `record_len` bytes
    ///
    /// `record_len` is rounded up to a whole number of words. The
    /// backing block comes zeroed from the arena and tick 0 is tagged
    /// as present, so the first simulated tick has a baseline record to
    /// start from.
    pub fn new(
        arena: &mut StateArena,
        owner: EntityId,
        record_len: usize,
        capacity: usize,
    ) -> Result<Self> {
        assert!(capacity > 0, "capacity must be greater than 0");
        if record_len == 0 {
            return Err(Error::ZeroStateSize);
        }
        let rounded = round_to_word(record_len);
        if rounded != record_len {
            log::warn!(
                "state record for {} is {} bytes; rounding to {}",
                owner,
                record_len,
                rounded
            );
        }
        let block = arena.allocate(owner, rounded * capacity)?;
        let mut tags: Vec<Option<Tick>> = (0..capacity).map(|_| None).collect();
        tags[0] = Some(0);
        Ok(Self {
            block,
            record_len: rounded,
            tags,
        })
    }

    /// Word-rounded bytes per record
    pub fn record_len(&self) -> usize {
        self.record_len
    }

    pub fn capacity(&self) -> usize {
        self.tags.len()
    }

    /// Backing arena block
    pub fn block(&self) -> BlockId {
        self.block
    }

    fn slot(&self, tick: Tick) -> usize {
        slot_for(tick, self.tags.len())
    }

    fn byte_range(&self, slot: usize) -> Range<usize> {
        let start = slot * self.record_len;
        start..start + self.record_len
    }

    /// Record stored for exactly `tick`
    pub fn get<'a>(&self, arena: &'a StateArena, tick: Tick) -> Result<&'a [u8]> {
        let slot = self.slot(tick);
        if self.tags[slot] != Some(tick) {
            return Err(Error::TickNotStored(tick));
        }
        Ok(&arena.bytes(self.block)?[self.byte_range(slot)])
    }

    /// Mutable record stored for exactly `tick`
    pub fn get_mut<'a>(&self, arena: &'a mut StateArena, tick: Tick) -> Result<&'a mut [u8]> {
        let slot = self.slot(tick);
        if self.tags[slot] != Some(tick) {
            return Err(Error::TickNotStored(tick));
        }
        let range = self.byte_range(slot);
        Ok(&mut arena.bytes_mut(self.block)?[range])
    }

    /// Overwrite the record for `tick`, evicting whatever held its slot
    pub fn write(&mut self, arena: &mut StateArena, tick: Tick, record: &[u8]) -> Result<()> {
        if record.len() != self.record_len {
            return Err(Error::RecordSizeMismatch {
                expected: self.record_len,
                got: record.len(),
            });
        }
        let slot = self.slot(tick);
        let range = self.byte_range(slot);
        arena.bytes_mut(self.block)?[range].copy_from_slice(record);
        self.tags[slot] = Some(tick);
        Ok(())
    }

    /// Seed the record for `to` with a copy of the record at `from`
    pub fn copy_forward(&mut self, arena: &mut StateArena, from: Tick, to: Tick) -> Result<()> {
        let src = self.slot(from);
        if self.tags[src] != Some(from) {
            return Err(Error::TickNotStored(from));
        }
        let dst = self.slot(to);
        if src != dst {
            let src_range = self.byte_range(src);
            let dst_start = dst * self.record_len;
            arena.bytes_mut(self.block)?.copy_within(src_range, dst_start);
        }
        self.tags[dst] = Some(to);
        Ok(())
    }

    /// Whether a record is stored for exactly `tick`
    pub fn is_set(&self, tick: Tick) -> bool {
        self.tags[self.slot(tick)] == Some(tick)
    }
}
