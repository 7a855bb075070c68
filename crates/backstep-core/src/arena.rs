//! Owner-indexed block storage for entity state
//!
//! Every entity that carries simulated state owns exactly one live
//! block at a time. Blocks are zero-filled on allocation, sized in
//! whole 32-bit words, and never alias: all access goes through the
//! returned [`BlockId`], and a release followed by a fresh allocation
//! hands back zeroed memory.

use crate::error::{Error, Result};
use crate::identity::{BlockId, EntityId};
use std::collections::BTreeMap;

/// Bytes per state word. All block and record sizes are multiples of this.
pub const WORD_SIZE: usize = 4;

/// Round a byte count up to the next word boundary.
pub fn round_to_word(bytes: usize) -> usize {
    (bytes + WORD_SIZE - 1) / WORD_SIZE * WORD_SIZE
}

#[derive(Debug)]
struct Block {
    owner: EntityId,
    data: Vec<u8>,
}

/// Fixed-block state memory
///
/// Double allocation for an owner and release without a live block are
/// programming errors and reported as hard errors, never ignored.
#[derive(Debug, Default)]
pub struct StateArena {
    blocks: Vec<Option<Block>>,
    free: Vec<usize>,
    by_owner: BTreeMap<EntityId, BlockId>,
}

impl StateArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zero-filled block for `owner`
    ///
    /// The size is rounded up to a whole number of words; a request
    /// that is not already aligned is legal but logged, since it
    /// usually means a state struct with stray padding.
    pub fn allocate(&mut self, owner: EntityId, byte_count: usize) -> Result<BlockId> {
        if self.by_owner.contains_key(&owner) {
            return Err(Error::BlockAlreadyLive(owner));
        }
        let rounded = round_to_word(byte_count);
        if rounded != byte_count {
            log::warn!(
                "unaligned block request for {}: {} bytes rounded to {}",
                owner,
                byte_count,
                rounded
            );
        }
        let block = Block {
            owner,
            data: vec![0u8; rounded],
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.blocks[index] = Some(block);
                index
            }
            None => {
                self.blocks.push(Some(block));
                self.blocks.len() - 1
            }
        };
        let id = BlockId::new(index as u32);
        self.by_owner.insert(owner, id);
        Ok(id)
    }

    /// Release the live block owned by `owner`
    pub fn release(&mut self, owner: EntityId) -> Result<()> {
        let id = self
            .by_owner
            .remove(&owner)
            .ok_or(Error::NoLiveBlock(owner))?;
        self.blocks[id.raw() as usize] = None;
        self.free.push(id.raw() as usize);
        Ok(())
    }

    fn block(&self, id: BlockId) -> Result<&Block> {
        self.blocks
            .get(id.raw() as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(Error::UnknownBlock(id))
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        self.blocks
            .get_mut(id.raw() as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(Error::UnknownBlock(id))
    }

    /// Borrow a live block's bytes
    pub fn bytes(&self, id: BlockId) -> Result<&[u8]> {
        Ok(&self.block(id)?.data)
    }

    /// Borrow a live block's bytes mutably
    pub fn bytes_mut(&mut self, id: BlockId) -> Result<&mut [u8]> {
        Ok(&mut self.block_mut(id)?.data)
    }

    /// Owner of a live block
    pub fn owner_of(&self, id: BlockId) -> Result<EntityId> {
        Ok(self.block(id)?.owner)
    }

    /// Live block for an owner, if any
    pub fn block_of(&self, owner: EntityId) -> Option<BlockId> {
        self.by_owner.get(&owner).copied()
    }

    /// Number of live blocks
    pub fn live_blocks(&self) -> usize {
        self.by_owner.len()
    }

    /// Total bytes held by live blocks
    pub fn live_bytes(&self) -> usize {
        self.blocks.iter().flatten().map(|b| b.data.len()).sum()
    }
}
