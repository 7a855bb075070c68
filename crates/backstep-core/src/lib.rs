//! Backstep Core - deterministic tick-stepped simulation substrate
//!
//! This crate provides the state-management primitives the sync layers
//! build on:
//! - Entity, peer, and block identifiers (`EntityId`, `PeerId`, `BlockId`)
//! - Owner-indexed zeroed block storage (`StateArena`)
//! - Tick-tagged ring histories (`RingHistory`, `StateTimeline`)
//! - The entity registry and per-tick driver (`World`) with the
//!   `EntityBehavior` and `WorldHooks` extension traits
//!
//! State and input records are raw little-endian byte blocks sized in
//! whole 32-bit words; the codec and sync crates treat them as opaque
//! word arrays, so replay is deterministic down to the bit. Everything
//! here is single-threaded.

mod arena;
mod error;
mod history;
mod identity;
mod tick;
mod timeline;
mod world;

pub use arena::{round_to_word, StateArena, WORD_SIZE};
pub use error::{Error, Result};
pub use history::RingHistory;
pub use identity::{BlockId, EntityId, PeerId};
pub use tick::Tick;
pub use timeline::StateTimeline;
pub use world::{EntityBehavior, EntityLayout, NoHooks, World, WorldHooks};
