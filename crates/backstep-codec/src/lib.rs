//! Backstep Codec - wire format for state sync
//!
//! This crate turns world state into bytes and back:
//! - Little-endian payload primitives with varints (`PayloadWriter`,
//!   `PayloadReader`)
//! - Pluggable word-array delta compression (`DeltaStrategy`, with
//!   `ValueZeroRle` as the canonical strategy and `WordDiff` as the
//!   dense alternative)
//! - Canonical snapshot capture and apply (`capture_tick`, `apply_tick`)
//! - The three wire messages and their tagged envelope (`Message`)
//!
//! Decoding never trusts the peer: every length is bounds-checked,
//! reserved bits and trailing bytes are rejected, and unknown entities
//! abort the message.

mod delta;
mod error;
mod payload;
mod snapshot;
mod wire;

pub use delta::{DeltaStrategy, ValueZeroRle, WordDiff};
pub use error::{Error, Result};
pub use payload::{unzigzag, varu32_len, zigzag, PayloadReader, PayloadWriter};
pub use snapshot::{apply_tick, capture_tick, ApplyReport, WorldSnapshot};
pub use wire::{
    DeltaSnapshotMessage, EntityInputs, FragmentedAck, InputMessage, Message, MAX_INPUT_WINDOW,
};
