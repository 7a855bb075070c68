//! Error types for backstep-codec

use backstep_core::{EntityId, Tick};
use thiserror::Error;

/// Codec error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Payload ended early: needed {needed} more bytes, {available} available")]
    UnexpectedEnd { needed: usize, available: usize },

    #[error("Varint does not fit in 32 bits")]
    VarintOverflow,

    #[error("Unknown message tag: {0}")]
    UnknownMessageTag(u8),

    #[error("Unknown flag bits set: {0:#04x}")]
    BadFlags(u8),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("Baseline has {baseline} words but update covers {current}")]
    BaselineLengthMismatch { baseline: usize, current: usize },

    #[error("Delta run counts cover {got} words of {expected}")]
    RunLengthMismatch { expected: usize, got: usize },

    #[error("Zero-length run inside delta stream")]
    EmptyDeltaRun,

    #[error("Unknown entity in message: {0}")]
    UnknownEntity(EntityId),

    #[error("Snapshot header contains the null entity id")]
    NullEntityId,

    #[error("Snapshot entities out of order: {previous} then {current}")]
    EntityOrder { previous: u32, current: u32 },

    #[error("Snapshot payload truncated at {0}")]
    TruncatedSnapshot(EntityId),

    #[error("Input for entity without input capability: {0}")]
    UnexpectedInput(EntityId),

    #[error("Input window {0} outside 1..=8")]
    BadInputWindow(u8),

    #[error("Tick {0} does not fit the wire format")]
    TickOutOfRange(Tick),

    #[error(transparent)]
    Core(#[from] backstep_core::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
