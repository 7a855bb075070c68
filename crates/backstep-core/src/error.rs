//! Error types for backstep-core

use crate::identity::{BlockId, EntityId};
use crate::tick::Tick;
use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Arena block already live for {0}")]
    BlockAlreadyLive(EntityId),

    #[error("No live arena block for {0}")]
    NoLiveBlock(EntityId),

    #[error("Unknown arena block: {0}")]
    UnknownBlock(BlockId),

    #[error("Tick {0} is not stored")]
    TickNotStored(Tick),

    #[error("Entity already registered: {0}")]
    EntityExists(EntityId),

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Entity id 0 is reserved as null")]
    NullEntityId,

    #[error("State size must be nonzero")]
    ZeroStateSize,

    #[error("Record length {got} does not match expected {expected}")]
    RecordSizeMismatch { expected: usize, got: usize },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
