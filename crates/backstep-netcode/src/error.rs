//! Sync layer error types.

use backstep_core::{EntityId, PeerId, Tick};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Peer already connected: {0}")]
    PeerExists(PeerId),

    #[error("Entity already controlled: {0}")]
    AlreadyControlled(EntityId),

    #[error("Entity is not controlled: {0}")]
    NotControlled(EntityId),

    #[error("Entity takes no input: {0}")]
    PassiveEntity(EntityId),

    #[error("Resimulating ticks {from}..={to} exceeds the {capacity}-tick history")]
    ResimulationTooDeep {
        from: Tick,
        to: Tick,
        capacity: usize,
    },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error(transparent)]
    Core(#[from] backstep_core::Error),

    #[error(transparent)]
    Codec(#[from] backstep_codec::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
