//! Observable sync progress.

use backstep_core::{PeerId, Tick};
use serde::{Deserialize, Serialize};

/// Something the sync layer did during a frame.
///
/// Events are returned from the per-frame calls instead of logged, so
/// an embedder can drive connection UI or correction effects without
/// scraping log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// An authoritative snapshot was decoded and applied.
    SnapshotApplied { tick: Tick, diverged: bool },
    /// Applying a snapshot changed already-predicted state.
    DivergenceDetected { tick: Tick, entities: usize },
    /// Ticks `from..=to` were simulated again after a correction.
    Resimulated { from: Tick, to: Tick },
    /// The local clock jumped to catch the authority.
    ClockSnapped { from: Tick, to: Tick },
    /// A peer's delta baseline was unusable; the next snapshot is full.
    FullResend { peer: PeerId, tick: Tick },
    /// A snapshot went over the datagram ceiling onto the reliable channel.
    Fragmented { peer: PeerId, tick: Tick, bytes: usize },
}
