//! Backstep Netcode - tick drivers for both sides of a connection
//!
//! This crate runs the synchronized simulation that `backstep-core`
//! models and `backstep-codec` serializes:
//! - Fixed-step clocks with drift correction against a remote
//!   authority (`TickClock`, `PredictedClock`)
//! - The authoritative driver: input admission, missing-input
//!   policies, per-peer delta snapshot publishing (`Authority`)
//! - The predicting driver: local input capture, redundant input
//!   send windows, snapshot apply with rollback and replay
//!   (`Predictor`)
//! - A transport seam with a deterministic in-process loopback for
//!   tests (`Transport`, `LoopbackTransport`)
//!
//! Both drivers are sans-io: wall-clock time and received payloads are
//! fed in by the caller, outgoing payloads leave through the transport.

mod authority;
mod clock;
mod config;
mod error;
mod event;
mod peer;
mod policy;
mod predictor;
mod transport;

pub use authority::Authority;
pub use clock::{ClockAdjust, PredictedClock, TickClock};
pub use config::{ClockConfig, SyncConfig};
pub use error::{Error, Result};
pub use event::SyncEvent;
pub use peer::PeerState;
pub use policy::{BlankInput, InputPolicy, RepeatLast};
pub use predictor::Predictor;
pub use transport::{LoopbackError, LoopbackTransport, Transport, DEFAULT_UNRELIABLE_CEILING};
