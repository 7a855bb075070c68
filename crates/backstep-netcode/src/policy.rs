//! Fallbacks for input that never arrived.
//!
//! The authority simulates a tick when the clock says so, whether or
//! not every peer's input made it across the network. A policy decides
//! what record stands in for the missing one.

/// Produces a stand-in input record when the real one is missing.
pub trait InputPolicy {
    /// `previous` is the newest record seen from the peer before the
    /// missing tick, if there ever was one.
    fn missing_input(&self, previous: Option<&[u8]>, record_len: usize) -> Vec<u8>;
}

/// Repeats the last record that did arrive.
///
/// Suits held-button input schemes where a lost packet most likely
/// carried the same buttons as the one before it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepeatLast;

impl InputPolicy for RepeatLast {
    fn missing_input(&self, previous: Option<&[u8]>, record_len: usize) -> Vec<u8> {
        match previous {
            Some(record) => record.to_vec(),
            None => vec![0; record_len],
        }
    }
}

/// Acts as if the peer sent an all-zero record.
///
/// Suits impulse input schemes where repeating a lost action would be
/// worse than dropping it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankInput;

impl InputPolicy for BlankInput {
    fn missing_input(&self, _previous: Option<&[u8]>, record_len: usize) -> Vec<u8> {
        vec![0; record_len]
    }
}
