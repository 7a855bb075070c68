//! Transport abstraction.
//!
//! The sync layers never own a socket. An embedder brings a
//! [`Transport`] with two outgoing channels per peer: an unreliable
//! datagram channel with a bounded payload size, and a reliable ordered
//! channel for the payloads that do not fit. Incoming bytes are pushed
//! into the drivers by the embedder's own receive loop.

use std::collections::VecDeque;

use backstep_core::PeerId;
use indexmap::IndexMap;
use thiserror::Error;

/// Default unreliable payload ceiling in bytes.
///
/// Conservative for UDP over IPv4 after protocol overhead; transports
/// with better knowledge report their own value.
pub const DEFAULT_UNRELIABLE_CEILING: usize = 1193;

/// Outgoing message channels to a set of peers.
pub trait Transport {
    type Error: std::fmt::Display;

    /// Largest payload `send_unreliable` accepts.
    fn max_unreliable_payload(&self) -> usize {
        DEFAULT_UNRELIABLE_CEILING
    }

    /// Fire-and-forget datagram.
    fn send_unreliable(&mut self, peer: PeerId, payload: &[u8]) -> Result<(), Self::Error>;

    /// Guaranteed, ordered delivery.
    fn send_reliable(&mut self, peer: PeerId, payload: &[u8]) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum LoopbackError {
    #[error("Payload of {got} bytes exceeds the {ceiling}-byte datagram ceiling")]
    PayloadTooLarge { got: usize, ceiling: usize },
}

/// In-memory transport delivering into per-peer queues.
///
/// Delivery order is send order across both channels. The unreliable
/// channel supports deterministic loss injection for tests: every n-th
/// unreliable send is discarded.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    queues: IndexMap<PeerId, VecDeque<Vec<u8>>>,
    ceiling: usize,
    drop_every: Option<u64>,
    unreliable_sends: u64,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            queues: IndexMap::new(),
            ceiling: DEFAULT_UNRELIABLE_CEILING,
            drop_every: None,
            unreliable_sends: 0,
        }
    }

    /// Same as `new` with a custom datagram ceiling.
    pub fn with_ceiling(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(1),
            ..Self::new()
        }
    }

    /// Discards every `nth` unreliable send from now on.
    pub fn drop_every(&mut self, nth: u64) {
        self.drop_every = Some(nth.max(1));
        self.unreliable_sends = 0;
    }

    /// Stops dropping.
    pub fn deliver_all(&mut self) {
        self.drop_every = None;
    }

    /// Takes everything queued for `peer`, oldest first.
    pub fn drain(&mut self, peer: PeerId) -> Vec<Vec<u8>> {
        self.queues
            .get_mut(&peer)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn pending(&self, peer: PeerId) -> usize {
        self.queues.get(&peer).map_or(0, VecDeque::len)
    }
}

impl Transport for LoopbackTransport {
    type Error = LoopbackError;

    fn max_unreliable_payload(&self) -> usize {
        self.ceiling
    }

    fn send_unreliable(&mut self, peer: PeerId, payload: &[u8]) -> Result<(), LoopbackError> {
        if payload.len() > self.ceiling {
            return Err(LoopbackError::PayloadTooLarge {
                got: payload.len(),
                ceiling: self.ceiling,
            });
        }
        self.unreliable_sends += 1;
        if let Some(nth) = self.drop_every {
            if self.unreliable_sends % nth == 0 {
                return Ok(());
            }
        }
        self.queues
            .entry(peer)
            .or_default()
            .push_back(payload.to_vec());
        Ok(())
    }

    fn send_reliable(&mut self, peer: PeerId, payload: &[u8]) -> Result<(), LoopbackError> {
        self.queues
            .entry(peer)
            .or_default()
            .push_back(payload.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queues_per_peer() {
        let mut transport = LoopbackTransport::new();
        let alice = PeerId::new(1);
        let bob = PeerId::new(2);
        transport.send_unreliable(alice, b"a1").unwrap();
        transport.send_reliable(bob, b"b1").unwrap();
        transport.send_unreliable(alice, b"a2").unwrap();

        assert_eq!(transport.drain(alice), vec![b"a1".to_vec(), b"a2".to_vec()]);
        assert_eq!(transport.pending(alice), 0);
        assert_eq!(transport.drain(bob), vec![b"b1".to_vec()]);
    }

    #[test]
    fn test_ceiling_rejects_oversize() {
        let mut transport = LoopbackTransport::with_ceiling(4);
        let peer = PeerId::new(1);
        assert!(transport.send_unreliable(peer, &[0; 5]).is_err());
        // the reliable channel has no ceiling
        transport.send_reliable(peer, &[0; 5]).unwrap();
        assert_eq!(transport.pending(peer), 1);
    }

    #[test]
    fn test_drop_pattern_is_deterministic() {
        let mut transport = LoopbackTransport::new();
        let peer = PeerId::new(1);
        transport.drop_every(3);
        for i in 0..9u8 {
            transport.send_unreliable(peer, &[i]).unwrap();
        }
        let delivered = transport.drain(peer);
        assert_eq!(
            delivered,
            vec![
                vec![0],
                vec![1],
                vec![3],
                vec![4],
                vec![6],
                vec![7],
            ]
        );
    }

    #[test]
    fn test_reliable_never_dropped() {
        let mut transport = LoopbackTransport::new();
        let peer = PeerId::new(1);
        transport.drop_every(1);
        transport.send_unreliable(peer, b"gone").unwrap();
        transport.send_reliable(peer, b"kept").unwrap();
        assert_eq!(transport.drain(peer), vec![b"kept".to_vec()]);
    }
}
