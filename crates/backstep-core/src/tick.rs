//! Tick arithmetic for the fixed-step timeline

/// Simulation tick index.
///
/// Signed so that startup arithmetic (current tick minus a delay
/// estimate) can dip below zero without wrapping. Ring structures index
/// negative ticks correctly; the wire narrows ticks to 32 bits.
pub type Tick = i64;

/// Ring slot for a tick, correct for negative ticks.
pub(crate) fn slot_for(tick: Tick, capacity: usize) -> usize {
    let n = capacity as i64;
    (((tick % n) + n) % n) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_wraps_forward() {
        assert_eq!(slot_for(0, 4), 0);
        assert_eq!(slot_for(3, 4), 3);
        assert_eq!(slot_for(4, 4), 0);
        assert_eq!(slot_for(9, 4), 1);
    }

    #[test]
    fn test_slot_wraps_negative() {
        assert_eq!(slot_for(-1, 4), 3);
        assert_eq!(slot_for(-4, 4), 0);
        assert_eq!(slot_for(-5, 4), 3);
    }
}
