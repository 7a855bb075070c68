//! World snapshot capture and apply
//!
//! A snapshot is the flat word image of every registered entity at one
//! tick: entities in ascending id order, each contributing one header
//! word (its raw id) followed by its state words. Both sides of a
//! connection build byte-identical images for the same tick, which is
//! what makes word-level deltas meaningful.

use crate::error::{Error, Result};
use backstep_core::{EntityId, Tick, World};
use serde::{Deserialize, Serialize};

/// Flat word-array image of the world at one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: Tick,
    pub words: Vec<u32>,
}

/// What applying a snapshot found
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Entities whose incoming record differed from the local one
    pub changed: Vec<EntityId>,
}

impl ApplyReport {
    /// True when local prediction disagreed with the incoming state
    pub fn diverged(&self) -> bool {
        !self.changed.is_empty()
    }
}

/// Capture the canonical word image of `tick`
///
/// Every entity must have a record stored for `tick`; capturing is done
/// right after the tick is simulated.
pub fn capture_tick(world: &World, tick: Tick) -> Result<WorldSnapshot> {
    let mut words = Vec::new();
    for id in world.ids() {
        words.push(id.raw());
        let state = world.state(id, tick)?;
        for chunk in state.chunks_exact(4) {
            words.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
    }
    Ok(WorldSnapshot { tick, words })
}

/// Apply a received word image to the entity timelines at its tick
///
/// An unknown id aborts the whole apply: state for an entity this side
/// never registered means a spawn was missed and the rest of the
/// payload cannot be sized. A zero header word means the stream itself
/// is corrupt. Behaviors whose record actually changed get
/// `after_state_changed`.
pub fn apply_tick(world: &mut World, snapshot: &WorldSnapshot) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    let words = &snapshot.words;
    let mut pos = 0usize;
    let mut previous: Option<u32> = None;

    while pos < words.len() {
        let raw = words[pos];
        if raw == 0 {
            return Err(Error::NullEntityId);
        }
        if let Some(prev) = previous {
            if raw <= prev {
                return Err(Error::EntityOrder {
                    previous: prev,
                    current: raw,
                });
            }
        }
        previous = Some(raw);
        pos += 1;

        let id = EntityId::new(raw);
        if !world.contains(id) {
            return Err(Error::UnknownEntity(id));
        }
        let state_len = world.state_len(id)?;
        let word_len = state_len / 4;
        if pos + word_len > words.len() {
            return Err(Error::TruncatedSnapshot(id));
        }

        let mut record = vec![0u8; state_len];
        for (i, &word) in words[pos..pos + word_len].iter().enumerate() {
            record[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        pos += word_len;

        let same = matches!(
            world.state(id, snapshot.tick),
            Ok(existing) if existing == record.as_slice()
        );
        world.write_state(id, snapshot.tick, &record)?;
        if !same {
            report.changed.push(id);
            world.notify_state_changed(id, snapshot.tick)?;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backstep_core::{EntityBehavior, EntityLayout, World};

    struct Inert;
    impl EntityBehavior for Inert {}

    fn world_with(ids: &[u32]) -> World {
        let mut world = World::new(8);
        for &raw in ids {
            world
                .register(
                    EntityId::new(raw),
                    EntityLayout {
                        state_bytes: 8,
                        input_bytes: 0,
                        order_key: 0,
                    },
                    Box::new(Inert),
                )
                .unwrap();
        }
        world
    }

    #[test]
    fn test_capture_layout() {
        let mut world = world_with(&[3, 1]);
        world
            .write_state(EntityId::new(1), 0, &[1, 0, 0, 0, 2, 0, 0, 0])
            .unwrap();
        world
            .write_state(EntityId::new(3), 0, &[3, 0, 0, 0, 4, 0, 0, 0])
            .unwrap();

        let snapshot = capture_tick(&world, 0).unwrap();
        // header, two state words, header, two state words; ids ascending
        assert_eq!(snapshot.words, vec![1, 1, 2, 3, 3, 4]);
    }

    #[test]
    fn test_apply_roundtrip_and_divergence() {
        let mut source = world_with(&[1, 3]);
        source
            .write_state(EntityId::new(1), 0, &[9, 0, 0, 0, 8, 0, 0, 0])
            .unwrap();
        let snapshot = capture_tick(&source, 0).unwrap();

        let mut target = world_with(&[1, 3]);
        let report = apply_tick(&mut target, &snapshot).unwrap();
        assert_eq!(report.changed, vec![EntityId::new(1)]);
        assert_eq!(
            target.state(EntityId::new(1), 0).unwrap(),
            &[9, 0, 0, 0, 8, 0, 0, 0]
        );

        // applying the same image again finds nothing new
        let report = apply_tick(&mut target, &snapshot).unwrap();
        assert!(!report.diverged());
    }

    #[test]
    fn test_unknown_entity_aborts() {
        let snapshot = WorldSnapshot {
            tick: 0,
            words: vec![5, 0, 0],
        };
        let mut world = world_with(&[1]);
        let err = apply_tick(&mut world, &snapshot).unwrap_err();
        assert!(matches!(err, Error::UnknownEntity(id) if id.raw() == 5));
    }

    #[test]
    fn test_null_id_aborts() {
        let snapshot = WorldSnapshot {
            tick: 0,
            words: vec![0, 1, 2],
        };
        let mut world = world_with(&[1]);
        let err = apply_tick(&mut world, &snapshot).unwrap_err();
        assert!(matches!(err, Error::NullEntityId));
    }

    #[test]
    fn test_out_of_order_aborts() {
        let snapshot = WorldSnapshot {
            tick: 0,
            words: vec![3, 0, 0, 1, 0, 0],
        };
        let mut world = world_with(&[1, 3]);
        let err = apply_tick(&mut world, &snapshot).unwrap_err();
        assert!(matches!(
            err,
            Error::EntityOrder {
                previous: 3,
                current: 1
            }
        ));
    }

    #[test]
    fn test_truncated_payload_aborts() {
        let snapshot = WorldSnapshot {
            tick: 0,
            words: vec![1, 7],
        };
        let mut world = world_with(&[1]);
        let err = apply_tick(&mut world, &snapshot).unwrap_err();
        assert!(matches!(err, Error::TruncatedSnapshot(id) if id.raw() == 1));
    }

    #[test]
    fn test_capture_requires_stored_tick() {
        let world = world_with(&[1]);
        let err = capture_tick(&world, 4).unwrap_err();
        assert!(matches!(err, Error::Core(_)));
    }
}
