//! Word-array delta compression
//!
//! Snapshots are flat `u32` word arrays, and the delta between two
//! arrays of the same length is what travels on the wire:
//! 1. the equal/unequal word mask, grouped into alternating runs whose
//!    counts are unsigned varints; the first run counts equal words and
//!    may be zero-length
//! 2. the unequal words' differences, as zig-zag signed varints
//!
//! Differences are wrapping integer subtraction on the raw bit
//! patterns. That is lossless for every 32-bit pattern including float
//! bits. The zig-zag step relies on the diff's sign bit having integer
//! semantics, so the subtraction must stay integer; substituting float
//! subtraction would lose bits and break the sign mapping.

use crate::error::{Error, Result};
use crate::payload::{PayloadReader, PayloadWriter};

/// A baseline-relative word-array codec
///
/// `from = None` is the implicit all-zero baseline; no zero buffer is
/// materialized for it. Encode and decode must mirror each other
/// exactly, whichever strategy a deployment picks.
pub trait DeltaStrategy {
    /// Append the delta taking `from` to `to` onto `out`
    fn encode(&self, from: Option<&[u32]>, to: &[u32], out: &mut PayloadWriter) -> Result<()>;

    /// Reconstruct `word_count` words from `payload` over `from`
    fn decode(
        &self,
        payload: &mut PayloadReader<'_>,
        from: Option<&[u32]>,
        word_count: usize,
    ) -> Result<Vec<u32>>;
}

fn check_baseline(from: Option<&[u32]>, word_count: usize) -> Result<()> {
    if let Some(from) = from {
        if from.len() != word_count {
            return Err(Error::BaselineLengthMismatch {
                baseline: from.len(),
                current: word_count,
            });
        }
    }
    Ok(())
}

fn diff_at(from: Option<&[u32]>, to: &[u32], index: usize) -> u32 {
    to[index].wrapping_sub(from.map_or(0, |f| f[index]))
}

/// Run-length mask plus varint diffs
///
/// The canonical strategy: cheap when most words repeat the baseline,
/// which is the common case for world state at tick rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueZeroRle;

impl DeltaStrategy for ValueZeroRle {
    fn encode(&self, from: Option<&[u32]>, to: &[u32], out: &mut PayloadWriter) -> Result<()> {
        check_baseline(from, to.len())?;

        // pass 1: alternating equal/unequal run counts
        let mut index = 0usize;
        let mut expect_equal = true;
        while index < to.len() {
            let mut run = 0usize;
            while index + run < to.len()
                && (diff_at(from, to, index + run) == 0) == expect_equal
            {
                run += 1;
            }
            out.write_varu32(run as u32);
            index += run;
            expect_equal = !expect_equal;
        }

        // pass 2: the unequal words' diffs
        for index in 0..to.len() {
            let diff = diff_at(from, to, index);
            if diff != 0 {
                out.write_vari32(diff as i32);
            }
        }
        Ok(())
    }

    fn decode(
        &self,
        payload: &mut PayloadReader<'_>,
        from: Option<&[u32]>,
        word_count: usize,
    ) -> Result<Vec<u32>> {
        check_baseline(from, word_count)?;

        // pass 1: rebuild the unequal mask. Only the leading equal run
        // may be empty; any other zero count is a malformed stream.
        let mut unequal = vec![false; word_count];
        let mut index = 0usize;
        let mut expect_equal = true;
        let mut first = true;
        while index < word_count {
            let run = payload.read_varu32()? as usize;
            if run == 0 && !first {
                return Err(Error::EmptyDeltaRun);
            }
            if run > word_count - index {
                return Err(Error::RunLengthMismatch {
                    expected: word_count,
                    got: index + run,
                });
            }
            if !expect_equal {
                for flag in &mut unequal[index..index + run] {
                    *flag = true;
                }
            }
            index += run;
            expect_equal = !expect_equal;
            first = false;
        }

        // pass 2: apply diffs over the baseline
        let mut words = Vec::with_capacity(word_count);
        for (index, &is_unequal) in unequal.iter().enumerate() {
            let base = from.map_or(0, |f| f[index]);
            if is_unequal {
                let diff = payload.read_vari32()? as u32;
                words.push(base.wrapping_add(diff));
            } else {
                words.push(base);
            }
        }
        Ok(words)
    }
}

/// One varint diff per word, no mask
///
/// Spends a byte on every unchanged word but carries no run overhead;
/// only worth it when nearly every word changes every tick. Kept behind
/// the same trait so deployments can swap strategies without touching
/// the sync layers.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordDiff;

impl DeltaStrategy for WordDiff {
    fn encode(&self, from: Option<&[u32]>, to: &[u32], out: &mut PayloadWriter) -> Result<()> {
        check_baseline(from, to.len())?;
        for index in 0..to.len() {
            out.write_vari32(diff_at(from, to, index) as i32);
        }
        Ok(())
    }

    fn decode(
        &self,
        payload: &mut PayloadReader<'_>,
        from: Option<&[u32]>,
        word_count: usize,
    ) -> Result<Vec<u32>> {
        check_baseline(from, word_count)?;
        let mut words = Vec::with_capacity(word_count);
        for index in 0..word_count {
            let diff = payload.read_vari32()? as u32;
            words.push(from.map_or(0, |f| f[index]).wrapping_add(diff));
        }
        Ok(words)
    }
}
