//! Time-partitioned 64-bit record ids
//!
//! Bit layout (MSB to LSB): 1 unused sign bit, 41 bits of milliseconds
//! since the Unix epoch, 10 bits of shard id, 12 bits of per-millisecond
//! counter. Ids from a single generator are unique and monotonically
//! non-decreasing in packed form, even under concurrent callers.
//!
//! The generator never lets the millisecond field regress: if the wall
//! clock falls behind the last recorded millisecond (clock skew), new ids
//! continue from the recorded millisecond instead.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ProtocolError, Result};

/// Number of counter bits (per-millisecond sequence)
const SEQ_BITS: u64 = 12;

/// Number of shard id bits
const SHARD_BITS: u64 = 10;

/// Mask for the counter field
pub const MAX_SEQ: u64 = (1 << SEQ_BITS) - 1;

/// Exclusive upper bound for shard ids
pub const MAX_SHARD: u64 = 1 << SHARD_BITS;

/// Mask for the millisecond field
const MS_MASK: u64 = (1 << 41) - 1;

/// Decode the shard id from a packed id
#[inline]
pub fn shard_id(id: u64) -> u64 {
    (id >> SEQ_BITS) & (MAX_SHARD - 1)
}

/// Decode the millisecond timestamp from a packed id
#[inline]
pub fn millis(id: u64) -> u64 {
    (id >> (SEQ_BITS + SHARD_BITS)) & MS_MASK
}

/// Decode the per-millisecond counter from a packed id
#[inline]
pub fn seq(id: u64) -> u64 {
    id & MAX_SEQ
}

/// Clock source in milliseconds since the Unix epoch
type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Lock-free generator of monotonically increasing record ids
///
/// The internal state packs `(millis << 12) | counter` into one atomic
/// word; `next` advances it with a CAS loop, carrying counter overflow
/// into the millisecond field.
pub struct SequenceGenerator {
    /// Packed `(millis, counter)` of the last issued id
    state: AtomicU64,

    /// Shard id, pre-shifted into position
    shard_bits: u64,

    /// Millisecond clock (injectable for tests)
    clock: Clock,
}

impl SequenceGenerator {
    /// Create a generator for the given shard, using the system clock
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ShardOutOfRange`] if `shard >= 1024`.
    pub fn new(shard: u64) -> Result<Self> {
        Self::with_clock(shard, Box::new(system_clock))
    }

    /// Create a generator with a custom millisecond clock
    pub fn with_clock(shard: u64, clock: Clock) -> Result<Self> {
        if shard >= MAX_SHARD {
            return Err(ProtocolError::ShardOutOfRange(shard));
        }

        Ok(Self {
            state: AtomicU64::new(0),
            shard_bits: shard << SEQ_BITS,
            clock,
        })
    }

    /// Generate the next id
    #[inline]
    pub fn next(&self) -> u64 {
        self.next_batch(1)
    }

    /// Advance the counter by `batch_size` and return the resulting id
    ///
    /// `batch_size` is coerced to at least 1. The returned id corresponds
    /// to the last element of the batch; a caller that reserved a batch of
    /// `n` owns the `n` ids ending at the returned value.
    pub fn next_batch(&self, batch_size: u64) -> u64 {
        let batch = batch_size.max(1);

        loop {
            let current = self.state.load(Ordering::Acquire);
            let last_ms = current >> SEQ_BITS;
            let last_seq = current & MAX_SEQ;

            let now = (self.clock)();

            // Continue from the recorded millisecond when the wall clock
            // is behind it; the counter resets only on a fresh millisecond.
            let (mut ms, base) = if now > last_ms {
                (now, 0)
            } else {
                (last_ms, last_seq)
            };

            let raw = base + batch;
            ms += raw >> SEQ_BITS;
            let seq = raw & MAX_SEQ;

            let next = (ms << SEQ_BITS) | seq;
            if self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return ((ms & MS_MASK) << (SEQ_BITS + SHARD_BITS)) | self.shard_bits | seq;
            }
        }
    }
}

impl std::fmt::Debug for SequenceGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceGenerator")
            .field("shard", &(self.shard_bits >> SEQ_BITS))
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
#[path = "sequence_test.rs"]
mod sequence_test;
