//! The ring buffer implementation

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

/// How many consumed slots the consumer accumulates before publishing
/// progress back to the producer side
pub const PROGRESS_BATCH: u64 = 128;

/// One slot: a publication sequence plus the value cell
///
/// A slot at ring position `p` holds a published value exactly when
/// `seq == p + 1`. Positions grow without wrapping, so a stale sequence
/// from an earlier lap can never alias a current one.
struct Slot<T> {
    seq: AtomicU64,
    value: UnsafeCell<Option<T>>,
}

/// Error returned by [`Producer::try_push`], carrying the value back
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// No free slot (judged against the published consumer cursor)
    Full(T),
    /// The buffer was closed
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the value that could not be pushed
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(v) | PushError::Closed(v) => v,
        }
    }
}

/// Shared ring state
pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    capacity: u64,

    /// Next position a producer will claim
    tail: CachePadded<AtomicU64>,

    /// Consumer progress as last published to producers (lags the
    /// consumer's local position by up to the progress batch)
    head: CachePadded<AtomicU64>,

    closed: AtomicBool,
}

// The value cells are only touched by the claiming producer (write) and
// the single consumer (take), synchronized through the slot sequence.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a ring of at least `capacity` slots, split into handles
    ///
    /// Capacity is rounded up to a power of two (minimum 2). The producer
    /// handle is cheaply cloneable for multi-producer use.
    pub fn new(capacity: usize) -> (Producer<T>, Consumer<T>) {
        let capacity = capacity.max(2).next_power_of_two() as u64;

        let slots: Box<[Slot<T>]> = (0..capacity)
            .map(|_| Slot {
                seq: AtomicU64::new(0),
                value: UnsafeCell::new(None),
            })
            .collect();

        let ring = Arc::new(RingBuffer {
            slots,
            mask: capacity - 1,
            capacity,
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        });

        // Small rings would starve producers if progress only surfaced
        // every 128 slots; cap the batch at half the capacity.
        let progress_every = PROGRESS_BATCH.min(capacity / 2).max(1);

        (
            Producer {
                ring: Arc::clone(&ring),
            },
            Consumer {
                ring,
                pos: 0,
                committed: 0,
                progress_every,
            },
        )
    }

    #[inline]
    fn slot(&self, pos: u64) -> &Slot<T> {
        &self.slots[(pos & self.mask) as usize]
    }
}

/// Producer handle (cloneable; many threads may push)
pub struct Producer<T> {
    ring: Arc<RingBuffer<T>>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
    }
}

impl<T> Producer<T> {
    /// Attempt to publish a value without blocking
    ///
    /// Returns the claimed position on success. Returns the value back
    /// when the ring is full (against the lazily-published consumer
    /// cursor) or closed.
    pub fn try_push(&self, value: T) -> Result<u64, PushError<T>> {
        if self.ring.closed.load(Ordering::Acquire) {
            return Err(PushError::Closed(value));
        }

        let mut tail = self.ring.tail.load(Ordering::Relaxed);
        loop {
            let head = self.ring.head.load(Ordering::Acquire);
            if tail.wrapping_sub(head) >= self.ring.capacity {
                return Err(PushError::Full(value));
            }

            match self.ring.tail.compare_exchange_weak(
                tail,
                tail + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let slot = self.ring.slot(tail);
                    // Safety: the fullness check above proved the consumer
                    // has published progress past this slot's previous lap,
                    // and the CAS gives this producer exclusive claim.
                    unsafe {
                        *slot.value.get() = Some(value);
                    }
                    slot.seq.store(tail + 1, Ordering::Release);
                    return Ok(tail);
                }
                Err(current) => tail = current,
            }
        }
    }

    /// Stop accepting new values
    ///
    /// Already-published values remain consumable.
    pub fn close(&self) {
        self.ring.closed.store(true, Ordering::Release);
    }

    /// Whether the ring has been closed
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.ring.closed.load(Ordering::Acquire)
    }

    /// Ring capacity in slots
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity as usize
    }
}

/// Consumer handle (exactly one; not cloneable)
pub struct Consumer<T> {
    ring: Arc<RingBuffer<T>>,

    /// Next position to consume (local, unpublished)
    pos: u64,

    /// Position last published to the producer side
    committed: u64,

    /// Publication batch size for this ring
    progress_every: u64,
}

impl<T> Consumer<T> {
    /// Take the next published value, if any
    ///
    /// Progress is published to producers on the first consumed slot and
    /// then every [`PROGRESS_BATCH`] slots (capped at half the capacity
    /// for small rings).
    pub fn try_pop(&mut self) -> Option<T> {
        let slot = self.ring.slot(self.pos);
        if slot.seq.load(Ordering::Acquire) != self.pos + 1 {
            return None;
        }

        // Safety: the sequence check proves the claiming producer finished
        // its store, and this is the only consumer.
        let value = unsafe { (*slot.value.get()).take() };
        self.pos += 1;

        if self.pos == 1 || self.pos - self.committed >= self.progress_every {
            self.commit();
        }

        value
    }

    /// Publish consumer progress to the producer side immediately
    pub fn commit(&mut self) {
        if self.committed != self.pos {
            self.ring.head.store(self.pos, Ordering::Release);
            self.committed = self.pos;
        }
    }

    /// Distance from the current write cursor to the consumer position
    ///
    /// This is the unconsumed-slot count the high-water thresholds are
    /// checked against.
    #[inline]
    pub fn unconsumed(&self) -> u64 {
        self.ring
            .tail
            .load(Ordering::Acquire)
            .saturating_sub(self.pos)
    }

    /// Whether the ring is closed and everything claimed was consumed
    pub fn is_drained(&self) -> bool {
        self.ring.closed.load(Ordering::Acquire)
            && self.ring.tail.load(Ordering::Acquire) == self.pos
    }

    /// Stop accepting new values (consumer-side close)
    pub fn close(&self) {
        self.ring.closed.store(true, Ordering::Release);
    }

    /// Whether the ring has been closed
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.ring.closed.load(Ordering::Acquire)
    }

    /// Ring capacity in slots
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity as usize
    }
}

impl<T> std::fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("pos", &self.pos)
            .field("committed", &self.committed)
            .field("unconsumed", &self.unconsumed())
            .finish()
    }
}

impl<T> std::fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.ring.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[path = "ring_test.rs"]
mod ring_test;
