//! Fixed-capacity ring buffer with batched consumer-progress publication
//!
//! A single- or multi-producer, single-consumer circular buffer of
//! fixed-capacity slots. Producers claim slots with a CAS on the write
//! cursor and publish them with a per-slot sequence store; the consumer
//! tracks its position locally and publishes progress back to producers
//! only every [`PROGRESS_BATCH`] consumed slots (or on the first one, or
//! explicitly via [`Consumer::commit`]). Batched publication trades
//! slightly delayed slot reclamation for far fewer cross-core stores on
//! the consumer side.
//!
//! # Design
//!
//! - `try_push` never blocks: it returns the value back on a full or
//!   closed buffer, so callers decide whether to drop, retry or spill.
//! - Fullness is judged against the lazily-published consumer cursor, so
//!   a claimed slot is always genuinely free to overwrite.
//! - Close is cooperative: producers stop publishing, the consumer drains
//!   whatever was already published.

mod ring;

pub use ring::{Consumer, Producer, PushError, RingBuffer, PROGRESS_BATCH};
