//! Ingest stage: total ordering, encoding, and the mode switch
//!
//! Application threads call [`IngestStage::enqueue`], which never blocks.
//! A single consumer thread assigns every accepted event a strictly
//! increasing id, encodes it into a pooled buffer, and routes the record
//! by the current [`Mode`]:
//!
//! - **Direct**: records go straight to the transport ring. When the
//!   transport refuses and pressure builds behind the consumer (or the
//!   backend is known not ready), the stage switches to `ViaOverflow`.
//! - **ViaOverflow**: new records spill to the disk-backed store while
//!   the consumer opportunistically replays the store's head into the
//!   transport. Once the transport confirms delivery of the *latest*
//!   assigned id, the stage switches back.
//!
//! Ordering holds across the switch because, from the first spilled
//! record until the confirmed switch-back, every record passes through
//! the FIFO store.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use ferry_overflow::OverflowStore;
use ferry_protocol::{ControlMessage, LogEvent, Record, RecordCodec, RecordPool, SequenceGenerator};
use ferry_ringbuf::{Consumer, Producer, RingBuffer};

use crate::error::{PipelineError, Result};
use crate::metrics::IngestMetrics;
use crate::transport::TransportSender;

const IDLE_WAIT: Duration = Duration::from_micros(100);
const DRAIN_WAIT: Duration = Duration::from_micros(500);

/// How records travel from ingest to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Straight into the transport ring
    Direct,
    /// Through the disk-backed overflow store
    ViaOverflow,
}

/// Worker-side tuning for the ingest stage
pub(crate) struct IngestSettings {
    pub capacity: usize,
    pub shard: u16,
    pub exclude_categories: Vec<String>,
    pub drain_timeout: Duration,
}

/// The ingest stage handle
///
/// Cheap to share behind an `Arc`; `enqueue` takes `&self`.
pub struct IngestStage<E: LogEvent> {
    input: Producer<E>,
    exclude: Vec<String>,
    metrics: Arc<IngestMetrics>,
    handle: Option<JoinHandle<()>>,
}

impl<E: LogEvent> IngestStage<E> {
    /// Spawn the consumer thread
    pub(crate) fn spawn<C>(
        codec: C,
        transport: TransportSender,
        overflow: OverflowStore,
        control: Receiver<ControlMessage>,
        settings: IngestSettings,
        pool: Arc<RecordPool>,
    ) -> Result<Self>
    where
        C: RecordCodec<E> + 'static,
    {
        let sequences = SequenceGenerator::new(settings.shard as u64)?;
        let (input, ring) = RingBuffer::new(settings.capacity);
        let metrics = Arc::new(IngestMetrics::default());

        let capacity = input.capacity() as u64;
        let worker = IngestWorker {
            ring,
            codec,
            sequences,
            pool,
            transport,
            overflow,
            control,
            metrics: Arc::clone(&metrics),
            mode: Mode::Direct,
            last_message_id: 0,
            high_water_direct: capacity / 2,
            high_water_overflow: capacity * 3 / 4,
            drain_timeout: settings.drain_timeout,
            drain_deadline: None,
        };
        let handle = std::thread::Builder::new()
            .name("ferry-ingest".to_string())
            .spawn(move || worker.run())
            .map_err(|source| PipelineError::Spawn {
                thread: "ingest",
                source,
            })?;

        Ok(Self {
            input,
            exclude: settings.exclude_categories,
            metrics,
            handle: Some(handle),
        })
    }

    /// Offer an event to the pipeline; never blocks
    ///
    /// Returns `false` only when the ring is full or the stage is
    /// closed (counted as drops). Events matching an excluded category
    /// prefix are discarded and report success.
    pub fn enqueue(&self, event: E) -> bool {
        let category = event.category();
        if self.exclude.iter().any(|p| category.starts_with(p.as_str())) {
            self.metrics.record_excluded();
            return true;
        }

        match self.input.try_push(event) {
            Ok(_) => {
                self.metrics.record_enqueued();
                true
            }
            Err(_) => {
                self.metrics.record_dropped_full();
                false
            }
        }
    }

    pub fn metrics(&self) -> Arc<IngestMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Stop accepting events; the consumer drains what was published
    pub(crate) fn close_input(&self) {
        self.input.close();
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("ingest worker panicked");
            }
        }
    }
}

/// The consumer thread body
struct IngestWorker<E: LogEvent, C: RecordCodec<E>> {
    ring: Consumer<E>,
    codec: C,
    sequences: SequenceGenerator,
    pool: Arc<RecordPool>,
    transport: TransportSender,
    overflow: OverflowStore,
    control: Receiver<ControlMessage>,
    metrics: Arc<IngestMetrics>,

    mode: Mode,
    /// Highest id assigned so far; the switch-back condition compares
    /// confirmations against exactly this value
    last_message_id: u64,
    high_water_direct: u64,
    high_water_overflow: u64,
    drain_timeout: Duration,
    /// Set when the closed ring is first observed; bounds all further
    /// overflow replay, in the loop and in the final drain alike
    drain_deadline: Option<Instant>,
}

impl<E: LogEvent, C: RecordCodec<E>> IngestWorker<E, C> {
    fn run(mut self) {
        loop {
            self.drain_control();

            match self.ring.try_pop() {
                Some(event) => self.process(event),
                None => {
                    if self.ring.is_closed() && self.drain_deadline.is_none() {
                        self.drain_deadline = Some(Instant::now() + self.drain_timeout);
                    }
                    if matches!(self.drain_deadline, Some(d) if Instant::now() >= d) {
                        break;
                    }
                    let progressed =
                        self.mode == Mode::ViaOverflow && self.replay_overflow_step();
                    if !progressed {
                        if self.ring.is_drained() {
                            break;
                        }
                        self.ring.commit();
                        std::thread::sleep(IDLE_WAIT);
                    }
                }
            }
        }

        self.shutdown();
    }

    fn process(&mut self, event: E) {
        let id = self.sequences.next();
        let mut buf = self.pool.get();
        self.codec.encode(&event, &mut buf);
        drop(event);

        self.metrics.record_ingested();
        self.route(Record::new(id, buf));
        self.last_message_id = id;
    }

    /// Place one record according to the current mode
    ///
    /// Bounded waits only: each loop exits on success, on closed input,
    /// or at a high-water mark on the ingest ring.
    fn route(&mut self, record: Record) {
        let mut record = record;

        if self.mode == Mode::Direct {
            let mut spins = 0u32;
            loop {
                match self.transport.enqueue(record) {
                    Ok(()) => return,
                    Err(back) => record = back,
                }
                if !self.transport.is_ready()
                    || self.ring.is_closed()
                    || self.ring.unconsumed() >= self.high_water_direct
                {
                    self.switch_to_overflow();
                    break;
                }
                spin_wait(&mut spins);
            }
        }

        let mut spins = 0u32;
        loop {
            if self.overflow.enqueue(&record) {
                self.pool.put(record.into_payload());
                return;
            }
            // Budget exhausted; replaying the head is the only way it
            // frees up, and this thread is the replayer.
            if self.ring.is_closed() || self.ring.unconsumed() >= self.high_water_overflow {
                self.metrics.record_dropped_overflow();
                self.pool.put(record.into_payload());
                return;
            }
            if !self.replay_overflow_step() {
                spin_wait(&mut spins);
            }
        }
    }

    fn switch_to_overflow(&mut self) {
        self.mode = Mode::ViaOverflow;
        self.metrics.record_mode_switch();
        tracing::warn!(
            last_id = self.last_message_id,
            "transport backpressure, switching to overflow"
        );
    }

    /// Move one record from the overflow head into the transport
    fn replay_overflow_step(&mut self) -> bool {
        if !self.transport.is_ready() {
            return false;
        }

        let (id, buf) = {
            let Some((id, payload)) = self.overflow.peek() else {
                return false;
            };
            let mut buf = self.pool.get();
            buf.extend_from_slice(payload);
            (id, buf)
        };

        match self.transport.enqueue(Record::new(id, buf)) {
            Ok(()) => {
                self.overflow.advance();
                true
            }
            Err(record) => {
                self.pool.put(record.into_payload());
                false
            }
        }
    }

    fn drain_control(&mut self) {
        while let Ok(message) = self.control.try_recv() {
            match message {
                ControlMessage::LastConfirmedSequence(confirmed) => {
                    // Only the exact latest id proves the overflow path
                    // is fully replayed; a lower id is a partial batch.
                    if self.mode == Mode::ViaOverflow && confirmed == self.last_message_id {
                        self.mode = Mode::Direct;
                        self.metrics.record_mode_restore();
                        tracing::info!(
                            confirmed,
                            "transport caught up, resuming direct mode"
                        );
                    }
                }
            }
        }
    }

    /// Drain the overflow store into the transport, bounded by the
    /// budget that started when the closed ring was first observed;
    /// whatever remains is persisted by `close`
    fn shutdown(&mut self) {
        let deadline = self
            .drain_deadline
            .unwrap_or_else(|| Instant::now() + self.drain_timeout);
        while !self.overflow.is_empty() && Instant::now() < deadline {
            if !self.replay_overflow_step() {
                std::thread::sleep(DRAIN_WAIT);
            }
        }

        let remaining = self.overflow.len();
        if let Err(e) = self.overflow.close() {
            tracing::error!(error = %e, "overflow store close failed");
        }
        self.ring.commit();
        tracing::debug!(
            last_id = self.last_message_id,
            persisted = remaining,
            "ingest worker finished"
        );
    }
}

/// Short spin, then sleep: bounded waits on the consumer thread
fn spin_wait(spins: &mut u32) {
    *spins = spins.saturating_add(1);
    if *spins < 16 {
        std::hint::spin_loop();
    } else {
        std::thread::sleep(Duration::from_micros(50));
    }
}

#[cfg(test)]
#[path = "ingest_test.rs"]
mod ingest_test;
