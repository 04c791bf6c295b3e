//! Transport stage: drains records to the MQ backend
//!
//! A single consumer thread pulls records off an SPSC ring, hands them
//! to the [`MqProducer`], flushes per batch, and reports the highest
//! delivered id back to the ingest stage as
//! [`ControlMessage::LastConfirmedSequence`].
//!
//! # Readiness
//!
//! The stage keeps a shared readiness flag. `enqueue` refuses records
//! while the flag is down, which is what pushes the ingest stage onto
//! the overflow path. The flag drops after `failure_threshold`
//! consecutive opaque failures and is restored by a periodic heartbeat
//! probe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use ferry_config::TransportConfig;
use ferry_protocol::{ControlMessage, Record, RecordPool};
use ferry_ringbuf::{Consumer, Producer, RingBuffer};

use crate::error::{PipelineError, Result};
use crate::metrics::TransportMetrics;
use crate::producer::MqProducer;

const IDLE_WAIT: Duration = Duration::from_micros(200);
const NOT_READY_WAIT: Duration = Duration::from_millis(5);
const SEND_RETRY_WAIT: Duration = Duration::from_millis(1);

/// Worker-side tuning, resolved from [`TransportConfig`]
#[derive(Debug, Clone)]
pub(crate) struct TransportSettings {
    pub batch_size: usize,
    pub failure_threshold: u32,
    pub confirm_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl From<&TransportConfig> for TransportSettings {
    fn from(config: &TransportConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            failure_threshold: config.failure_threshold,
            confirm_interval: config.confirm_interval(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

/// Enqueue-side handle held by the ingest consumer
pub(crate) struct TransportSender {
    input: Producer<Record>,
    ready: Arc<AtomicBool>,
    metrics: Arc<TransportMetrics>,
}

impl Clone for TransportSender {
    fn clone(&self) -> Self {
        Self {
            input: self.input.clone(),
            ready: Arc::clone(&self.ready),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl TransportSender {
    /// Offer a record to the transport ring
    ///
    /// Refused (record handed back) while the backend is not ready or
    /// the ring is full; never blocks.
    pub fn enqueue(&self, record: Record) -> std::result::Result<(), Record> {
        if !self.ready.load(Ordering::Acquire) {
            self.metrics.record_rejected();
            return Err(record);
        }
        self.input.try_push(record).map(|_| ()).map_err(|e| {
            self.metrics.record_rejected();
            e.into_inner()
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// The transport stage handle
pub struct TransportStage {
    sender: TransportSender,
    handle: Option<JoinHandle<()>>,
}

impl TransportStage {
    /// Spawn the consumer thread around a backend producer
    pub(crate) fn spawn<P: MqProducer>(
        producer: P,
        capacity: usize,
        settings: TransportSettings,
        control: Sender<ControlMessage>,
        pool: Arc<RecordPool>,
    ) -> Result<Self> {
        let (input, ring) = RingBuffer::new(capacity);
        let ready = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(TransportMetrics::default());

        let worker = TransportWorker {
            ring,
            producer,
            ready: Arc::clone(&ready),
            control,
            pool,
            metrics: Arc::clone(&metrics),
            settings,
            pending: None,
            failures: 0,
            in_batch: 0,
            last_sent_id: 0,
            last_confirmed_id: 0,
            last_confirm_at: Instant::now(),
            last_probe_at: None,
        };
        let handle = std::thread::Builder::new()
            .name("ferry-transport".to_string())
            .spawn(move || worker.run())
            .map_err(|source| PipelineError::Spawn {
                thread: "transport",
                source,
            })?;

        Ok(Self {
            sender: TransportSender {
                input,
                ready,
                metrics,
            },
            handle: Some(handle),
        })
    }

    pub(crate) fn sender(&self) -> TransportSender {
        self.sender.clone()
    }

    /// Whether the backend is currently accepting records
    pub fn is_ready(&self) -> bool {
        self.sender.is_ready()
    }

    pub fn metrics(&self) -> Arc<TransportMetrics> {
        Arc::clone(&self.sender.metrics)
    }

    /// Stop accepting records; the worker drains what was published
    pub(crate) fn close(&self) {
        self.sender.input.close();
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("transport worker panicked");
            }
        }
    }
}

/// The consumer thread body
struct TransportWorker<P: MqProducer> {
    ring: Consumer<Record>,
    producer: P,
    ready: Arc<AtomicBool>,
    control: Sender<ControlMessage>,
    pool: Arc<RecordPool>,
    metrics: Arc<TransportMetrics>,
    settings: TransportSettings,

    /// A record whose send failed, retried before the ring is polled
    pending: Option<Record>,
    failures: u32,
    in_batch: usize,
    last_sent_id: u64,
    last_confirmed_id: u64,
    last_confirm_at: Instant,
    last_probe_at: Option<Instant>,
}

impl<P: MqProducer> TransportWorker<P> {
    fn run(mut self) {
        if self.producer.connect() {
            self.ready.store(true, Ordering::Release);
            tracing::info!("transport backend ready");
        } else {
            tracing::warn!("transport backend unavailable at startup");
        }

        loop {
            if !self.ready.load(Ordering::Relaxed) {
                if self.ring.is_closed() {
                    self.drop_remaining();
                    break;
                }
                self.probe();
                std::thread::sleep(NOT_READY_WAIT);
                continue;
            }

            match self.pending.take().or_else(|| self.ring.try_pop()) {
                Some(record) => self.send_one(record),
                None => {
                    self.flush_batch();
                    self.maybe_confirm(false);
                    if self.ring.is_drained() {
                        break;
                    }
                    self.ring.commit();
                    std::thread::sleep(IDLE_WAIT);
                }
            }
        }

        self.finish();
    }

    fn send_one(&mut self, record: Record) {
        if self.producer.send(&record) {
            self.failures = 0;
            self.last_sent_id = record.id();
            self.metrics.record_sent();
            self.pool.put(record.into_payload());
            self.in_batch += 1;
            if self.in_batch >= self.settings.batch_size {
                self.flush_batch();
                self.maybe_confirm(false);
            }
        } else {
            self.metrics.record_send_failure();
            self.failures += 1;
            self.pending = Some(record);
            if self.failures >= self.settings.failure_threshold {
                self.ready.store(false, Ordering::Release);
                tracing::warn!(failures = self.failures, "backend marked not ready");
            } else {
                std::thread::sleep(SEND_RETRY_WAIT);
            }
        }
    }

    fn flush_batch(&mut self) {
        if self.in_batch == 0 {
            return;
        }
        if self.producer.flush() {
            self.metrics.record_batch_flushed();
        } else {
            self.metrics.record_send_failure();
            self.failures += 1;
            if self.failures >= self.settings.failure_threshold {
                self.ready.store(false, Ordering::Release);
                tracing::warn!("backend marked not ready after flush failure");
            }
        }
        // Flushed or not, the producer owns these records now.
        self.in_batch = 0;
    }

    /// Report delivery progress to the ingest stage
    ///
    /// Emitted when the highest sent id changed; an unchanged id is
    /// re-sent at most once per confirm interval.
    fn maybe_confirm(&mut self, force: bool) {
        if self.last_sent_id == 0 {
            return;
        }
        let changed = self.last_sent_id != self.last_confirmed_id;
        if !force && !changed && self.last_confirm_at.elapsed() < self.settings.confirm_interval {
            return;
        }
        if self
            .control
            .send(ControlMessage::LastConfirmedSequence(self.last_sent_id))
            .is_ok()
        {
            self.metrics.record_confirmation();
        }
        self.last_confirmed_id = self.last_sent_id;
        self.last_confirm_at = Instant::now();
    }

    /// Heartbeat while not ready; a successful probe restores the flag
    fn probe(&mut self) {
        let due = match self.last_probe_at {
            None => true,
            Some(at) => at.elapsed() >= self.settings.heartbeat_interval,
        };
        if !due {
            return;
        }
        self.last_probe_at = Some(Instant::now());
        self.metrics.record_probe();

        let ok = if self.producer.is_connected() {
            self.producer.flush()
        } else {
            self.producer.connect()
        };
        if ok {
            self.failures = 0;
            self.ready.store(true, Ordering::Release);
            tracing::info!("transport backend ready");
        }
    }

    /// Shutdown with the backend down: count what cannot be delivered
    fn drop_remaining(&mut self) {
        let mut dropped = 0u64;
        if let Some(record) = self.pending.take() {
            self.pool.put(record.into_payload());
            dropped += 1;
        }
        while let Some(record) = self.ring.try_pop() {
            self.pool.put(record.into_payload());
            dropped += 1;
        }
        if dropped > 0 {
            self.metrics.record_dropped_at_close(dropped);
            tracing::warn!(dropped, "transport closed with backend down");
        }
    }

    fn finish(&mut self) {
        self.flush_batch();
        self.maybe_confirm(true);
        self.producer.close();
        self.ring.commit();
        tracing::debug!(
            sent = self.metrics.records_sent.load(Ordering::Relaxed),
            "transport worker finished"
        );
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;
