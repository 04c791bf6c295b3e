//! Pipeline assembly
//!
//! An explicit, externally-owned handle: the embedding application
//! builds one [`Pipeline`], keeps it wherever it keeps its other
//! long-lived services, and tears it down with [`Pipeline::shutdown`].
//! There is deliberately no process-wide singleton.

use std::sync::Arc;

use crossbeam::channel::unbounded;
use ferry_config::PipelineConfig;
use ferry_overflow::{OverflowConfig, OverflowMetrics, OverflowMetricsSnapshot, OverflowStore};
use ferry_protocol::{LogEvent, RecordCodec, RecordPool};

use crate::error::{PipelineError, Result};
use crate::ingest::{IngestSettings, IngestStage};
use crate::metrics::{IngestMetricsSnapshot, TransportMetricsSnapshot};
use crate::producer::MqProducer;
use crate::transport::{TransportSettings, TransportStage};

/// Payload buffer size handed out by the record pool
const POOL_BUFFER_CAPACITY: usize = 4096;

/// The assembled log-shipping pipeline
///
/// Two worker threads (ingest consumer, transport consumer) plus the
/// overflow store's disk writer. `enqueue` is safe from any number of
/// application threads and never blocks.
pub struct Pipeline<E: LogEvent> {
    ingest: IngestStage<E>,
    transport: TransportStage,
    overflow_metrics: Arc<OverflowMetrics>,
}

impl<E: LogEvent> Pipeline<E> {
    /// Validate the configuration, open the overflow store, and spawn
    /// the worker threads
    pub fn start<C, P>(config: PipelineConfig, codec: C, producer: P) -> Result<Self>
    where
        C: RecordCodec<E> + 'static,
        P: MqProducer,
    {
        config.validate()?;
        if !config.enabled {
            return Err(PipelineError::Disabled);
        }

        let pool = Arc::new(RecordPool::new(
            config.transport_capacity,
            POOL_BUFFER_CAPACITY,
        ));
        let (control_tx, control_rx) = unbounded();

        let overflow = OverflowStore::open(
            OverflowConfig::new(&config.overflow.dir)
                .with_prefix(&config.overflow.file_prefix)
                .with_capacity_bytes(config.overflow.capacity_bytes)
                .with_buffer_capacity(config.overflow.buffer_capacity)
                .with_segment_capacity(config.overflow.segment_capacity)
                .with_max_segments(config.overflow.max_segments),
        )?;
        let overflow_metrics = overflow.metrics_handle();

        let transport = TransportStage::spawn(
            producer,
            config.transport_capacity,
            TransportSettings::from(&config.transport),
            control_tx,
            Arc::clone(&pool),
        )?;

        let drain_timeout = config.drain_timeout();
        let ingest = IngestStage::spawn(
            codec,
            transport.sender(),
            overflow,
            control_rx,
            IngestSettings {
                capacity: config.ingest_capacity,
                shard: config.shard,
                exclude_categories: config.exclude_categories,
                drain_timeout,
            },
            pool,
        )?;

        tracing::info!(shard = config.shard, "pipeline started");
        Ok(Self {
            ingest,
            transport,
            overflow_metrics,
        })
    }

    /// Offer an event to the pipeline; never blocks
    ///
    /// `false` means the event was dropped (ring full or shutting
    /// down) and counted.
    pub fn enqueue(&self, event: E) -> bool {
        self.ingest.enqueue(event)
    }

    /// Whether the transport currently accepts records directly
    pub fn is_backend_ready(&self) -> bool {
        self.transport.is_ready()
    }

    pub fn ingest_metrics(&self) -> IngestMetricsSnapshot {
        self.ingest.metrics().snapshot()
    }

    pub fn transport_metrics(&self) -> TransportMetricsSnapshot {
        self.transport.metrics().snapshot()
    }

    pub fn overflow_metrics(&self) -> OverflowMetricsSnapshot {
        self.overflow_metrics.snapshot()
    }

    /// Graceful, bounded shutdown
    ///
    /// Stops intake, lets the ingest consumer drain its ring and spend
    /// the configured drain budget replaying the overflow store, then
    /// persists whatever remains and stops the transport after a final
    /// flush and confirmation.
    pub fn shutdown(mut self) {
        self.ingest.close_input();
        self.ingest.join();
        self.transport.close();
        self.transport.join();
        tracing::info!("pipeline stopped");
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
