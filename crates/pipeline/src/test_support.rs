//! Shared fixtures for the stage tests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ferry_protocol::{RawEvent, Record};
use parking_lot::Mutex;

use crate::producer::MqProducer;

/// Observable backend state shared between a test and its producer
#[derive(Debug, Default)]
pub struct StubBackend {
    pub sent: Mutex<Vec<(u64, Vec<u8>)>>,
    pub healthy: AtomicBool,
    pub connected: AtomicBool,
    pub flushes: AtomicU64,
    pub send_delay_ms: AtomicU64,
}

impl StubBackend {
    pub fn new(healthy: bool) -> Arc<Self> {
        let backend = Arc::new(Self::default());
        backend.healthy.store(healthy, Ordering::Release);
        backend
    }

    pub fn producer(self: &Arc<Self>) -> StubProducer {
        StubProducer {
            backend: Arc::clone(self),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    /// Make every `send` take at least this long, simulating a slow link
    pub fn set_send_delay(&self, delay: Duration) {
        self.send_delay_ms
            .store(delay.as_millis() as u64, Ordering::Release);
    }

    pub fn sent_ids(&self) -> Vec<u64> {
        self.sent.lock().iter().map(|(id, _)| *id).collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

/// In-memory [`MqProducer`] whose health a test flips at will
pub struct StubProducer {
    backend: Arc<StubBackend>,
}

impl MqProducer for StubProducer {
    fn connect(&mut self) -> bool {
        let ok = self.backend.healthy.load(Ordering::Acquire);
        self.backend.connected.store(ok, Ordering::Release);
        ok
    }

    fn is_connected(&self) -> bool {
        self.backend.connected.load(Ordering::Acquire)
    }

    fn send(&mut self, record: &Record) -> bool {
        let delay = self.backend.send_delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if !self.backend.healthy.load(Ordering::Acquire) {
            return false;
        }
        self.backend
            .sent
            .lock()
            .push((record.id(), record.payload().to_vec()));
        true
    }

    fn flush(&mut self) -> bool {
        if !self.backend.healthy.load(Ordering::Acquire) {
            return false;
        }
        self.backend.flushes.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn close(&mut self) {
        self.backend.connected.store(false, Ordering::Release);
    }
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

pub fn event(category: &str, payload: &[u8]) -> RawEvent {
    RawEvent {
        category: category.to_string(),
        bytes: payload.to_vec(),
    }
}
