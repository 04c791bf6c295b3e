//! Tests for the ring buffer

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crate::ring::{PushError, RingBuffer, PROGRESS_BATCH};

#[test]
fn test_capacity_rounds_up_to_power_of_two() {
    let (producer, _consumer) = RingBuffer::<u32>::new(100);
    assert_eq!(producer.capacity(), 128);

    let (producer, _consumer) = RingBuffer::<u32>::new(0);
    assert_eq!(producer.capacity(), 2);
}

#[test]
fn test_push_pop_in_order() {
    let (producer, mut consumer) = RingBuffer::new(8);

    for i in 0..5 {
        producer.try_push(i).unwrap();
    }

    for i in 0..5 {
        assert_eq!(consumer.try_pop(), Some(i));
    }
    assert_eq!(consumer.try_pop(), None);
}

#[test]
fn test_full_returns_value_back() {
    let (producer, _consumer) = RingBuffer::new(4);

    for i in 0..4 {
        producer.try_push(i).unwrap();
    }

    match producer.try_push(99) {
        Err(PushError::Full(v)) => assert_eq!(v, 99),
        other => panic!("expected Full, got {:?}", other),
    }
}

#[test]
fn test_closed_returns_value_back() {
    let (producer, _consumer) = RingBuffer::new(4);
    producer.close();

    match producer.try_push(7) {
        Err(PushError::Closed(v)) => assert_eq!(v, 7),
        other => panic!("expected Closed, got {:?}", other),
    }
}

#[test]
fn test_close_still_drains_published_values() {
    let (producer, mut consumer) = RingBuffer::new(8);

    producer.try_push(1).unwrap();
    producer.try_push(2).unwrap();
    producer.close();

    assert!(!consumer.is_drained());
    assert_eq!(consumer.try_pop(), Some(1));
    assert_eq!(consumer.try_pop(), Some(2));
    assert!(consumer.is_drained());
}

#[test]
fn test_progress_is_batched() {
    // Capacity 256 keeps the progress batch at the full 128.
    let (producer, mut consumer) = RingBuffer::new(256);

    for i in 0..256u64 {
        producer.try_push(i).unwrap();
    }

    // First pop publishes progress; the next 127 do not.
    assert_eq!(consumer.try_pop(), Some(0));
    producer.try_push(256).unwrap();

    for _ in 0..(PROGRESS_BATCH as usize - 1) {
        consumer.try_pop().unwrap();
    }

    // 128 consumed but only 1 published: producers still see ~full.
    match producer.try_push(999) {
        Err(PushError::Full(_)) => {}
        other => panic!("expected Full before commit, got {:?}", other),
    }

    // The 129th pop crosses the batch boundary and publishes.
    consumer.try_pop().unwrap();
    assert!(producer.try_push(999).is_ok());
}

#[test]
fn test_explicit_commit_reclaims_slots() {
    let (producer, mut consumer) = RingBuffer::new(256);

    for i in 0..256u64 {
        producer.try_push(i).unwrap();
    }
    for _ in 0..10 {
        consumer.try_pop().unwrap();
    }

    consumer.commit();

    for i in 0..9u64 {
        assert!(producer.try_push(1000 + i).is_ok());
    }
}

#[test]
fn test_unconsumed_distance() {
    let (producer, mut consumer) = RingBuffer::new(16);
    assert_eq!(consumer.unconsumed(), 0);

    for i in 0..10 {
        producer.try_push(i).unwrap();
    }
    assert_eq!(consumer.unconsumed(), 10);

    consumer.try_pop().unwrap();
    assert_eq!(consumer.unconsumed(), 9);
}

#[test]
fn test_wraparound_preserves_values() {
    let (producer, mut consumer) = RingBuffer::new(4);

    for round in 0..100u64 {
        for i in 0..3 {
            producer.try_push(round * 10 + i).unwrap();
        }
        consumer.commit();
        for i in 0..3 {
            assert_eq!(consumer.try_pop(), Some(round * 10 + i));
        }
        consumer.commit();
    }
}

#[test]
fn test_multi_producer_no_loss_no_duplicates() {
    let (producer, mut consumer) = RingBuffer::new(1024);
    let threads = 4;
    let per_thread = 25_000u64;
    let produced = Arc::new(AtomicU64::new(0));
    let dropped = Arc::new(AtomicU64::new(0));
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let mut handles = Vec::new();
    for t in 0..threads {
        let producer = producer.clone();
        let produced = Arc::clone(&produced);
        let dropped = Arc::clone(&dropped);
        handles.push(thread::spawn(move || {
            for i in 0..per_thread {
                let value = t * per_thread + i;
                match producer.try_push(value) {
                    Ok(_) => {
                        produced.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(PushError::Full(_)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        std::thread::yield_now();
                    }
                    Err(PushError::Closed(_)) => unreachable!(),
                }
            }
        }));
    }

    let done_flag = Arc::clone(&done);
    let consumer_handle = thread::spawn(move || {
        let mut seen = HashSet::new();
        loop {
            match consumer.try_pop() {
                Some(v) => {
                    assert!(seen.insert(v), "duplicate value {}", v);
                }
                None => {
                    consumer.commit();
                    if done_flag.load(Ordering::Acquire) {
                        match consumer.try_pop() {
                            Some(v) => {
                                assert!(seen.insert(v), "duplicate value {}", v);
                            }
                            None => break,
                        }
                    } else {
                        std::thread::yield_now();
                    }
                }
            }
        }
        seen.len() as u64
    });

    for handle in handles {
        handle.join().unwrap();
    }
    done.store(true, Ordering::Release);
    let consumed = consumer_handle.join().unwrap();

    assert_eq!(consumed, produced.load(Ordering::Relaxed));
    assert_eq!(
        consumed + dropped.load(Ordering::Relaxed),
        threads * per_thread
    );
}

#[test]
fn test_per_producer_order_is_preserved() {
    let (producer, mut consumer) = RingBuffer::new(64);
    let producer2 = producer.clone();

    let handle = thread::spawn(move || {
        for i in 0..1_000u64 {
            loop {
                if producer2.try_push(i).is_ok() {
                    break;
                }
                std::thread::yield_now();
            }
        }
    });

    let mut last = None;
    let mut count = 0;
    while count < 1_000 {
        if let Some(v) = consumer.try_pop() {
            if let Some(prev) = last {
                assert!(v > prev, "single-producer order violated");
            }
            last = Some(v);
            count += 1;
        } else {
            consumer.commit();
            std::thread::yield_now();
        }
    }

    handle.join().unwrap();
}
