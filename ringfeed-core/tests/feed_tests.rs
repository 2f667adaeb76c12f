// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end tests for the shared byte channel.
//!
//! These exercise the channel the way the surrounding system does: one
//! context feeding live bytes in, the other pulling them out one at a time,
//! sharing nothing but the memory block.

use std::thread;

use ringfeed_core::{SharedMemoryBlock, SharedRingBuffer};

/// Total bytes streamed in the cross-thread test.
const STREAM_LEN: usize = 100_000;

/// Producer and consumer on separate threads, each with its own ring
/// instance attached to the same named block. The producer stays under the
/// capacity contract by polling `len()`; the consumer polls through the
/// not-available sentinel.
#[test]
fn test_cross_thread_stream_over_named_block() {
    let name = format!("ringfeed_stream_{}", std::process::id());
    let producer = SharedRingBuffer::allocate(&name, 4080).expect("ring creation failed");
    let consumer =
        SharedRingBuffer::attach(SharedMemoryBlock::open(&name).expect("open failed"))
            .expect("attach failed");

    let feeder = thread::spawn(move || {
        let limit = producer.capacity() - 1;
        for i in 0..STREAM_LEN {
            while producer.len() >= limit {
                thread::yield_now();
            }
            producer.append(&[(i % 251) as u8]);
        }
    });

    let mut received = Vec::with_capacity(STREAM_LEN);
    while received.len() < STREAM_LEN {
        match consumer.read() {
            Some(byte) => received.push(byte),
            None => thread::yield_now(),
        }
    }

    feeder.join().expect("producer thread panicked");
    assert_eq!(consumer.read(), None);

    for (i, &byte) in received.iter().enumerate() {
        assert_eq!(byte, (i % 251) as u8, "byte {} arrived out of order", i);
    }
}

/// A forked child appends through an anonymous shared mapping; the parent
/// observes every byte after the child exits.
#[test]
fn test_fork_child_feeds_parent() {
    let buffer =
        SharedRingBuffer::create(SharedMemoryBlock::anonymous(4096).expect("mapping failed"))
            .expect("ring creation failed");
    let payload: Vec<u8> = (0u8..=200).collect();

    // SAFETY: between fork and _exit the child only performs atomic stores
    // into the shared mapping; no allocation, locking, or unwinding.
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
        buffer.append(&payload);
        unsafe { libc::_exit(0) };
    }

    let mut status = 0;
    let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(waited, pid, "waitpid failed");

    let received: Vec<u8> = buffer.drain().collect();
    assert_eq!(received, payload);
}

/// The consumer-side input callback pattern: the sentinel means "no data
/// right now", and the same call site succeeds once the producer catches up.
#[test]
fn test_not_available_is_transient() {
    let name = format!("ringfeed_poll_{}", std::process::id());
    let producer =
        SharedRingBuffer::create(SharedMemoryBlock::create(&name, 4096).expect("create failed"))
            .expect("ring creation failed");
    let consumer =
        SharedRingBuffer::attach(SharedMemoryBlock::open(&name).expect("open failed"))
            .expect("attach failed");

    assert_eq!(consumer.read(), None);

    producer.append(b"A");
    assert_eq!(consumer.read(), Some(b'A'));
    assert_eq!(consumer.read(), None);

    // A cleared channel starts a fresh session through the same block.
    consumer.clear();
    producer.append(b"BC");
    assert_eq!(consumer.read(), Some(b'B'));
    assert_eq!(consumer.read(), Some(b'C'));
    assert_eq!(consumer.read(), None);
}
