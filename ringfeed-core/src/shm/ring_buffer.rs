// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Lock-free circular byte buffer over a shared memory block.
//!
//! Uses atomic read/write index counters for wait-free single-producer
//! single-consumer streaming between two execution contexts that share
//! nothing but the block.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::error::{FeedError, FeedResult};
use crate::shm::SharedMemoryBlock;

/// Number of u32 counter slots in the header.
const HEADER_SLOTS: usize = 4;

/// Header size in bytes.
pub const HEADER_SIZE: usize = HEADER_SLOTS * std::mem::size_of::<u32>();

/// Ring buffer header stored at the start of the block.
///
/// The two spare slots are part of the on-wire layout and are never read or
/// written; attached peers must agree on the 16-byte body offset.
#[repr(C)]
struct RingHeader {
    /// Next body offset the consumer will read from (owned by consumer).
    read: AtomicU32,
    /// Next body offset the producer will write to (owned by producer).
    write: AtomicU32,
    /// Spare counter slots, present in the layout but unused.
    spare: [AtomicU32; 2],
}

/// Lock-free SPSC byte channel over shared memory.
///
/// The block starts with a [`RingHeader`]; the remaining `C` bytes form the
/// circular body. Both indices stay in `0..C` and advance via
/// `(index + 1) % C`. Occupancy is `(write - read) mod C`, so the empty
/// state (`read == write`) is indistinguishable from "exactly `C` bytes
/// outstanding" and only `C - 1` bytes may safely be unread at once.
///
/// Exactly one context may call [`append`](Self::append) and exactly one may
/// call [`read`](Self::read) for the lifetime of the channel. There is no
/// flow control and no end-of-stream signal; both belong to the surrounding
/// protocol.
pub struct SharedRingBuffer {
    /// Underlying shared memory block.
    block: SharedMemoryBlock,
    /// Body capacity in bytes (block size minus header).
    capacity: u32,
}

impl SharedRingBuffer {
    /// Create a new ring buffer over a freshly allocated block.
    ///
    /// Stores zero into both index counters. Hand the block's name (see
    /// [`SharedMemoryBlock::name`]) to the peer context so it can open the
    /// block and [`attach`](Self::attach).
    pub fn create(block: SharedMemoryBlock) -> FeedResult<Self> {
        let buffer = Self::over(block)?;

        let header = buffer.header();
        header.read.store(0, Ordering::Release);
        header.write.store(0, Ordering::Release);

        tracing::debug!(capacity = buffer.capacity, "Created ring buffer");

        Ok(buffer)
    }

    /// Attach to a ring buffer that the peer context already created.
    ///
    /// The counters are left as found. Fails if the block cannot hold the
    /// header plus at least one body byte, or if the counters are outside
    /// the body (a block that was never initialized as a ring).
    pub fn attach(block: SharedMemoryBlock) -> FeedResult<Self> {
        let buffer = Self::over(block)?;

        let header = buffer.header();
        let read = header.read.load(Ordering::Acquire);
        let write = header.write.load(Ordering::Acquire);
        if read >= buffer.capacity || write >= buffer.capacity {
            return Err(FeedError::HeaderOutOfRange {
                read,
                write,
                capacity: buffer.capacity,
            });
        }

        tracing::debug!(capacity = buffer.capacity, "Attached to ring buffer");

        Ok(buffer)
    }

    /// Allocate a named block sized for `capacity` body bytes plus the
    /// header, and create a ring buffer over it.
    ///
    /// The name is the handle the peer context uses to open and attach.
    pub fn allocate(name: &str, capacity: usize) -> FeedResult<Self> {
        let block = SharedMemoryBlock::create(name, capacity.saturating_add(HEADER_SIZE))?;
        Self::create(block)
    }

    /// Like [`allocate`](Self::allocate), over an anonymous mapping shared
    /// with threads or forked children instead of a named object.
    pub fn allocate_anonymous(capacity: usize) -> FeedResult<Self> {
        let block = SharedMemoryBlock::anonymous(capacity.saturating_add(HEADER_SIZE))?;
        Self::create(block)
    }

    fn over(block: SharedMemoryBlock) -> FeedResult<Self> {
        let size = block.size();
        if size < HEADER_SIZE + 1 {
            return Err(FeedError::BlockTooSmall {
                size,
                min: HEADER_SIZE + 1,
            });
        }

        let capacity = (size - HEADER_SIZE) as u32;
        Ok(Self { block, capacity })
    }

    /// Get the body capacity in bytes.
    ///
    /// At most `capacity() - 1` bytes may be unread at any moment.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Borrow the underlying block (e.g. to pass its name to the peer).
    pub fn block(&self) -> &SharedMemoryBlock {
        &self.block
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: the block holds at least HEADER_SIZE bytes (validated in
        // `over`) and mmap returns page-aligned memory, so the cast is
        // in-bounds and aligned for the atomic counters.
        unsafe { &*(self.block.as_ptr() as *const RingHeader) }
    }

    fn slot(&self, index: u32) -> &AtomicU8 {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity and the body spans `capacity` bytes
        // starting HEADER_SIZE into the block.
        unsafe { &*(self.block.as_ptr().add(HEADER_SIZE + index as usize) as *const AtomicU8) }
    }

    /// Get the occupied byte count.
    ///
    /// One atomic load per counter: an instantaneous best-effort snapshot.
    /// The peer may mutate either counter the moment this returns; callers
    /// must treat the value as stale. Safe to call from either side.
    pub fn len(&self) -> usize {
        let header = self.header();
        let read = header.read.load(Ordering::Acquire);
        let write = header.write.load(Ordering::Acquire);
        ((write + self.capacity - read) % self.capacity) as usize
    }

    /// Whether the channel currently holds no unread bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append bytes to the channel. Producer side only.
    ///
    /// Each byte is stored at the current write offset, then the write index
    /// advances by one modulo the capacity. No bounds check is performed:
    /// if the number of unread bytes would exceed `capacity() - 1`, the
    /// write silently laps the reader and corrupts unread data. Keeping
    /// under that bound is the caller's contract (e.g. by polling
    /// [`len`](Self::len) or via an out-of-band readiness signal).
    ///
    /// Calling this from more than one context is undefined.
    pub fn append(&self, bytes: &[u8]) {
        let header = self.header();
        let mut write = header.write.load(Ordering::Relaxed);
        for &byte in bytes {
            self.slot(write).store(byte, Ordering::Relaxed);
            write = (write + 1) % self.capacity;
            // Publish the byte before the consumer can see the new index.
            header.write.store(write, Ordering::Release);
        }
    }

    /// Read the next byte, or `None` if no data is currently available.
    /// Consumer side only.
    ///
    /// `None` is transient ("nothing right now"), not end-of-stream; the
    /// latter is signaled by the surrounding protocol. On success the read
    /// index advances by one modulo the capacity.
    ///
    /// Calling this from more than one context is undefined.
    pub fn read(&self) -> Option<u8> {
        let header = self.header();
        let read = header.read.load(Ordering::Relaxed);
        let write = header.write.load(Ordering::Acquire);
        if read == write {
            return None;
        }

        let byte = self.slot(read).load(Ordering::Relaxed);
        // Release the slot back to the producer only after the byte is out.
        header.read.store((read + 1) % self.capacity, Ordering::Release);
        Some(byte)
    }

    /// Drain the currently available bytes. Consumer side only.
    ///
    /// Lazy and finite: yields [`read`](Self::read) results until the
    /// not-available sentinel, then stays exhausted. If the producer races
    /// ahead mid-drain the iterator may stop before bytes appended later;
    /// what it yields is always a consistent prefix of the stream.
    pub fn drain(&self) -> Drain<'_> {
        Drain {
            buffer: self,
            done: false,
        }
    }

    /// Reset both index counters to zero.
    ///
    /// Exclusive maintenance operation for reuse between idle sessions: not
    /// safe while the peer is appending or reading. Body bytes are left in
    /// place; occupancy alone defines the channel state.
    pub fn clear(&self) {
        let header = self.header();
        header.read.store(0, Ordering::Release);
        header.write.store(0, Ordering::Release);

        tracing::debug!("Cleared ring buffer");
    }

    /// Copy out the raw header counters and body bytes.
    ///
    /// Diagnostics only; carries no behavioral contract and the result may
    /// be stale the instant it is produced.
    pub fn snapshot(&self) -> RingSnapshot {
        let header = self.header();
        let body = (0..self.capacity)
            .map(|i| self.slot(i).load(Ordering::Relaxed))
            .collect();

        RingSnapshot {
            read: header.read.load(Ordering::Acquire),
            write: header.write.load(Ordering::Acquire),
            spare: [
                header.spare[0].load(Ordering::Relaxed),
                header.spare[1].load(Ordering::Relaxed),
            ],
            body,
        }
    }
}

/// Iterator over the bytes currently available in a [`SharedRingBuffer`].
pub struct Drain<'a> {
    buffer: &'a SharedRingBuffer,
    done: bool,
}

impl Iterator for Drain<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.done {
            return None;
        }
        let next = self.buffer.read();
        if next.is_none() {
            self.done = true;
        }
        next
    }
}

/// Raw header and body contents, for diagnostics.
#[derive(Debug, Clone)]
pub struct RingSnapshot {
    /// Consumer index counter.
    pub read: u32,
    /// Producer index counter.
    pub write: u32,
    /// Unused header slots.
    pub spare: [u32; 2],
    /// Copy of the circular body storage.
    pub body: Vec<u8>,
}
