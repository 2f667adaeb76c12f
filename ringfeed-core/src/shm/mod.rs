// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared memory byte channel.
//!
//! A single contiguous block visible to two execution contexts, carrying a
//! lock-free SPSC ring buffer for streaming bytes without locks or copies.

mod block;
mod ring_buffer;

pub use block::{SharedMemoryBlock, MAX_BLOCK_SIZE};
pub use ring_buffer::{Drain, RingSnapshot, SharedRingBuffer, HEADER_SIZE};
