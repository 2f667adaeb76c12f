//! Ringfeed Core Library
//!
//! Lock-free, fixed-capacity byte channel between exactly two execution
//! contexts sharing a single memory block: one producer streaming live
//! input bytes in, one consumer pulling them out one at a time from inside
//! a byte-oriented input callback. No locks, no blocking, no flow control -
//! only atomic index counters and direct byte writes.

pub mod error;
pub mod shm;

// Re-export commonly used types
pub use error::{FeedError, FeedResult};
pub use shm::{Drain, RingSnapshot, SharedMemoryBlock, SharedRingBuffer};
