//! # vela-pool
//!
//! Fixed-block, thread-safe pool allocator for the Vela rendering engine.
//!
//! The pool backs high-churn object sets in the resource subsystem: handle
//! tables, small descriptor objects, tagged resource slots. It constructs and
//! destroys values of a single type `T` in amortized O(1), from any number of
//! threads, without external synchronization.
//!
//! Two design points carry the whole crate:
//!
//! - **Tagged free stack.** Free blocks form an intrusive lock-free LIFO.
//!   The stack head is a 32-bit handle rather than a pointer, and every push
//!   stamps the handle with a fresh 16-bit generation, so the head CAS fails
//!   on a block that was popped, handed out, and recycled while a slow thread
//!   held a stale snapshot (the ABA hazard). A single 32-bit CAS suffices on
//!   every platform.
//! - **Puddle storage.** Blocks live in up to 256 lazily allocated "puddles"
//!   of 256 blocks each. Puddles are never moved or freed before the
//!   allocator is dropped, so a pointer returned by [`PoolAllocator::create`]
//!   stays valid until it is destroyed.
//!
//! ## Quick start
//!
//! ```rust
//! use vela_pool::PoolAllocator;
//!
//! struct DescriptorSlot {
//!     id: u32,
//!     binding: u16,
//! }
//!
//! let pool = PoolAllocator::<DescriptorSlot>::new();
//! let slot = pool.create(DescriptorSlot { id: 7, binding: 0 });
//! // ... hand the pointer to the resource table ...
//! unsafe { pool.destroy(slot) };
//! ```
//!
//! For scoped ownership there is [`PoolBox`], which returns its block to the
//! pool on drop.
//!
//! ## Features
//!
//! - `std` (default): standard library integration
//! - `logging`: emit `tracing` events on construction and puddle growth

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

extern crate alloc;

mod block;
mod config;
mod error;
mod handle;
mod pool;
mod pool_box;
mod raw;
mod stats;
mod traits;
mod utils;

pub use block::BlockState;
pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use pool::PoolAllocator;
pub use pool_box::PoolBox;
pub use stats::PoolStats;
pub use traits::MemoryUsage;

/// Maximum number of puddles per allocator.
pub const MAX_PUDDLES: usize = 256;

/// Number of blocks in every puddle.
pub const BLOCKS_PER_PUDDLE: usize = 256;

/// Hard ceiling on live blocks per allocator.
pub const MAX_BLOCKS: usize = MAX_PUDDLES * BLOCKS_PER_PUDDLE;

/// Size in bytes of the intrusive header that precedes every payload.
pub const HEADER_SIZE: usize = 16;

pub mod prelude {
    //! Convenient re-exports of the commonly used types.

    pub use crate::{
        BlockState, MemoryUsage, PoolAllocator, PoolBox, PoolConfig, PoolError, PoolResult,
        PoolStats,
    };
}
