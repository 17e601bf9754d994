//! The typed pool allocator surface.

use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ptr::{self, NonNull};

#[cfg(feature = "logging")]
use tracing::debug;

use crate::block::{stride_for, BlockHeader};
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::raw::RawPool;
use crate::stats::PoolStats;
use crate::traits::MemoryUsage;
use crate::{BLOCKS_PER_PUDDLE, HEADER_SIZE, MAX_BLOCKS};

/// Fixed-block, thread-safe pool allocator for values of type `T`.
///
/// Blocks live in up to 256 lazily allocated puddles of 256 blocks each, so
/// one pool serves at most [`MAX_BLOCKS`] simultaneously live values. Free
/// blocks form an intrusive lock-free LIFO whose head is a generation-tagged
/// 32-bit handle; see the [crate docs](crate) for the ABA argument.
///
/// # Memory layout
///
/// ```text
/// puddles[0] ──► [hdr|payload][hdr|payload] ... 256 blocks, fixed stride
/// puddles[1] ──► [hdr|payload][hdr|payload] ...
///    ...              │
///                     └── free blocks link through their headers
/// ```
///
/// Puddles are never moved or freed while the pool is alive: a pointer
/// returned by [`create`](Self::create) stays valid until it is passed to
/// [`destroy`](Self::destroy).
///
/// # Dropping
///
/// Dropping the pool returns every puddle to the global allocator without
/// inspecting block states. Values still live at that point do not have
/// their destructors run; drain the pool first if `T` owns resources.
pub struct PoolAllocator<T> {
    raw: RawPool,
    _marker: PhantomData<T>,
}

impl<T> PoolAllocator<T> {
    /// Creates an empty pool with the default configuration.
    ///
    /// No memory is allocated until the first
    /// [`create`](Self::create).
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or requires alignment above
    /// [`HEADER_SIZE`] bytes. Both are configuration errors: this allocator
    /// trades that flexibility for its fixed two-level layout.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Creates an empty pool with an explicit configuration.
    ///
    /// # Panics
    ///
    /// Same conditions as [`new`](Self::new).
    pub fn with_config(config: PoolConfig) -> Self {
        assert!(size_of::<T>() > 0, "pool payload type must not be zero-sized");
        assert!(
            align_of::<T>() <= HEADER_SIZE,
            "pool payload alignment {} exceeds the {HEADER_SIZE}-byte block alignment",
            align_of::<T>(),
        );

        let stride = stride_for(size_of::<T>());

        #[cfg(feature = "logging")]
        debug!(
            payload = core::any::type_name::<T>(),
            stride, "created pool allocator"
        );

        Self {
            raw: RawPool::new(stride, config),
            _marker: PhantomData,
        }
    }

    /// Creates an empty pool with [`PoolConfig::production`].
    ///
    /// # Panics
    ///
    /// Same conditions as [`new`](Self::new).
    pub fn production() -> Self {
        Self::with_config(PoolConfig::production())
    }

    /// Creates an empty pool with [`PoolConfig::debug`].
    ///
    /// # Panics
    ///
    /// Same conditions as [`new`](Self::new).
    pub fn debug() -> Self {
        Self::with_config(PoolConfig::debug())
    }

    /// Creates an empty pool with [`PoolConfig::performance`].
    ///
    /// # Panics
    ///
    /// Same conditions as [`new`](Self::new).
    pub fn performance() -> Self {
        Self::with_config(PoolConfig::performance())
    }

    /// Allocates a block and moves `value` into it.
    ///
    /// Grows by one puddle when the free stack is empty.
    ///
    /// # Panics
    ///
    /// Panics when the pool has reached its [`MAX_BLOCKS`] ceiling. A pool
    /// that can hit the ceiling under normal operation is mis-sized; use
    /// [`try_create`](Self::try_create) to observe the condition instead.
    pub fn create(&self, value: T) -> NonNull<T> {
        match self.try_create(value) {
            Ok(ptr) => ptr,
            Err(err) => panic!("{err}"),
        }
    }

    /// Allocates a block and moves `value` into it, surfacing capacity
    /// exhaustion as an error.
    pub fn try_create(&self, value: T) -> PoolResult<NonNull<T>> {
        let block = loop {
            match self.raw.pop() {
                Some(block) => break block,
                // Empty stack: grow and retry. Another thread may drain the
                // fresh puddle before this one gets back to it, hence the
                // loop rather than a single retry.
                None => self.raw.grow_one()?,
            }
        };

        let payload = Self::payload_of(block);
        // SAFETY: the payload region is `stride - HEADER_SIZE >=
        // size_of::<T>()` bytes, aligned to at least `align_of::<T>()`
        // (blocks are header-aligned and the constructor bounds the payload
        // alignment), and exclusively owned after the pop.
        unsafe { ptr::write(payload.as_ptr(), value) };

        self.raw.record_create();
        Ok(payload)
    }

    /// Destroys a value previously returned by [`create`](Self::create) or
    /// [`try_create`](Self::try_create), returning its block to the free
    /// stack.
    ///
    /// With `validate_on_destroy` set (the debug default), a pointer that
    /// fails [`check_live`](Self::check_live) — foreign, mid-block, or
    /// already destroyed — aborts here instead of corrupting the free stack.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this pool's `create`/`try_create` and must not
    /// have been passed to `destroy` since.
    pub unsafe fn destroy(&self, ptr: NonNull<T>) {
        if self.raw.config().validate_on_destroy {
            if let Err(err) = self.check_live(ptr.as_ptr()) {
                panic!("destroy() rejected: {err}");
            }
        }

        // SAFETY: caller guarantees the value is live and exclusively held.
        unsafe { ptr::drop_in_place(ptr.as_ptr()) };
        // SAFETY: caller guarantees `ptr` came from this pool.
        unsafe { self.recycle(ptr) };
    }

    /// Returns a block to the free stack without dropping the payload.
    ///
    /// # Safety
    ///
    /// Same contract as [`destroy`](Self::destroy); the payload must already
    /// have been dropped or moved out.
    pub(crate) unsafe fn recycle(&self, ptr: NonNull<T>) {
        // SAFETY: every payload sits exactly HEADER_SIZE bytes after its
        // header, in the same puddle allocation.
        let block = unsafe {
            NonNull::new_unchecked(ptr.as_ptr().cast::<u8>().sub(HEADER_SIZE).cast::<BlockHeader>())
        };
        self.raw.record_destroy();
        // SAFETY: the header belongs to this pool and its block is not on
        // the free stack (caller's contract).
        unsafe { self.raw.push(block) };
    }

    /// Checks whether `ptr` falls inside one of this pool's puddles.
    ///
    /// O(puddles); meant for validation, not the hot path.
    pub fn contains(&self, ptr: *const T) -> bool {
        self.raw.contains(ptr.cast())
    }

    /// Ownership check surfaced as a result, for callers embedding their own
    /// validation.
    pub fn check_owned(&self, ptr: *const T) -> PoolResult<()> {
        if self.contains(ptr) {
            Ok(())
        } else {
            Err(PoolError::ForeignPointer { addr: ptr as usize })
        }
    }

    /// Validates that `ptr` is a payload this pool handed out and has not
    /// destroyed since: the checked form of the assertions
    /// [`destroy`](Self::destroy) runs under `validate_on_destroy`.
    ///
    /// Reports [`PoolError::ForeignPointer`] for pointers outside the
    /// puddles or off a block boundary, and [`PoolError::InvalidState`] for
    /// a block that is already free (a double destroy).
    pub fn check_live(&self, ptr: *const T) -> PoolResult<()> {
        self.raw.check_live_payload(ptr.cast())
    }

    /// Byte distance between consecutive blocks.
    pub fn stride(&self) -> usize {
        self.raw.stride()
    }

    /// Number of puddles allocated so far.
    pub fn puddle_count(&self) -> usize {
        self.raw.num_puddles()
    }

    /// Block capacity of the puddles allocated so far.
    ///
    /// Grows with the pool, up to [`MAX_BLOCKS`].
    pub fn capacity(&self) -> usize {
        self.puddle_count() * BLOCKS_PER_PUDDLE
    }

    /// Number of currently live values.
    pub fn live_blocks(&self) -> usize {
        self.raw.live()
    }

    /// Number of blocks currently on the free stack.
    pub fn free_blocks(&self) -> usize {
        self.capacity().saturating_sub(self.live_blocks())
    }

    /// Checks whether no values are live.
    pub fn is_empty(&self) -> bool {
        self.live_blocks() == 0
    }

    /// Statistics snapshot, when `track_stats` is configured.
    pub fn stats(&self) -> Option<PoolStats> {
        if !self.raw.config().track_stats {
            return None;
        }
        Some(PoolStats {
            total_creates: self.raw.creates(),
            total_destroys: self.raw.destroys(),
            peak_live: self.raw.peak_live(),
            live_blocks: self.live_blocks(),
            free_blocks: self.free_blocks(),
            puddles: self.puddle_count(),
            capacity: self.capacity(),
            stride: self.stride(),
        })
    }

    fn payload_of(block: NonNull<BlockHeader>) -> NonNull<T> {
        // SAFETY: the payload directly follows the header within the same
        // allocation, so the offset pointer is non-null.
        unsafe { NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(HEADER_SIZE).cast::<T>()) }
    }
}

impl<T> Default for PoolAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryUsage for PoolAllocator<T> {
    fn used_memory(&self) -> usize {
        self.live_blocks() * self.stride()
    }

    fn available_memory(&self) -> Option<usize> {
        Some((MAX_BLOCKS - self.live_blocks()) * self.stride())
    }
}

// SAFETY: PoolAllocator<T> is Send when T is Send.
// - All shared state is atomics plus write-once puddle pointers
// - Sending the pool also sends the T values still stored in its blocks
// - Dropping on another thread only returns puddle memory to the global
//   allocator
unsafe impl<T: Send> Send for PoolAllocator<T> {}

// SAFETY: PoolAllocator<T> is Sync when T is Send.
// - create/destroy move T values between threads but never hand out &T to
//   a value another thread owns
// - Free-stack mutation goes through the generation-tagged head CAS
// - Puddle slots are pre-reserved via fetch-add and written exactly once
//   before any handle into them is published
unsafe impl<T: Send> Sync for PoolAllocator<T> {}
