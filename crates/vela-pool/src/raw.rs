//! Untyped pool engine: the puddle table and the tagged lock-free free stack.
//!
//! # Safety
//!
//! The engine hands out fixed-stride blocks from up to 256 lazily allocated
//! puddles of 256 blocks each:
//!
//! - A puddle slot is reserved with a relaxed fetch-add and written exactly
//!   once; puddles are never moved or freed before the engine is dropped, so
//!   every block address is stable for the engine's lifetime.
//! - Free blocks form an intrusive LIFO threaded through their headers. The
//!   stack head is a 32-bit [`Handle`] whose high 16 bits are a generation
//!   stamped on every push; the head CAS therefore fails when a stalled
//!   thread holds a snapshot of a block that was recycled in the interim
//!   (the ABA hazard).
//! - Publication rides exclusively on the head CAS (release on success,
//!   acquire on load) plus acquire loads of the puddle slot pointers. Header
//!   fields are relaxed atomics: a stalled popper may read them while another
//!   thread recycles the block, and the CAS arbitrates who wins.
//!
//! ## Invariants
//!
//! - The low 16 bits of a block's tag are assigned at puddle initialization
//!   and never change.
//! - A block is in exactly one of three states: initial (never allocated),
//!   free (reachable from the head), used (held by a caller). A used block's
//!   `next` field is the sentinel.
//! - The generation half of the head strictly increases across successful
//!   pushes, modulo 2^16.

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use alloc::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};

#[cfg(feature = "logging")]
use tracing::debug;

use crate::block::{BlockHeader, BlockState};
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::handle::Handle;
use crate::utils::Backoff;
use crate::{BLOCKS_PER_PUDDLE, HEADER_SIZE, MAX_BLOCKS, MAX_PUDDLES};

/// The untyped engine behind [`PoolAllocator`](crate::PoolAllocator).
///
/// Works purely in strides and headers; the typed surface layers payload
/// construction on top.
pub(crate) struct RawPool {
    /// Byte distance between consecutive blocks.
    stride: usize,

    /// Layout of every puddle: `BLOCKS_PER_PUDDLE * stride` bytes, aligned
    /// to the header size.
    puddle_layout: Layout,

    /// Free-stack head: handle bits of the top free block, or the sentinel.
    head: AtomicU32,

    /// Monotonic generation source; its low 16 bits stamp every push.
    generation: AtomicU32,

    /// Number of reserved puddle slots.
    num_puddles: AtomicUsize,

    /// Lazily allocated puddle base pointers. A slot is written exactly once
    /// and published before any handle into it reaches the free stack.
    puddles: [AtomicPtr<u8>; MAX_PUDDLES],

    config: PoolConfig,

    /// Live-block count, maintained unconditionally for capacity queries.
    live: AtomicUsize,

    // Recorded only when `config.track_stats`.
    creates: AtomicU64,
    destroys: AtomicU64,
    peak_live: AtomicUsize,
}

impl RawPool {
    /// Creates an empty engine for the given stride.
    ///
    /// # Panics
    ///
    /// Panics if the stride is not a multiple of the header size, is smaller
    /// than two headers, or produces an invalid puddle layout. These are
    /// configuration errors, not runtime conditions.
    pub(crate) fn new(stride: usize, config: PoolConfig) -> Self {
        assert!(
            stride % HEADER_SIZE == 0,
            "block stride {stride} must be a multiple of the {HEADER_SIZE}-byte header"
        );
        assert!(
            stride >= 2 * HEADER_SIZE,
            "block stride {stride} must hold a header and at least a header-sized payload"
        );

        let bytes = match BLOCKS_PER_PUDDLE.checked_mul(stride) {
            Some(bytes) => bytes,
            None => panic!("block stride {stride} overflows the puddle size"),
        };
        let puddle_layout = match Layout::from_size_align(bytes, HEADER_SIZE) {
            Ok(layout) => layout,
            Err(_) => panic!("block stride {stride} produces an invalid puddle layout"),
        };

        Self {
            stride,
            puddle_layout,
            head: AtomicU32::new(Handle::NONE.bits()),
            generation: AtomicU32::new(0),
            num_puddles: AtomicUsize::new(0),
            puddles: [const { AtomicPtr::new(ptr::null_mut()) }; MAX_PUDDLES],
            config,
            live: AtomicUsize::new(0),
            creates: AtomicU64::new(0),
            destroys: AtomicU64::new(0),
            peak_live: AtomicUsize::new(0),
        }
    }

    pub(crate) fn stride(&self) -> usize {
        self.stride
    }

    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn num_puddles(&self) -> usize {
        self.num_puddles.load(Ordering::Relaxed).min(MAX_PUDDLES)
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub(crate) fn creates(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    pub(crate) fn destroys(&self) -> u64 {
        self.destroys.load(Ordering::Relaxed)
    }

    pub(crate) fn peak_live(&self) -> usize {
        self.peak_live.load(Ordering::Relaxed)
    }

    fn payload_len(&self) -> usize {
        self.stride - HEADER_SIZE
    }

    /// Resolves a handle's identity half to its block header.
    ///
    /// # Safety
    ///
    /// `handle` must name a block of an initialized puddle of this engine.
    /// Every handle that has ever reached the free stack satisfies this: the
    /// slot pointer is published before the puddle's first push.
    unsafe fn block_at(&self, handle: Handle) -> *mut BlockHeader {
        let base = self.puddles[handle.puddle() as usize].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "handle into an unpublished puddle");
        // SAFETY: caller guarantees the puddle is initialized, so `base` is a
        // live allocation of `puddle_layout` bytes and the element offset is
        // in bounds.
        unsafe { base.add(handle.element() as usize * self.stride).cast::<BlockHeader>() }
    }

    /// Pops the top free block, or returns `None` when the stack is empty.
    pub(crate) fn pop(&self) -> Option<NonNull<BlockHeader>> {
        let mut backoff = self.config.use_backoff.then(Backoff::new);

        loop {
            let observed = Handle::from_bits(self.head.load(Ordering::Acquire));
            if observed.is_none() {
                return None;
            }

            // SAFETY: a non-sentinel head always names a published block;
            // blocks are never freed, so the address stays valid even if the
            // head moves on before the CAS below.
            let block = unsafe { self.block_at(observed) };
            // SAFETY: `block` points to an initialized header (see above).
            // The relaxed read may be stale; the CAS detects that.
            let next = unsafe { (*block).next() };

            match self.head.compare_exchange_weak(
                observed.bits(),
                next.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // The block is ours: no other thread can pop it until it
                    // is pushed again.
                    // SAFETY: `block` is valid (see above) and exclusively
                    // owned from here on.
                    let header = unsafe { &*block };
                    debug_assert_eq!(
                        header.state(),
                        Some(BlockState::Free),
                        "popped a block that was not on the free stack"
                    );
                    if let Some(pattern) = self.config.alloc_pattern {
                        // SAFETY: the payload region spans
                        // `stride - HEADER_SIZE` bytes directly behind the
                        // header, inside the same puddle allocation.
                        unsafe {
                            ptr::write_bytes(
                                block.cast::<u8>().add(HEADER_SIZE),
                                pattern,
                                self.payload_len(),
                            );
                        }
                    }
                    header.set_next(Handle::NONE);
                    header.set_state(BlockState::Used);
                    // SAFETY: `block` was derived from a non-null puddle base.
                    return Some(unsafe { NonNull::new_unchecked(block) });
                }
                Err(_) => {
                    if let Some(backoff) = backoff.as_mut() {
                        backoff.spin_or_yield();
                    }
                }
            }
        }
    }

    /// Pushes a block onto the free stack, stamping a fresh generation.
    ///
    /// # Safety
    ///
    /// `block` must point to a header owned by this engine that is not
    /// currently on the free stack, and no other thread may hold it.
    pub(crate) unsafe fn push(&self, block: NonNull<BlockHeader>) {
        // SAFETY: caller guarantees `block` is a valid, exclusively held
        // header of this engine.
        let header = unsafe { block.as_ref() };
        debug_assert!(
            matches!(
                header.state(),
                Some(BlockState::Initial) | Some(BlockState::Used)
            ),
            "pushed a block that is already free"
        );
        debug_assert!(header.next().is_none(), "pushed a block that is still linked");

        if let Some(pattern) = self.config.dealloc_pattern {
            // SAFETY: the payload region lies directly behind the header,
            // inside the same puddle allocation; the payload has already been
            // dropped by the caller.
            unsafe {
                ptr::write_bytes(
                    block.as_ptr().cast::<u8>().add(HEADER_SIZE),
                    pattern,
                    self.payload_len(),
                );
            }
        }

        // Stamp the next generation into the tag so that this push, if it
        // wins, moves the head to a value no stalled snapshot can match.
        let generation = self.generation.fetch_add(1, Ordering::Relaxed).wrapping_add(1) as u16;
        let tag = header.tag().with_generation(generation);
        header.set_tag(tag);
        header.set_state(BlockState::Free);

        let mut backoff = self.config.use_backoff.then(Backoff::new);
        let mut observed = self.head.load(Ordering::Relaxed);
        loop {
            // Plain store into a block nobody else can see as free yet.
            header.set_next(Handle::from_bits(observed));
            match self.head.compare_exchange_weak(
                observed,
                tag.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(current) => {
                    observed = current;
                    if let Some(backoff) = backoff.as_mut() {
                        backoff.spin_or_yield();
                    }
                }
            }
        }
    }

    /// Allocates one more puddle and feeds its blocks to the free stack.
    ///
    /// Fails only when all [`MAX_PUDDLES`] slots are taken.
    pub(crate) fn grow_one(&self) -> PoolResult<()> {
        // Reserve a slot first; the reservation is uncontended from then on
        // even if several threads grow at once.
        let slot = self.num_puddles.fetch_add(1, Ordering::Relaxed);
        if slot >= MAX_PUDDLES {
            self.num_puddles.fetch_sub(1, Ordering::Relaxed);
            #[cfg(feature = "logging")]
            tracing::trace!("pool grow refused, all puddle slots taken");
            return Err(PoolError::CapacityExhausted {
                max_blocks: MAX_BLOCKS,
                max_puddles: MAX_PUDDLES,
            });
        }

        // SAFETY: `puddle_layout` has non-zero size.
        let base = unsafe { alloc_zeroed(self.puddle_layout) };
        if base.is_null() {
            handle_alloc_error(self.puddle_layout);
        }

        // Publish the slot before the first push: poppers resolve handles
        // through it.
        self.puddles[slot].store(base, Ordering::Release);

        // Feed the stack from the last element down so element 0 ends up on
        // top.
        for element in (0..BLOCKS_PER_PUDDLE).rev() {
            // SAFETY: `element * stride` is within the fresh allocation and
            // header-aligned; the memory is zeroed and unshared until pushed.
            let header = unsafe {
                let raw = base.add(element * self.stride).cast::<BlockHeader>();
                ptr::write(raw, BlockHeader::new(Handle::from_parts(slot as u8, element as u8)));
                NonNull::new_unchecked(raw)
            };
            // SAFETY: the header was just initialized and no other thread
            // holds it.
            unsafe { self.push(header) };
        }

        #[cfg(feature = "logging")]
        debug!(
            puddle = slot,
            bytes = self.puddle_layout.size(),
            "allocated pool puddle"
        );

        Ok(())
    }

    /// Checks whether `ptr` falls inside any initialized puddle.
    ///
    /// O(puddles); meant for validation, not the hot path.
    pub(crate) fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        for slot in self.puddles.iter().take(self.num_puddles()) {
            let base = slot.load(Ordering::Acquire);
            if base.is_null() {
                // Reserved by a concurrent grow that has not published yet.
                continue;
            }
            let start = base as usize;
            if addr >= start && addr < start + self.puddle_layout.size() {
                return true;
            }
        }
        false
    }

    /// Validates that `ptr` is the payload of a block this engine owns and
    /// that the block is currently handed out.
    ///
    /// Catches foreign pointers, pointers into the middle of a block, and
    /// double destroys (the block is already free). O(puddles), like
    /// [`contains`](Self::contains); the free-stack hot path never runs it.
    pub(crate) fn check_live_payload(&self, ptr: *const u8) -> PoolResult<()> {
        let addr = ptr as usize;
        for slot in self.puddles.iter().take(self.num_puddles()) {
            let base = slot.load(Ordering::Acquire);
            if base.is_null() {
                continue;
            }
            let start = base as usize;
            if addr < start || addr >= start + self.puddle_layout.size() {
                continue;
            }

            let offset = addr - start;
            if offset % self.stride != HEADER_SIZE {
                // Inside the puddle, but not at a payload boundary.
                return Err(PoolError::ForeignPointer { addr });
            }

            // SAFETY: a payload boundary inside an initialized puddle always
            // sits directly behind an initialized header; the pointer is
            // derived from the puddle base to keep its provenance.
            let header = unsafe { &*base.add(offset - HEADER_SIZE).cast::<BlockHeader>() };
            return match header.state() {
                Some(BlockState::Used) => Ok(()),
                Some(found) => Err(PoolError::InvalidState {
                    expected: BlockState::Used,
                    found,
                }),
                // An unrecognizable state byte means this was never one of
                // our blocks.
                None => Err(PoolError::ForeignPointer { addr }),
            };
        }
        Err(PoolError::ForeignPointer { addr })
    }

    pub(crate) fn record_create(&self) {
        let live = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.track_stats {
            self.creates.fetch_add(1, Ordering::Relaxed);
            self.peak_live.fetch_max(live, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_destroy(&self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
        if self.config.track_stats {
            self.destroys.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for RawPool {
    fn drop(&mut self) {
        for slot in self.puddles.iter_mut() {
            let base = *slot.get_mut();
            if !base.is_null() {
                // SAFETY: `base` was returned by `alloc_zeroed` with this
                // exact layout in `grow_one` and has not been freed since.
                unsafe { dealloc(base, self.puddle_layout) };
            }
        }
    }
}
