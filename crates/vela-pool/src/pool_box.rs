//! RAII smart pointer for pool-allocated values.

use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use crate::error::PoolResult;
use crate::pool::PoolAllocator;

/// Owning handle to a pool-allocated value.
///
/// Returns its block to the pool when dropped. Similar to `Box`, but backed
/// by a [`PoolAllocator`] and bounded by the pool's lifetime.
pub struct PoolBox<'pool, T> {
    ptr: NonNull<T>,
    pool: &'pool PoolAllocator<T>,
}

impl<'pool, T> PoolBox<'pool, T> {
    /// Allocates a block from `pool` and moves `value` into it.
    #[must_use = "the allocated value is freed immediately if unused"]
    pub fn new_in(value: T, pool: &'pool PoolAllocator<T>) -> PoolResult<Self> {
        Ok(Self {
            ptr: pool.try_create(value)?,
            pool,
        })
    }

    /// Consumes the box and returns the contained value, recycling the
    /// block.
    pub fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);
        // SAFETY: `ptr` is live and exclusively owned; wrapping in
        // ManuallyDrop prevents a second destroy from the Drop impl.
        let value = unsafe { ptr::read(this.ptr.as_ptr()) };
        // SAFETY: the payload was moved out above, so the block is recycled
        // without running its destructor again.
        unsafe { this.pool.recycle(this.ptr) };
        value
    }

    /// The raw payload pointer, valid while the box is alive.
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T> Deref for PoolBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `ptr` points to a live value for as long as the box
        // exists.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for PoolBox<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: `ptr` points to a live value and the box is borrowed
        // uniquely.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for PoolBox<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the box owns the value and minted `ptr` from this pool.
        unsafe { self.pool.destroy(self.ptr) };
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolBox<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

// SAFETY: PoolBox owns its T and only touches the pool through the
// thread-safe create/destroy surface.
unsafe impl<T: Send> Send for PoolBox<'_, T> {}
unsafe impl<T: Sync> Sync for PoolBox<'_, T> {}
