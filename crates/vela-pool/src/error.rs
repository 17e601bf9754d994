//! Pool allocation errors.
//!
//! The pool surfaces very few recoverable conditions: capacity exhaustion on
//! the `try_*` surface, plus the ownership and block-state violations that
//! [`check_owned`] and [`check_live`] report as values before `destroy`
//! turns them fatal. All other usage errors are programmer bugs and abort at
//! the point of detection, because the pool backs in-process data structures
//! whose consistency cannot be restored by graceful recovery.
//!
//! [`check_owned`]: crate::PoolAllocator::check_owned
//! [`check_live`]: crate::PoolAllocator::check_live

use thiserror::Error;

use crate::block::BlockState;

/// Result alias for fallible pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by the fallible pool surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Every puddle slot is allocated and the free stack is empty.
    #[error("pool capacity exhausted: all {max_blocks} blocks across {max_puddles} puddles are live")]
    CapacityExhausted {
        /// Hard block ceiling of the allocator.
        max_blocks: usize,
        /// Puddle slot ceiling.
        max_puddles: usize,
    },

    /// The pointer does not fall inside any puddle of this allocator.
    #[error("pointer {addr:#x} is not owned by this pool")]
    ForeignPointer {
        /// Address of the offending pointer.
        addr: usize,
    },

    /// The block behind the pointer is not in the state the operation
    /// requires. A free block here means a double destroy.
    #[error("block is {found}, expected {expected}")]
    InvalidState {
        /// State the operation requires.
        expected: BlockState,
        /// State recorded in the block header.
        found: BlockState,
    },
}

impl PoolError {
    /// Checks whether this is a capacity exhaustion error.
    pub const fn is_capacity_exhausted(&self) -> bool {
        matches!(self, PoolError::CapacityExhausted { .. })
    }

    /// Checks whether this is an ownership violation.
    pub const fn is_foreign_pointer(&self) -> bool {
        matches!(self, PoolError::ForeignPointer { .. })
    }

    /// Checks whether this is a block-state violation.
    pub const fn is_invalid_state(&self) -> bool {
        matches!(self, PoolError::InvalidState { .. })
    }
}
