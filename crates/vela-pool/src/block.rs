//! Intrusive block headers and stride math.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use static_assertions::const_assert_eq;

use crate::handle::Handle;
use crate::utils::align_up;
use crate::HEADER_SIZE;

/// Lifecycle tag of a block.
///
/// The tag is not consulted on the hot path; it exists so that misuse
/// (double destroy, destroy of a foreign pointer that happens to land in a
/// puddle) is caught at the point of the mistake instead of at the point of
/// the crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockState {
    /// Never allocated since its puddle was initialized.
    Initial = 0,
    /// On the free stack.
    Free = 1,
    /// Handed out to a caller.
    Used = 2,
}

impl BlockState {
    pub(crate) fn from_raw(raw: u8) -> Option<BlockState> {
        match raw {
            0 => Some(BlockState::Initial),
            1 => Some(BlockState::Free),
            2 => Some(BlockState::Used),
            _ => None,
        }
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlockState::Initial => "initial",
            BlockState::Free => "free",
            BlockState::Used => "used",
        })
    }
}

/// Per-block header, carved out of the first [`HEADER_SIZE`] bytes of every
/// block. The payload begins immediately after it.
///
/// `next` and `tag` hold raw [`Handle`] bits. They are atomics because a
/// popper that stalled on a stale head snapshot may read them while another
/// thread recycles the block; all such accesses are relaxed, and cross-thread
/// publication rides exclusively on the free-stack head CAS.
#[repr(C)]
pub(crate) struct BlockHeader {
    /// Handle bits of the next free block, or the sentinel.
    next: AtomicU32,
    /// The block's own handle. The low 16 bits never change after puddle
    /// initialization; the high 16 bits track the generation stamped by the
    /// most recent push.
    tag: AtomicU32,
    /// Raw [`BlockState`].
    state: AtomicU8,
    _pad: [u8; 7],
}

const_assert_eq!(core::mem::size_of::<BlockHeader>(), HEADER_SIZE);

impl BlockHeader {
    pub(crate) fn new(tag: Handle) -> Self {
        BlockHeader {
            next: AtomicU32::new(Handle::NONE.bits()),
            tag: AtomicU32::new(tag.bits()),
            state: AtomicU8::new(BlockState::Initial as u8),
            _pad: [0; 7],
        }
    }

    pub(crate) fn next(&self) -> Handle {
        Handle::from_bits(self.next.load(Ordering::Relaxed))
    }

    pub(crate) fn set_next(&self, next: Handle) {
        self.next.store(next.bits(), Ordering::Relaxed);
    }

    pub(crate) fn tag(&self) -> Handle {
        Handle::from_bits(self.tag.load(Ordering::Relaxed))
    }

    pub(crate) fn set_tag(&self, tag: Handle) {
        self.tag.store(tag.bits(), Ordering::Relaxed);
    }

    pub(crate) fn state(&self) -> Option<BlockState> {
        BlockState::from_raw(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: BlockState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

/// Byte distance between consecutive blocks holding a payload of
/// `payload_size` bytes: header plus payload, rounded up to the header size.
pub(crate) const fn stride_for(payload_size: usize) -> usize {
    align_up(HEADER_SIZE + payload_size, HEADER_SIZE)
}
