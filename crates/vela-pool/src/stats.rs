//! Pool allocator statistics.

/// Point-in-time statistics snapshot for a pool allocator.
///
/// Counters are recorded with relaxed atomics; a snapshot taken while other
/// threads are churning is internally consistent only in the sense that each
/// field was true at some recent instant.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Total objects constructed.
    pub total_creates: u64,
    /// Total objects destroyed.
    pub total_destroys: u64,
    /// Peak number of simultaneously live blocks.
    pub peak_live: usize,
    /// Currently live blocks.
    pub live_blocks: usize,
    /// Blocks currently on the free stack.
    pub free_blocks: usize,
    /// Puddles allocated so far.
    pub puddles: usize,
    /// Block capacity of the allocated puddles.
    pub capacity: usize,
    /// Byte distance between consecutive blocks.
    pub stride: usize,
}
