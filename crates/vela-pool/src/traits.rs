//! Memory usage reporting.

/// Memory usage reporting for allocators with an inherent capacity.
///
/// Useful for monitoring and for implementing memory-pressure warnings in
/// the subsystems a pool backs.
pub trait MemoryUsage {
    /// Currently allocated payload memory in bytes.
    fn used_memory(&self) -> usize;

    /// Remaining capacity in bytes, or `None` for unbounded allocators.
    fn available_memory(&self) -> Option<usize>;

    /// Total capacity in bytes, or `None` for unbounded allocators.
    fn total_memory(&self) -> Option<usize> {
        match (self.used_memory(), self.available_memory()) {
            (used, Some(available)) => Some(used + available),
            _ => None,
        }
    }

    /// Memory usage as a percentage of total capacity.
    ///
    /// Returns `None` if total capacity is unknown.
    fn memory_usage_percent(&self) -> Option<f32> {
        self.total_memory().map(|total| {
            if total == 0 {
                0.0
            } else {
                (self.used_memory() as f32 / total as f32) * 100.0
            }
        })
    }
}
