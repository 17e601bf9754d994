//! Pooled resource slots, the way a renderer's resource tables use the
//! allocator: one pool per record type, churned from several loader threads.
//!
//! Run with `--features logging` to see the puddle growth events.

use std::sync::Arc;
use std::thread;

use vela_pool::{PoolAllocator, PoolConfig};

/// A texture table entry: identity, dimensions, and the frame it was last
/// bound in.
struct TextureSlot {
    id: u32,
    width: u16,
    height: u16,
    last_bound_frame: u64,
}

fn main() {
    #[cfg(feature = "logging")]
    tracing_subscriber::fmt::init();

    let pool = Arc::new(PoolAllocator::<TextureSlot>::with_config(
        PoolConfig::production().with_stats(true),
    ));

    // Four loader threads churn slots, holding a small working set each,
    // the way streaming assets come and go.
    let loaders: Vec<_> = (0..4u32)
        .map(|loader| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut held = Vec::new();
                for round in 0..10_000u32 {
                    held.push(pool.create(TextureSlot {
                        id: loader << 24 | round,
                        width: 256,
                        height: 256,
                        last_bound_frame: u64::from(round),
                    }));
                    if held.len() == 32 {
                        for slot in held.drain(..) {
                            let entry = unsafe { slot.as_ref() };
                            assert_eq!(entry.id >> 24, loader);
                            assert_eq!((entry.width, entry.height), (256, 256));
                            let _ = entry.last_bound_frame;
                            unsafe { pool.destroy(slot) };
                        }
                    }
                }
                for slot in held.drain(..) {
                    unsafe { pool.destroy(slot) };
                }
            })
        })
        .collect();

    for loader in loaders {
        loader.join().expect("loader thread panicked");
    }

    assert!(pool.is_empty());
    let stats = pool.stats().expect("statistics were enabled above");
    println!(
        "churned {} slots through {} puddle(s); peak {} live, {} blocks pooled ({} bytes resident)",
        stats.total_creates,
        stats.puddles,
        stats.peak_live,
        stats.free_blocks,
        stats.capacity * stats.stride,
    );
}
