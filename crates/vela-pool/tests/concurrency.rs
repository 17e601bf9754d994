//! Concurrency and capacity tests: ABA churn, generation wrap, the block
//! ceiling.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use vela_pool::{PoolAllocator, BLOCKS_PER_PUDDLE, MAX_BLOCKS, MAX_PUDDLES};

/// Payload large enough that a colliding write from another thread would be
/// visible across several lanes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Slot {
    owner: u64,
    lanes: [u64; 3],
}

impl Slot {
    fn for_owner(owner: u64) -> Self {
        Slot { owner, lanes: [owner ^ 0xA5A5, owner.rotate_left(17), !owner] }
    }
}

fn churn_iterations() -> usize {
    if cfg!(miri) {
        500
    } else {
        1_000_000
    }
}

/// Two threads churning create/destroy pairs over a single puddle is the
/// classic ABA setup: a stalled pop observes a head that is popped, handed
/// out, returned, and pushed again in the interim. The generation stamp must
/// make the stalled CAS fail rather than splice a stale next-link into the
/// stack.
#[test]
fn two_thread_churn_over_one_puddle_stays_consistent() {
    let pool = Arc::new(PoolAllocator::<Slot>::production());

    // Warm up a single puddle so both threads fight over the same blocks.
    let seed = pool.create(Slot::for_owner(0));
    unsafe { pool.destroy(seed) };
    assert_eq!(pool.puddle_count(), 1);

    let handles: Vec<_> = (1..=2u64)
        .map(|owner| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..churn_iterations() {
                    let expected = Slot::for_owner(owner);
                    let ptr = pool.create(expected);
                    // If another thread ever received this block while we
                    // hold it, its writes would show up here.
                    assert_eq!(unsafe { *ptr.as_ref() }, expected);
                    unsafe { pool.destroy(ptr) };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("churn thread panicked");
    }

    // Two threads never hold more than two blocks at once; the pool must
    // not have grown past the warm-up puddle, and every block must be back
    // on the free stack.
    assert_eq!(pool.puddle_count(), 1);
    assert!(pool.is_empty());
    assert_eq!(pool.free_blocks(), BLOCKS_PER_PUDDLE);
}

#[test]
fn batched_churn_across_threads() {
    const THREADS: u64 = 4;
    const BATCH: usize = 8;

    let pool = Arc::new(PoolAllocator::<Slot>::production());
    let iterations = churn_iterations() / 20;

    let handles: Vec<_> = (0..THREADS)
        .map(|owner| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut held = Vec::with_capacity(BATCH);
                for round in 0..iterations {
                    let expected = Slot::for_owner(owner.wrapping_add(round as u64));
                    for _ in 0..BATCH {
                        held.push(pool.create(expected));
                    }
                    for ptr in held.drain(..) {
                        assert_eq!(unsafe { *ptr.as_ref() }, expected);
                        unsafe { pool.destroy(ptr) };
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("churn thread panicked");
    }
    assert!(pool.is_empty());
}

/// Threads hold their blocks across a barrier so all of them are live at the
/// same instant, then the addresses are checked for global distinctness.
/// Sized to force puddle growth while the threads race.
#[test]
fn concurrent_growth_hands_out_distinct_blocks() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = if cfg!(miri) { 8 } else { 64 };

    let pool = Arc::new(PoolAllocator::<u64>::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|id| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let held: Vec<_> = (0..PER_THREAD)
                    .map(|i| pool.create((id * PER_THREAD + i) as u64))
                    .collect();
                // Hold everything until every thread has allocated.
                barrier.wait();
                let addrs: Vec<usize> = held.iter().map(|p| p.as_ptr() as usize).collect();
                for ptr in held {
                    unsafe { pool.destroy(ptr) };
                }
                addrs
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for addr in handle.join().expect("grow thread panicked") {
            assert!(seen.insert(addr), "block {addr:#x} was live on two threads at once");
        }
    }
    assert_eq!(seen.len(), THREADS * PER_THREAD);
    assert!(pool.is_empty());
}

/// Cycling one block through push/pop more than 2^16 times walks the
/// generation counter through a full wrap, including the stamp of zero. The
/// stack must stay consistent throughout.
#[test]
fn generation_counter_wraps_without_corruption() {
    let cycles = if cfg!(miri) { 300 } else { (1 << 16) + 5 };

    let pool = PoolAllocator::<u64>::production();
    let first = pool.create(0);
    let addr = first.as_ptr();
    unsafe { pool.destroy(first) };

    for i in 0..cycles {
        let ptr = pool.create(i as u64);
        // Single-threaded LIFO: it is the same block every time.
        assert_eq!(ptr.as_ptr(), addr);
        assert_eq!(unsafe { *ptr.as_ref() }, i as u64);
        unsafe { pool.destroy(ptr) };
    }

    assert!(pool.is_empty());
    assert_eq!(pool.puddle_count(), 1);
}

/// Filling the pool to its 65 536-block ceiling succeeds; the next create
/// reports exhaustion on the fallible surface and aborts on the infallible
/// one.
#[test]
#[cfg_attr(miri, ignore)]
fn capacity_ceiling_is_65536_blocks() {
    let pool = PoolAllocator::<u64>::performance();

    let mut held = Vec::with_capacity(MAX_BLOCKS);
    for i in 0..MAX_BLOCKS {
        held.push(
            pool.try_create(i as u64)
                .expect("creates below the ceiling must succeed"),
        );
    }
    assert_eq!(pool.puddle_count(), MAX_PUDDLES);
    assert_eq!(pool.live_blocks(), MAX_BLOCKS);
    assert_eq!(pool.free_blocks(), 0);

    let err = pool.try_create(0).unwrap_err();
    assert!(err.is_capacity_exhausted());

    for ptr in held {
        unsafe { pool.destroy(ptr) };
    }
    assert!(pool.is_empty());
    assert_eq!(pool.free_blocks(), MAX_BLOCKS);
}

#[test]
#[cfg_attr(miri, ignore)]
#[should_panic(expected = "capacity exhausted")]
fn create_panics_at_the_ceiling() {
    let pool = PoolAllocator::<u64>::performance();

    // Held pointers leak on the panic path; the pool only backs plain u64s.
    for i in 0..MAX_BLOCKS {
        let _ = pool.create(i as u64);
    }
    let _ = pool.create(0);
}
