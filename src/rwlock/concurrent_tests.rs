//! Concurrent tests for `RecordLock`.
//!
//! These tests verify the lock protocol under real thread contention.
//! Guarded with `#[cfg(not(miri))]` where thread counts make Miri impractical.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use super::RecordLock;
use crate::pool::{LockArena, LockArenaConfig};

fn arena(workers: u16) -> Arc<LockArena> {
    Arc::new(
        LockArena::new(LockArenaConfig {
            max_workers: workers,
            blocks_per_worker: 8,
        })
        .expect("valid config"),
    )
}

#[test]
fn test_try_writer_mutual_exclusion() {
    let arena = arena(8);
    let lock = Arc::new(RecordLock::new());
    let in_critical = Arc::new(AtomicU32::new(0));
    let acquisitions = Arc::new(AtomicUsize::new(0));
    let num_threads = 8;
    let per_thread = 200;

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let in_critical = Arc::clone(&in_critical);
            let acquisitions = Arc::clone(&acquisitions);
            let mut ctx = arena.register_worker().expect("worker id");
            thread::spawn(move || {
                let mut acquired = 0;
                while acquired < per_thread {
                    if let Some(handle) = lock.try_acquire_writer(&mut ctx).expect("pool sized") {
                        let now = in_critical.fetch_add(1, Ordering::AcqRel);
                        assert_eq!(now, 0, "two writers inside the critical section");
                        in_critical.fetch_sub(1, Ordering::AcqRel);
                        lock.release_writer(&mut ctx, handle);
                        acquired += 1;
                        acquisitions.fetch_add(1, Ordering::Relaxed);
                    }
                    std::hint::spin_loop();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("thread panicked");
    }

    assert_eq!(acquisitions.load(Ordering::Relaxed), num_threads * per_thread);
    assert!(lock.is_free());
}

#[test]
fn test_readers_exclude_writers_not_each_other() {
    let arena = arena(8);
    let lock = Arc::new(RecordLock::new());
    let readers_in = Arc::new(AtomicU32::new(0));
    let writers_in = Arc::new(AtomicU32::new(0));
    let num_threads = 8;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let lock = Arc::clone(&lock);
            let readers_in = Arc::clone(&readers_in);
            let writers_in = Arc::clone(&writers_in);
            let mut ctx = arena.register_worker().expect("worker id");
            thread::spawn(move || {
                for _ in 0..500 {
                    if t % 2 == 0 {
                        if let Some(handle) =
                            lock.try_acquire_reader(&mut ctx).expect("pool sized")
                        {
                            readers_in.fetch_add(1, Ordering::AcqRel);
                            assert_eq!(
                                writers_in.load(Ordering::Acquire),
                                0,
                                "reader granted alongside a writer"
                            );
                            readers_in.fetch_sub(1, Ordering::AcqRel);
                            lock.release_reader(&mut ctx, handle);
                        }
                    } else if let Some(handle) =
                        lock.try_acquire_writer(&mut ctx).expect("pool sized")
                    {
                        let writers = writers_in.fetch_add(1, Ordering::AcqRel);
                        assert_eq!(writers, 0, "two writers granted");
                        assert_eq!(
                            readers_in.load(Ordering::Acquire),
                            0,
                            "writer granted alongside a reader"
                        );
                        writers_in.fetch_sub(1, Ordering::AcqRel);
                        lock.release_writer(&mut ctx, handle);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("thread panicked");
    }

    assert!(lock.is_free());
    assert_eq!(lock.active_readers(), 0);
}

#[test]
fn test_blocking_writer_waits_for_holder() {
    let arena = arena(2);
    let lock = Arc::new(RecordLock::new());
    let released = Arc::new(AtomicBool::new(false));

    let mut holder_ctx = arena.register_worker().expect("worker id");
    let held = lock
        .try_acquire_writer(&mut holder_ctx)
        .expect("pool sized")
        .expect("free lock");

    let waiter = {
        let lock = Arc::clone(&lock);
        let released = Arc::clone(&released);
        let mut ctx = arena.register_worker().expect("worker id");
        thread::spawn(move || {
            let handle = lock.acquire_writer(&mut ctx).expect("pool sized");
            // The holder must have released before we were granted.
            assert!(released.load(Ordering::Acquire));
            lock.release_writer(&mut ctx, handle);
        })
    };

    // Give the waiter time to enqueue behind us.
    thread::sleep(Duration::from_millis(100));
    released.store(true, Ordering::Release);
    lock.release_writer(&mut holder_ctx, held);

    waiter.join().expect("waiter panicked");
    assert!(lock.is_free());
}

#[test]
fn test_reader_run_granted_together_at_writer_release() {
    let arena = arena(4);
    let lock = Arc::new(RecordLock::new());
    let granted_readers = Arc::new(AtomicU32::new(0));

    let mut writer_ctx = arena.register_worker().expect("worker id");
    let held = lock
        .try_acquire_writer(&mut writer_ctx)
        .expect("pool sized")
        .expect("free lock");

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let granted_readers = Arc::clone(&granted_readers);
            let mut ctx = arena.register_worker().expect("worker id");
            thread::spawn(move || {
                let handle = lock.acquire_reader(&mut ctx).expect("pool sized");
                granted_readers.fetch_add(1, Ordering::AcqRel);
                // Hold until the whole run is granted: batching hands both
                // queued readers their grants at the one writer release.
                while granted_readers.load(Ordering::Acquire) < 2 {
                    std::hint::spin_loop();
                }
                lock.release_reader(&mut ctx, handle);
            })
        })
        .collect();

    // Let both readers queue behind the held writer lock.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(granted_readers.load(Ordering::Acquire), 0);

    lock.release_writer(&mut writer_ctx, held);

    for r in readers {
        r.join().expect("reader panicked");
    }
    assert!(lock.is_free());
    assert_eq!(lock.active_readers(), 0);
}

#[test]
fn test_writer_parked_behind_reader_batch_is_granted_by_last_reader() {
    let arena = arena(3);
    let lock = Arc::new(RecordLock::new());

    let mut r1 = arena.register_worker().expect("worker id");
    let mut r2 = arena.register_worker().expect("worker id");
    let h1 = lock
        .try_acquire_reader(&mut r1)
        .expect("pool sized")
        .expect("free lock");
    let h2 = lock
        .try_acquire_reader(&mut r2)
        .expect("pool sized")
        .expect("reader-held");

    let writer = {
        let lock = Arc::clone(&lock);
        let mut ctx = arena.register_worker().expect("worker id");
        thread::spawn(move || {
            let handle = lock.acquire_writer(&mut ctx).expect("pool sized");
            lock.release_writer(&mut ctx, handle);
        })
    };

    // Let the writer park behind the batch, then drain the readers.
    thread::sleep(Duration::from_millis(100));
    lock.release_reader(&mut r1, h1);
    lock.release_reader(&mut r2, h2);

    writer.join().expect("writer panicked");
    assert!(lock.is_free());
}

#[test]
fn test_random_mixed_traffic_settles_clean() {
    let arena = arena(8);
    let locks: Arc<Vec<RecordLock>> = Arc::new((0..4).map(|_| RecordLock::new()).collect());
    let num_threads = 8;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let locks = Arc::clone(&locks);
            let mut ctx = arena.register_worker().expect("worker id");
            thread::spawn(move || {
                // Cheap xorshift so each thread walks its own key sequence.
                let mut rng: u64 = 0x9e37_79b9 + t as u64;
                for _ in 0..1000 {
                    rng ^= rng << 13;
                    rng ^= rng >> 7;
                    rng ^= rng << 17;
                    let lock = &locks[(rng % 4) as usize];
                    if t % 2 == 0 {
                        if let Some(h) = lock.try_acquire_reader(&mut ctx).expect("pool sized") {
                            lock.release_reader(&mut ctx, h);
                        }
                    } else if let Some(h) =
                        lock.try_acquire_writer(&mut ctx).expect("pool sized")
                    {
                        lock.release_writer(&mut ctx, h);
                    }
                }
                assert_eq!(ctx.available_blocks(), usize::from(ctx.capacity()));
            })
        })
        .collect();

    for h in handles {
        h.join().expect("thread panicked");
    }

    for lock in locks.iter() {
        assert!(lock.is_free());
        assert_eq!(lock.active_readers(), 0);
    }
}
