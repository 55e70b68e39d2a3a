//! Lock Contention Profiling Binary
//!
//! Profiles try-acquire success rates and hold-path latency under record
//! contention, to size retry/backoff policy in the transaction layer and to
//! catch multi-millisecond outliers in the release/handoff paths.
//!
//! Run with:
//! ```bash
//! cargo run --release --bin lock_contention
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reclock::{LockArena, LockArenaConfig, VersionedRecord};

// =============================================================================
// Operation Stats (Thread-Local + Aggregation)
// =============================================================================

/// Per-thread operation timing and outcome statistics
#[derive(Default)]
struct ThreadOpStats {
    /// Successful try acquisitions (reader + writer)
    acquired: u64,

    /// Failed try attempts
    contended: u64,

    /// Longest acquire-release cycle overall
    max_op_ns: u64,

    /// Number of slow cycles (>1ms)
    slow_ops_1ms: u64,

    /// Number of very slow cycles (>10ms)
    slow_ops_10ms: u64,
}

impl ThreadOpStats {
    const fn record_op(&mut self, op_ns: u64) {
        if op_ns > self.max_op_ns {
            self.max_op_ns = op_ns;
        }

        if op_ns > 1_000_000 {
            self.slow_ops_1ms += 1;
        }

        if op_ns > 10_000_000 {
            self.slow_ops_10ms += 1;
        }
    }

    const fn merge(&mut self, other: &Self) {
        if other.max_op_ns > self.max_op_ns {
            self.max_op_ns = other.max_op_ns;
        }

        self.acquired += other.acquired;
        self.contended += other.contended;
        self.slow_ops_1ms += other.slow_ops_1ms;
        self.slow_ops_10ms += other.slow_ops_10ms;
    }
}

// =============================================================================
// Benchmark Runner
// =============================================================================

struct BenchmarkConfig {
    threads: usize,
    ops_per_thread: usize,
    keys: usize,
}

struct RunResult {
    elapsed: Duration,
    stats: ThreadOpStats,
}

fn run_benchmark(config: &BenchmarkConfig) -> RunResult {
    let arena = Arc::new(
        LockArena::new(LockArenaConfig {
            max_workers: config.threads as u16,
            blocks_per_worker: 8,
        })
        .unwrap(),
    );
    let keys: Arc<Vec<VersionedRecord>> =
        Arc::new((0..config.keys).map(|_| VersionedRecord::new()).collect());

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let keys = Arc::clone(&keys);
            let ops = config.ops_per_thread;
            let key_count = config.keys;
            let mut ctx = arena.register_worker().unwrap();

            thread::spawn(move || {
                let mut stats = ThreadOpStats::default();
                let mut state = t as u64 + 1;

                for _ in 0..ops {
                    state = state
                        .wrapping_mul(6_364_136_223_846_793_005)
                        .wrapping_add(1);
                    let key = &keys[(state as usize) % key_count];

                    let op_start = Instant::now();
                    if t % 2 == 0 {
                        match key.try_acquire_reader(&mut ctx).unwrap() {
                            Some(block) => {
                                key.release_reader(&mut ctx, block);
                                stats.acquired += 1;
                            }
                            None => stats.contended += 1,
                        }
                    } else {
                        match key.try_acquire_writer(&mut ctx).unwrap() {
                            Some(block) => {
                                key.release_writer(&mut ctx, block);
                                stats.acquired += 1;
                            }
                            None => stats.contended += 1,
                        }
                    }
                    let op_elapsed = op_start.elapsed().as_nanos() as u64;

                    stats.record_op(op_elapsed);
                }

                stats
            })
        })
        .collect();

    // Collect and merge stats
    let mut merged = ThreadOpStats::default();
    for h in handles {
        let thread_stats = h.join().unwrap();
        merged.merge(&thread_stats);
    }

    let elapsed = start.elapsed();

    // Every lock must settle back to free.
    for key in keys.iter() {
        assert!(key.lock_head().is_free());
        assert!(!key.is_keylocked());
    }

    RunResult {
        elapsed,
        stats: merged,
    }
}

fn print_stats(config: &BenchmarkConfig, result: &RunResult, baseline: Duration) {
    let elapsed = result.elapsed;
    let stats = &result.stats;

    let total_ops = config.threads * config.ops_per_thread;
    let ops_per_sec = total_ops as f64 / elapsed.as_secs_f64();
    let success_pct = stats.acquired as f64 / total_ops as f64 * 100.0;

    println!("\n{}", "=".repeat(80));
    println!(
        "RESULTS: {} threads x {} ops over {} keys",
        config.threads, config.ops_per_thread, config.keys
    );
    println!("{}", "=".repeat(80));

    println!("\n--- Timing ---");
    println!("Elapsed:     {elapsed:?}");
    println!("Throughput:  {ops_per_sec:.0} attempts/sec");

    println!("\n--- Outcomes ---");
    println!("Acquired:    {} ({success_pct:.1}%)", stats.acquired);
    println!("Contended:   {}", stats.contended);

    println!("\n--- Cycle Latency ---");
    println!(
        "Max cycle:   {:.3} ms",
        stats.max_op_ns as f64 / 1_000_000.0
    );
    println!("Slow >1ms:   {}", stats.slow_ops_1ms);
    println!("Slow >10ms:  {}", stats.slow_ops_10ms);

    let baseline_ms = baseline.as_secs_f64() * 1000.0;
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    if baseline_ms > 0.0 && elapsed_ms > baseline_ms * 3.0 {
        let ratio = elapsed_ms / baseline_ms;
        println!("\n!!! OUTLIER DETECTED: This run was ~{ratio:.1}x slower than median");
    }
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    println!("Lock Contention Profiling");
    println!("=========================\n");

    let configs = vec![
        // Hot: far more threads than keys.
        BenchmarkConfig {
            threads: 16,
            ops_per_thread: 100_000,
            keys: 4,
        },
        // Spread: mostly uncontended traffic.
        BenchmarkConfig {
            threads: 16,
            ops_per_thread: 100_000,
            keys: 1024,
        },
    ];

    for config in &configs {
        println!(
            "\nRunning: {} threads x {} ops over {} keys...",
            config.threads, config.ops_per_thread, config.keys
        );

        // Run multiple iterations to catch outliers
        let mut results: Vec<RunResult> = Vec::new();
        for run in 1..=10 {
            print!("  Run {run}/10... ");
            std::io::Write::flush(&mut std::io::stdout()).unwrap();

            let result = run_benchmark(config);
            println!("{:?}", result.elapsed);

            results.push(result);
        }

        #[expect(clippy::indexing_slicing)]
        let baseline = {
            let mut sorted: Vec<Duration> = results.iter().map(|result| result.elapsed).collect();
            sorted.sort_by_key(Duration::as_nanos);
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 1 {
                sorted[mid]
            } else {
                let lo = sorted[mid - 1].as_secs_f64();
                let hi = sorted[mid].as_secs_f64();

                Duration::from_secs_f64(f64::midpoint(lo, hi))
            }
        };

        // Find the slowest run
        let (slowest_idx, slowest_result) = results
            .iter()
            .enumerate()
            .max_by_key(|(_, result)| result.elapsed.as_nanos())
            .unwrap();

        println!("\n>>> Slowest run was #{} <<<", slowest_idx + 1);
        println!("Baseline (median) run: {baseline:?}");
        print_stats(config, slowest_result, baseline);
    }
}
