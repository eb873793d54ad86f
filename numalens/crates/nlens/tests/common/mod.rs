//! Test Utilities for the NumaLens Bug-Finding Test Suite
//!
//! This module provides test utilities that enforce STRICT assertions.
//! NO tolerances, NO excuses for stub behavior.
//!
//! ============================================================================
//! CRITICAL: These utilities are designed to FIND BUGS, not to have passing tests.
//! ============================================================================

#![allow(dead_code)]

use nlens::{Profiler, ProfilerConfig, StatsSnapshot};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Test page geometry (matches the production constants)
pub const PAGE: usize = 4096;
pub const LINE: usize = 64;

/// Escalation thresholds every scenario uses
pub const TEST_THRESHOLD: u64 = 10;

/// Base address for synthetic heap traffic, low enough for the test
/// aperture and far from anything the test process maps itself.
pub const HEAP_BASE: usize = 0x10_0000;

/// ============================================================================
/// PROFILER FIXTURE
/// ============================================================================

/// Test fixture wrapping a private profiler instance
///
/// Uses a small aperture and 1MB fragments so a test process reserves
/// megabytes of shadow space instead of terabytes.
pub struct ProfFixture {
    pub profiler: Arc<Profiler>,
    pub config: ProfilerConfig,
}

impl ProfFixture {
    /// Create fixture with the standard scenario geometry
    ///
    /// **Bug this finds:** Configuration validation bugs, shadow-map
    /// reservation failures
    pub fn with_defaults() -> Self {
        let config = ProfilerConfig {
            page_detail_threshold: TEST_THRESHOLD,
            cache_detail_threshold: TEST_THRESHOLD as u32,
            page_map_span: 1 << 32,
            fragment_bytes: 1 << 20,
            max_fragments: 1 << 16,
            object_capacity: 1 << 10,
            site_capacity: 1 << 10,
            lock_capacity: 1 << 10,
            ..Default::default()
        };

        let profiler = Arc::new(
            Profiler::new(config.clone())
                .expect("profiler initialization should succeed with valid config"),
        );

        Self { profiler, config }
    }

    /// Create fixture with custom escalation thresholds
    ///
    /// **Bug this finds:** Strict-threshold off-by-one bugs in escalation
    pub fn with_thresholds(page_threshold: u64, line_threshold: u32) -> Self {
        let base = Self::with_defaults();
        let config = ProfilerConfig {
            page_detail_threshold: page_threshold,
            cache_detail_threshold: line_threshold,
            ..base.config
        };
        let profiler = Arc::new(
            Profiler::new(config.clone())
                .expect("profiler initialization should succeed with valid config"),
        );
        Self { profiler, config }
    }

    /// Issue `count` reads of `size` bytes at `addr` from this thread
    pub fn reads(&self, addr: usize, size: usize, count: usize) {
        for _ in 0..count {
            self.profiler.on_access(addr, size, false);
        }
    }

    /// Issue `count` writes of `size` bytes at `addr` from this thread
    pub fn writes(&self, addr: usize, size: usize, count: usize) {
        for _ in 0..count {
            self.profiler.on_access(addr, size, true);
        }
    }

    /// Current counter snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        self.profiler.stats().snapshot()
    }

    /// Assert the drop-accounting invariant: every access event ended in
    /// exactly one of observed / lost / aperture-dropped
    ///
    /// **Bug this finds:** Events double-counted or silently swallowed on
    /// any path through the pipeline
    pub fn assert_drop_accounting(&self) {
        let snap = self.snapshot();
        assert_eq!(
            snap.accesses_observed + snap.lost_samples + snap.aperture_drops,
            snap.access_events(),
            "drop accounting must balance: observed {} + lost {} + aperture {} != events {}",
            snap.accesses_observed,
            snap.lost_samples,
            snap.aperture_drops,
            snap.access_events()
        );
    }
}

/// ============================================================================
/// THREADED DRIVERS
/// ============================================================================

/// Strictly alternating writes from two real threads
///
/// Thread A writes `addr_a`, thread B writes `addr_b`, in lockstep
/// A,B,A,B for `rounds` rounds. The alternation is enforced with a turn
/// counter, so writer-transition counts and ownership ping-pong are
/// deterministic.
///
/// **Bug this finds:** Lost writer transitions, invalidation counters that
/// miss ownership changes, escalation that never triggers
pub fn alternate_writes(profiler: &Profiler, addr_a: usize, addr_b: usize, rounds: usize) {
    let turn = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..rounds {
                while turn.load(Ordering::SeqCst) != 2 * i {
                    std::hint::spin_loop();
                }
                profiler.on_access(addr_a, 8, true);
                turn.fetch_add(1, Ordering::SeqCst);
            }
        });
        scope.spawn(|| {
            for i in 0..rounds {
                while turn.load(Ordering::SeqCst) != 2 * i + 1 {
                    std::hint::spin_loop();
                }
                profiler.on_access(addr_b, 8, true);
                turn.fetch_add(1, Ordering::SeqCst);
            }
        });
    });
}

/// Drive two alternating writers on one line until it has a detailed
/// record, then return the number of rounds it took.
///
/// Panics after a generous bound: escalation that never happens is a bug,
/// not a tolerance.
pub fn escalate_line(profiler: &Profiler, addr: usize) -> usize {
    for round in 1..=64 {
        alternate_writes(profiler, addr, addr, 1);
        if profiler.line_record(addr).is_some() {
            return round;
        }
    }
    panic!("line at {addr:#x} never escalated after 64 alternating rounds");
}
