//! Integration tests for lock/unlock bookkeeping and violation detection
//!
//! Timing-sensitive cases use a ManualClock so every duration is exact.

use lockprof::aggregate::GroupingPolicy;
use lockprof::backend::{LockHandle, ParkingLotBackend};
use lockprof::clock::{ClockSource, ManualClock};
use lockprof::config::ProfilerConfig;
use lockprof::{CallSite, Diagnostics, Violation};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type ManualDiagnostics = Diagnostics<ParkingLotBackend<Arc<ManualClock>>>;

fn manual_profiler() -> (Arc<ManualDiagnostics>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let backend = ParkingLotBackend::with_clock(Arc::clone(&clock));
    let diag = Arc::new(Diagnostics::new(backend, ProfilerConfig::default()));
    (diag, clock)
}

fn site(line: u32) -> CallSite {
    CallSite::new("f.c", line)
}

#[test]
fn test_main_thread_five_locks_two_ms_each() {
    let (diag, clock) = manual_profiler();
    let m = LockHandle::new();

    for _ in 0..5 {
        diag.on_lock(Some(&m), "M", site(10));
        clock.advance(2);
        diag.on_unlock(Some(&m), "M", site(10));
    }

    let profile = diag.thread_profile(0).unwrap();
    assert_eq!(profile.origin_site, CallSite::new("main", 0));

    let all = diag.aggregates(0, GroupingPolicy::All);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].lock_count, 5);
    assert_eq!(all[0].exec_count, 5);
    assert_eq!(all[0].unlock_count, 5);
    assert_eq!(all[0].average_exec(), 2.0);

    let report = diag.render().unwrap();
    assert!(
        report.contains("main 0:\nAll:\nM f.c 10: 0.000 over 5, 2.000 over 5, 0.000 over 5, 0\n"),
        "unexpected report:\n{}",
        report
    );
}

#[test]
fn test_paired_locks_same_count_everywhere() {
    let (diag, _) = manual_profiler();
    let m = LockHandle::new();
    for _ in 0..100 {
        diag.on_lock(Some(&m), "m", site(1));
        diag.on_unlock(Some(&m), "m", site(2));
    }

    for policy in GroupingPolicy::EVERY {
        let entries = diag.aggregates(0, policy);
        let locks: u64 = entries.iter().map(|agg| agg.lock_count).sum();
        let execs: u64 = entries.iter().map(|agg| agg.exec_count).sum();
        let unlocks: u64 = entries.iter().map(|agg| agg.unlock_count).sum();
        assert_eq!((locks, execs, unlocks), (100, 100, 100), "{:?}", policy);
    }
    assert_eq!(diag.totals().lock_count, 100);
}

#[test]
fn test_self_relock_keeps_first_hold() {
    let (diag, clock) = manual_profiler();
    let m = LockHandle::new();

    diag.on_lock(Some(&m), "m", site(1));
    clock.advance(4);
    diag.on_lock(Some(&m), "m", site(2));

    assert_eq!(diag.violations().len(), 1);
    let holds = diag.holds();
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].site, site(1));
    assert_eq!(holds[0].acquired_at, 0);
    assert_eq!(holds[0].owner, 0);
}

#[test]
fn test_relock_after_unlock_is_fine() {
    let (diag, _) = manual_profiler();
    let m = LockHandle::new();
    diag.on_lock(Some(&m), "m", site(1));
    diag.on_unlock(Some(&m), "m", site(1));
    diag.on_lock(Some(&m), "m", site(1));
    diag.on_unlock(Some(&m), "m", site(1));
    assert!(diag.violations().is_empty());
}

#[test]
fn test_unheld_unlock_mutates_no_aggregate() {
    let (diag, _) = manual_profiler();
    let m = LockHandle::new();
    let other = LockHandle::new();

    diag.on_lock(Some(&other), "other", site(1));
    diag.on_unlock(Some(&other), "other", site(2));
    let before: Vec<_> = GroupingPolicy::EVERY
        .iter()
        .map(|&policy| diag.aggregates(0, policy))
        .collect();
    let totals_before = diag.totals();

    diag.on_unlock(Some(&m), "m", site(3));

    let after: Vec<_> = GroupingPolicy::EVERY
        .iter()
        .map(|&policy| diag.aggregates(0, policy))
        .collect();
    assert_eq!(before, after);
    assert_eq!(totals_before, diag.totals());
    assert_eq!(
        diag.violations(),
        vec![Violation::UnheldUnlock {
            label: "m".to_string(),
            site: site(3),
        }]
    );
}

#[test]
fn test_double_unlock_reports_second() {
    let (diag, _) = manual_profiler();
    let m = LockHandle::new();
    diag.on_lock(Some(&m), "m", site(1));
    diag.on_unlock(Some(&m), "m", site(2));
    diag.on_unlock(Some(&m), "m", site(3));
    assert_eq!(diag.violations().len(), 1);
    assert_eq!(diag.aggregates(0, GroupingPolicy::All)[0].unlock_count, 1);
}

#[test]
fn test_two_mutexes_one_site() {
    let (diag, _) = manual_profiler();
    let a = LockHandle::new();
    let b = LockHandle::new();

    for _ in 0..3 {
        diag.on_lock(Some(&a), "pool[i]", site(30));
        diag.on_unlock(Some(&a), "pool[i]", site(31));
    }
    for _ in 0..2 {
        diag.on_lock(Some(&b), "pool[i]", site(30));
        diag.on_unlock(Some(&b), "pool[i]", site(31));
    }

    let all = diag.aggregates(0, GroupingPolicy::All);
    let by_mutex = diag.aggregates(0, GroupingPolicy::ByMutex);
    let by_position = diag.aggregates(0, GroupingPolicy::ByPosition);
    assert_eq!(all.len(), 2);
    assert_eq!(by_mutex.len(), 2);
    assert_eq!(by_position.len(), 1);
    assert_eq!(by_position[0].lock_count, 5);
}

#[test]
fn test_by_unique_merges_on_label() {
    let (diag, _) = manual_profiler();
    let a = LockHandle::new();
    let b = LockHandle::new();

    diag.on_lock(Some(&a), "world", site(1));
    diag.on_unlock(Some(&a), "world", site(1));
    diag.on_lock(Some(&b), "world", site(2));
    diag.on_unlock(Some(&b), "world", site(2));
    // Matches the first entry by mutex only
    diag.on_lock(Some(&a), "assets", site(3));
    diag.on_unlock(Some(&a), "assets", site(3));

    let unique = diag.aggregates(0, GroupingPolicy::ByUnique);
    assert_eq!(unique.len(), 1);
    assert_eq!(unique[0].label, "world");
    assert_eq!(unique[0].lock_count, 3);
}

/// ManualClock that counts how often it has been read
#[derive(Debug, Default)]
struct CountingClock {
    inner: ManualClock,
    reads: AtomicUsize,
}

impl ClockSource for CountingClock {
    fn now_ms(&self) -> u64 {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.now_ms()
    }
}

#[test]
fn test_lock_wait_measured_under_contention() {
    let clock = Arc::new(CountingClock::default());
    let backend = ParkingLotBackend::with_clock(Arc::clone(&clock));
    let diag = Arc::new(Diagnostics::new(backend, ProfilerConfig::default()));
    let m = Arc::new(LockHandle::new());

    diag.on_lock(Some(&*m), "m", site(1));
    let reads_before_spawn = clock.reads.load(Ordering::SeqCst);

    let (d2, m2) = (Arc::clone(&diag), Arc::clone(&m));
    let waiter = diag
        .on_thread_create(move || d2.on_lock(Some(&*m2), "m", site(50)), site(40))
        .unwrap();

    // The waiter's only clock read before blocking is its wait start
    while clock.reads.load(Ordering::SeqCst) == reads_before_spawn {
        std::thread::yield_now();
    }
    clock.inner.advance(7);
    diag.on_unlock(Some(&*m), "m", site(2));
    waiter.join().unwrap();

    let child = diag.aggregates(1, GroupingPolicy::All);
    assert_eq!(child[0].lock_count, 1);
    assert_eq!(child[0].lock_time_total, 7);
    assert_eq!(diag.thread_profile(1).unwrap().cumulative_lock_wait, 7);
    assert_eq!(diag.thread_profile(1).unwrap().origin_site, site(40));

    let holds = diag.holds();
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].owner, 1);
}

#[test]
fn test_unlock_by_non_owner_credits_owner() {
    let (diag, clock) = manual_profiler();
    let m = Arc::new(LockHandle::new());
    diag.on_lock(Some(&*m), "m", site(1));
    clock.advance(3);

    let (d2, m2) = (Arc::clone(&diag), Arc::clone(&m));
    diag.on_thread_create(move || d2.on_unlock(Some(&*m2), "m", site(9)), site(8))
        .unwrap()
        .join()
        .unwrap();

    assert!(diag.violations().is_empty());
    assert_eq!(diag.aggregates(0, GroupingPolicy::All)[0].exec_time_total, 3);
    assert!(diag.aggregates(1, GroupingPolicy::All).is_empty());
    assert!(!m.is_locked());
}
