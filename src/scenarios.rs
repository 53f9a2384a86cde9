//! Built-in workloads driven through the profiler by the `lockprof` binary
//!
//! They double as usage examples for the instrumentation macros.

use crate::backend::{CondHandle, LockHandle, ParkingLotBackend};
use crate::clock::ClockSource;
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::{cond_wait, create_thread, delay, lock, unlock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

type Profiler<C> = Arc<Diagnostics<ParkingLotBackend<C>>>;

/// Private mutexes per contention worker
const POOL_SIZE: usize = 2;

fn join_all<T>(handles: Vec<JoinHandle<T>>) -> Vec<T> {
    handles
        .into_iter()
        .map(|handle| match handle.join() {
            Ok(value) => value,
            Err(payload) => std::panic::resume_unwind(payload),
        })
        .collect()
}

/// Lock a pool member from one fixed site, so the worker's ByPosition view
/// merges all of its pool members into a single entry
fn touch_pool<C: ClockSource + 'static>(diag: &Profiler<C>, member: &Arc<LockHandle>) {
    lock!(diag, member);
    unlock!(diag, member);
}

/// `threads` workers each take a shared mutex `iterations` times, holding it
/// for `hold_ms`, and touch one of their private pool mutexes in between
pub fn contention<C: ClockSource + 'static>(
    diag: &Profiler<C>,
    threads: usize,
    iterations: usize,
    hold_ms: u64,
) -> Result<()> {
    let shared = Arc::new(LockHandle::new());
    let mut handles = Vec::with_capacity(threads);

    for _ in 0..threads {
        let diag = Arc::clone(diag);
        let shared = Arc::clone(&shared);
        let pool: Vec<Arc<LockHandle>> = (0..POOL_SIZE)
            .map(|_| Arc::new(LockHandle::new()))
            .collect();
        handles.push(create_thread!(diag.clone(), move || {
            for i in 0..iterations {
                lock!(diag, shared);
                if hold_ms > 0 {
                    delay!(diag, hold_ms);
                }
                unlock!(diag, shared);
                touch_pool(&diag, &pool[i % POOL_SIZE]);
            }
        })?);
    }

    join_all(handles);
    tracing::info!(threads, iterations, "contention workload finished");
    Ok(())
}

/// Lock a mutex twice from the same thread, then release it once
pub fn self_relock<C: ClockSource + 'static>(diag: &Profiler<C>) -> Result<()> {
    let state = Arc::new(LockHandle::new());
    lock!(diag, state);
    lock!(diag, state);
    unlock!(diag, state);
    Ok(())
}

/// Unlock a mutex nobody locked
pub fn unheld_unlock<C: ClockSource + 'static>(diag: &Profiler<C>) -> Result<()> {
    let state = Arc::new(LockHandle::new());
    unlock!(diag, state);
    Ok(())
}

/// Producer and consumer hand `rounds` values across a one-slot mailbox
pub fn cond_ping_pong<C: ClockSource + 'static>(diag: &Profiler<C>, rounds: u64) -> Result<()> {
    let mailbox = Arc::new(LockHandle::new());
    let changed = Arc::new(CondHandle::new());
    // Only read or written while `mailbox` is held
    let slot = Arc::new(AtomicU64::new(0));

    let producer = {
        let (diag, mailbox, changed, slot) = (
            Arc::clone(diag),
            Arc::clone(&mailbox),
            Arc::clone(&changed),
            Arc::clone(&slot),
        );
        create_thread!(diag.clone(), move || {
            for value in 1..=rounds {
                lock!(diag, mailbox);
                while slot.load(Ordering::Relaxed) != 0 {
                    cond_wait!(diag, changed, mailbox);
                }
                slot.store(value, Ordering::Relaxed);
                diag.cond_broadcast(Some(&*changed));
                unlock!(diag, mailbox);
            }
        })?
    };

    let mut received = 0;
    for _ in 0..rounds {
        lock!(diag, mailbox);
        while slot.load(Ordering::Relaxed) == 0 {
            cond_wait!(diag, changed, mailbox);
        }
        received += slot.swap(0, Ordering::Relaxed);
        diag.cond_broadcast(Some(&*changed));
        unlock!(diag, mailbox);
    }

    join_all(vec![producer]);
    tracing::info!(rounds, received, "cond-wait workload finished");
    Ok(())
}

/// Pass a null mutex handle. Aborts the process.
pub fn null_handle<C: ClockSource + 'static>(diag: &Profiler<C>) -> Result<()> {
    diag.on_lock(None, "null", crate::CallSite::caller());
    Ok(())
}
