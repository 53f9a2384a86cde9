//! The real synchronization primitives the profiler forwards to
//!
//! [`SyncBackend`] is the seam between the bookkeeping in
//! [`crate::diagnostics`] and whatever actually blocks threads. The default
//! [`ParkingLotBackend`] builds lock/unlock style handles on top of
//! `parking_lot`, which (unlike guard based mutexes) can be released from a
//! different call than the one that acquired them.

use crate::clock::{ClockSource, MonotonicClock};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Opaque OS thread identity
pub type ThreadKey = ThreadId;

/// Thread, mutex and condition-variable capability plus a clock
pub trait SyncBackend: Send + Sync + 'static {
    type Mutex: Send + Sync;
    type Cond: Send + Sync;

    fn now_ms(&self) -> u64;

    fn current_thread(&self) -> ThreadKey {
        thread::current().id()
    }

    /// Block until `mutex` is acquired
    fn lock(&self, mutex: &Self::Mutex);

    fn unlock(&self, mutex: &Self::Mutex);

    /// Atomically release `mutex`, wait for a signal on `cond`, then re-acquire `mutex`
    fn cond_wait(&self, cond: &Self::Cond, mutex: &Self::Mutex);

    fn cond_signal(&self, cond: &Self::Cond);

    fn cond_broadcast(&self, cond: &Self::Cond);

    fn delay(&self, ms: u64);

    fn spawn<F, T>(&self, entry: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static;
}

/// Non-reentrant mutex with explicit lock/unlock
#[derive(Debug, Default)]
pub struct LockHandle {
    locked: Mutex<bool>,
    released: Condvar,
}

impl LockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.released.wait(&mut locked);
        }
        *locked = true;
    }

    pub fn try_lock(&self) -> bool {
        let mut locked = self.locked.lock();
        if *locked {
            return false;
        }
        *locked = true;
        true
    }

    pub fn unlock(&self) {
        *self.locked.lock() = false;
        self.released.notify_one();
    }

    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }
}

/// Condition variable usable with [`LockHandle`]
///
/// Waiters block until the generation counter moves, so a signal sent
/// after a waiter has released its mutex is never lost.
#[derive(Debug, Default)]
pub struct CondHandle {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl CondHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait(&self, mutex: &LockHandle) {
        let mut generation = self.generation.lock();
        let seen = *generation;
        mutex.unlock();
        while *generation == seen {
            self.changed.wait(&mut generation);
        }
        drop(generation);
        mutex.lock();
    }

    pub fn signal(&self) {
        *self.generation.lock() += 1;
        self.changed.notify_one();
    }

    pub fn broadcast(&self) {
        *self.generation.lock() += 1;
        self.changed.notify_all();
    }
}

/// Default backend: [`LockHandle`]/[`CondHandle`], OS threads, and a pluggable clock
#[derive(Debug, Default)]
pub struct ParkingLotBackend<C: ClockSource = MonotonicClock> {
    clock: C,
}

impl ParkingLotBackend<MonotonicClock> {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl<C: ClockSource> ParkingLotBackend<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: ClockSource + 'static> SyncBackend for ParkingLotBackend<C> {
    type Mutex = LockHandle;
    type Cond = CondHandle;

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn lock(&self, mutex: &LockHandle) {
        mutex.lock();
    }

    fn unlock(&self, mutex: &LockHandle) {
        mutex.unlock();
    }

    fn cond_wait(&self, cond: &CondHandle, mutex: &LockHandle) {
        cond.wait(mutex);
    }

    fn cond_signal(&self, cond: &CondHandle) {
        cond.signal();
    }

    fn cond_broadcast(&self, cond: &CondHandle) {
        cond.broadcast();
    }

    fn delay(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }

    fn spawn<F, T>(&self, entry: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        thread::Builder::new().spawn(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_lock_handle_excludes() {
        let m = LockHandle::new();
        m.lock();
        assert!(m.is_locked());
        assert!(!m.try_lock());
        m.unlock();
        assert!(m.try_lock());
        m.unlock();
    }

    #[test]
    fn test_lock_handle_unlock_from_other_thread() {
        let m = Arc::new(LockHandle::new());
        m.lock();
        let m2 = Arc::clone(&m);
        thread::spawn(move || m2.unlock()).join().unwrap();
        assert!(!m.is_locked());
    }

    #[test]
    fn test_cond_handle_wakes_waiter() {
        let m = Arc::new(LockHandle::new());
        let c = Arc::new(CondHandle::new());
        let ready = Arc::new(AtomicBool::new(false));

        m.lock();
        let (m2, c2, r2) = (Arc::clone(&m), Arc::clone(&c), Arc::clone(&ready));
        let signaller = thread::spawn(move || {
            m2.lock();
            r2.store(true, Ordering::SeqCst);
            c2.signal();
            m2.unlock();
        });

        while !ready.load(Ordering::SeqCst) {
            c.wait(&m);
        }
        assert!(m.is_locked());
        m.unlock();
        signaller.join().unwrap();
    }
}
