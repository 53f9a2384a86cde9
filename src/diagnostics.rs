//! The instrumentation facade
//!
//! Each `on_*` operation stands in for a raw primitive call. Bookkeeping is
//! done under one internal guard; the real, possibly blocking call always
//! happens with the guard released, so the profiler never serializes the
//! program it measures and never holds its own lock while a monitored lock
//! is contended.
//!
//! Per mutex identity the profiler tracks `FREE -> HELD(thread) -> FREE`.
//! Two protocol violations are detected and logged instead of forwarded:
//!
//! - **self-relock**: the holder locks again. The real lock is *not* taken
//!   (it would deadlock) and the caller proceeds without it.
//! - **unheld unlock**: no hold is recorded. The real unlock is *not*
//!   performed.
//!
//! In both cases the caller's view of the mutex diverges from the real
//! primitive. That is the documented price of never crashing or
//! deadlocking the monitored program.
//!
//! A null handle is a usage fault and aborts the process.

use crate::aggregate::{Aggregate, GroupingPolicy};
use crate::backend::{ParkingLotBackend, SyncBackend, ThreadKey};
use crate::call_site::{CallSite, MutexId};
use crate::config::ProfilerConfig;
use crate::error::{ProfilerError, Result};
use crate::holds::{ActiveHold, ActiveHoldTable};
use crate::registry::{AggregateRefs, ThreadProfile, ThreadRegistry};
use crate::report::{ReportGenerator, SessionTotals, Snapshot, ThreadSnapshot, ViewSnapshot};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

/// A synchronization protocol violation observed by the profiler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Violation {
    /// A thread tried to lock a mutex it already holds
    SelfRelock {
        label: String,
        site: CallSite,
        original_site: CallSite,
    },
    /// A mutex was unlocked while no hold was recorded for it
    UnheldUnlock { label: String, site: CallSite },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::SelfRelock {
                label,
                site,
                original_site,
            } => write!(
                f,
                "attempted to lock already locked mutex {} from same thread at {}; originally locked at {}",
                label, site, original_site
            ),
            Violation::UnheldUnlock { label, site } => {
                write!(f, "attempted to unlock not locked mutex {} at {}", label, site)
            }
        }
    }
}

/// Everything guarded by the profiler's internal mutex
#[derive(Debug)]
struct DiagnosticState {
    registry: ThreadRegistry,
    holds: ActiveHoldTable,
    totals: SessionTotals,
    violation_count: usize,
    /// Most recent violations, oldest first, at most `violation_history` long
    recent_violations: VecDeque<Violation>,
    violation_history: usize,
}

/// A lock whose views have been resolved but whose real acquisition is pending
struct PendingLock {
    mutex: MutexId,
    thread: usize,
    refs: AggregateRefs,
}

impl DiagnosticState {
    fn record_violation(&mut self, violation: Violation) {
        tracing::warn!(%violation, "lock protocol violation");
        self.violation_count += 1;
        if self.violation_history == 0 {
            return;
        }
        if self.recent_violations.len() == self.violation_history {
            self.recent_violations.pop_front();
        }
        self.recent_violations.push_back(violation);
    }

    /// Credit a completed acquisition and open the hold
    fn commit_lock(
        &mut self,
        pending: PendingLock,
        label: &str,
        site: CallSite,
        waited: u64,
        now: u64,
    ) {
        let slot = &mut self.registry[pending.thread];
        slot.views.update(&pending.refs, |agg| agg.record_lock(waited));
        slot.profile.cumulative_lock_wait += waited;
        self.totals.lock_wait += waited;
        self.totals.lock_count += 1;

        let hold = ActiveHold {
            mutex: pending.mutex,
            owner: pending.thread,
            label: label.to_string(),
            site,
            acquired_at: now,
            refs: pending.refs,
        };
        tracing::trace!(mutex = %hold.mutex, owner = hold.owner, site = %hold.site, waited, "hold opened");
        if let Some(stale) = self.holds.insert(hold) {
            tracing::debug!(mutex = %stale.mutex, owner = stale.owner, site = %stale.site, "replaced stale hold");
        }
    }

    /// Close `hold`, crediting its critical section to the owner's views
    fn close_hold(&mut self, hold: &ActiveHold, now: u64) {
        let exec = now.saturating_sub(hold.acquired_at);
        self.registry[hold.owner]
            .views
            .update(&hold.refs, |agg| agg.record_exec(exec));
        tracing::trace!(mutex = %hold.mutex, owner = hold.owner, exec, "hold closed");
    }

    fn credit_unlock(&mut self, hold: &ActiveHold, unlock_time: u64) {
        let slot = &mut self.registry[hold.owner];
        slot.views
            .update(&hold.refs, |agg| agg.record_unlock(unlock_time));
        slot.profile.cumulative_lock_wait += unlock_time;
        self.totals.lock_wait += unlock_time;
    }
}

fn usage_fault(operation: &str, handle: &str, label: &str, site: &CallSite) -> ! {
    tracing::error!(operation, handle, label, %site, "null handle passed to profiler, aborting");
    std::process::abort()
}

/// Lock profiler shared by every thread of the monitored program
///
/// Construct once (this is the session's `init`), share through an `Arc`,
/// call [`Diagnostics::shutdown`] at the end to write the report.
///
/// # Example
/// ```
/// use lockprof::backend::LockHandle;
/// use lockprof::{CallSite, Diagnostics};
/// use std::sync::Arc;
///
/// let diag = Arc::new(Diagnostics::with_config(Default::default()));
/// let state = Arc::new(LockHandle::new());
///
/// diag.on_lock(Some(&*state), "state", CallSite::new("world.rs", 10));
/// diag.on_unlock(Some(&*state), "state", CallSite::new("world.rs", 12));
///
/// assert_eq!(diag.totals().lock_count, 1);
/// assert!(diag.violations().is_empty());
/// ```
pub struct Diagnostics<B: SyncBackend = ParkingLotBackend> {
    backend: B,
    config: ProfilerConfig,
    session_start: OnceLock<u64>,
    state: Mutex<DiagnosticState>,
}

impl Diagnostics<ParkingLotBackend> {
    /// Profiler over the default backend and the wall clock
    pub fn with_config(config: ProfilerConfig) -> Self {
        Self::new(ParkingLotBackend::new(), config)
    }
}

impl<B: SyncBackend> Diagnostics<B> {
    pub fn new(backend: B, config: ProfilerConfig) -> Self {
        let state = DiagnosticState {
            registry: ThreadRegistry::new(config.tables.buckets),
            holds: ActiveHoldTable::new(),
            totals: SessionTotals::default(),
            violation_count: 0,
            recent_violations: VecDeque::new(),
            violation_history: config.violations.history,
        };
        Self {
            backend,
            config,
            session_start: OnceLock::new(),
            state: Mutex::new(state),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    fn mark_session_start(&self) -> u64 {
        *self.session_start.get_or_init(|| self.backend.now_ms())
    }

    /// Lock `mutex` on behalf of the caller, timing the wait
    pub fn on_lock(&self, mutex: Option<&B::Mutex>, label: &str, site: CallSite) {
        let Some(mutex) = mutex else {
            usage_fault("lock", "mutex", label, &site)
        };
        self.mark_session_start();
        let id = MutexId::of(mutex);
        let me = self.backend.current_thread();

        let pending = {
            let mut state = self.state.lock();
            let thread = state.registry.register_or_get(me, None, &site);

            if let Some(hold) = state.holds.get(id) {
                if hold.owner == thread {
                    let violation = Violation::SelfRelock {
                        label: label.to_string(),
                        site,
                        original_site: hold.site.clone(),
                    };
                    state.record_violation(violation);
                    return;
                }
            }

            let refs = state.registry[thread].views.resolve(id, &site, label);
            PendingLock {
                mutex: id,
                thread,
                refs,
            }
        };

        let before = self.backend.now_ms();
        self.backend.lock(mutex);
        let after = self.backend.now_ms();

        self.state
            .lock()
            .commit_lock(pending, label, site, after.saturating_sub(before), after);
    }

    /// Unlock `mutex` on behalf of the caller, timing the critical section and the release
    pub fn on_unlock(&self, mutex: Option<&B::Mutex>, label: &str, site: CallSite) {
        let Some(mutex) = mutex else {
            usage_fault("unlock", "mutex", label, &site)
        };
        self.mark_session_start();
        let id = MutexId::of(mutex);
        let me = self.backend.current_thread();

        // The hold leaves the table before the real unlock; afterwards the
        // next owner may already be inserting its own.
        let hold = {
            let mut state = self.state.lock();
            let Some(hold) = state.holds.remove(id) else {
                let violation = Violation::UnheldUnlock {
                    label: label.to_string(),
                    site,
                };
                state.record_violation(violation);
                return;
            };

            if state.registry.index_of(me) != Some(hold.owner) {
                tracing::debug!(mutex = %id, owner = hold.owner, %site, "mutex unlocked by a thread other than its owner");
            }

            let now = self.backend.now_ms();
            state.close_hold(&hold, now);
            hold
        };

        let before = self.backend.now_ms();
        self.backend.unlock(mutex);
        let after = self.backend.now_ms();

        self.state
            .lock()
            .credit_unlock(&hold, after.saturating_sub(before));
    }

    /// Sleep for `ms`, crediting the elapsed time to the caller's delay bucket
    #[track_caller]
    pub fn on_delay(&self, ms: u64) {
        let site = CallSite::caller();
        self.mark_session_start();
        let me = self.backend.current_thread();

        let before = self.backend.now_ms();
        self.backend.delay(ms);
        let elapsed = self.backend.now_ms().saturating_sub(before);

        let mut state = self.state.lock();
        let thread = state.registry.register_or_get(me, None, &site);
        state.registry[thread].profile.cumulative_delay += elapsed;
        state.totals.delay += elapsed;
    }

    /// Wait on `cond`, releasing and re-acquiring `mutex` around the wait
    ///
    /// The release is booked as a synthetic unlock (no unlock time) and the
    /// re-acquisition as a synthetic lock whose wait is the whole wait
    /// duration. That duration is additionally credited to the thread's
    /// condition-wait bucket.
    pub fn on_cond_wait(
        &self,
        cond: Option<&B::Cond>,
        mutex: Option<&B::Mutex>,
        label: &str,
        site: CallSite,
    ) {
        let Some(cond) = cond else {
            usage_fault("cond_wait", "cond", label, &site)
        };
        let Some(mutex) = mutex else {
            usage_fault("cond_wait", "mutex", label, &site)
        };
        self.mark_session_start();
        let id = MutexId::of(mutex);
        let me = self.backend.current_thread();

        let pending = {
            let mut state = self.state.lock();
            let thread = state.registry.register_or_get(me, None, &site);

            match state.holds.remove(id) {
                Some(hold) => {
                    let now = self.backend.now_ms();
                    state.close_hold(&hold, now);
                    state.credit_unlock(&hold, 0);
                }
                None => {
                    let violation = Violation::UnheldUnlock {
                        label: label.to_string(),
                        site: site.clone(),
                    };
                    state.record_violation(violation);
                }
            }

            let refs = state.registry[thread].views.resolve(id, &site, label);
            PendingLock {
                mutex: id,
                thread,
                refs,
            }
        };

        let before = self.backend.now_ms();
        self.backend.cond_wait(cond, mutex);
        let after = self.backend.now_ms();
        let waited = after.saturating_sub(before);

        let mut state = self.state.lock();
        let thread = pending.thread;
        state.commit_lock(pending, label, site, waited, after);
        state.registry[thread].profile.cumulative_cond_wait += waited;
        state.totals.cond_wait += waited;
    }

    #[track_caller]
    pub fn cond_signal(&self, cond: Option<&B::Cond>) {
        let Some(cond) = cond else {
            usage_fault("cond_signal", "cond", "", &CallSite::caller())
        };
        self.backend.cond_signal(cond);
    }

    #[track_caller]
    pub fn cond_broadcast(&self, cond: Option<&B::Cond>) {
        let Some(cond) = cond else {
            usage_fault("cond_broadcast", "cond", "", &CallSite::caller())
        };
        self.backend.cond_broadcast(cond);
    }

    fn register(&self, thread: ThreadKey, origin: Option<&CallSite>, fallback: &CallSite) -> usize {
        self.state
            .lock()
            .registry
            .register_or_get(thread, origin, fallback)
    }

    /// Spawn a thread whose profile records `site` as its origin
    ///
    /// Both the spawning and the spawned thread register the new thread
    /// before anything else happens, so the child's first event already sees
    /// `site` no matter which side runs first.
    pub fn on_thread_create<F, T>(self: &Arc<Self>, entry: F, site: CallSite) -> Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.mark_session_start();
        // Spawner first, so an unregistered main thread still gets index 0
        self.register(self.backend.current_thread(), None, &site);

        let diagnostics = Arc::clone(self);
        let origin = site.clone();
        let handle = self
            .backend
            .spawn(move || {
                let me = diagnostics.backend.current_thread();
                diagnostics.register(me, Some(&origin), &origin);
                entry()
            })
            .map_err(ProfilerError::Spawn)?;

        self.register(handle.thread().id(), Some(&site), &site);
        Ok(handle)
    }

    pub fn thread_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    pub fn thread_index(&self, thread: ThreadKey) -> Option<usize> {
        self.state.lock().registry.index_of(thread)
    }

    pub fn current_thread_index(&self) -> Option<usize> {
        self.thread_index(self.backend.current_thread())
    }

    pub fn thread_profile(&self, index: usize) -> Option<ThreadProfile> {
        self.state
            .lock()
            .registry
            .slot(index)
            .map(|slot| slot.profile.clone())
    }

    /// One view of a thread's aggregates, in report order
    pub fn aggregates(&self, index: usize, policy: GroupingPolicy) -> Vec<Aggregate> {
        let state = self.state.lock();
        state
            .registry
            .slot(index)
            .map(|slot| {
                slot.views
                    .table(policy)
                    .sorted()
                    .into_iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mutexes currently held, ordered by identity
    pub fn holds(&self) -> Vec<ActiveHold> {
        self.state
            .lock()
            .holds
            .sorted()
            .into_iter()
            .cloned()
            .collect()
    }

    /// The most recent violations, oldest first
    pub fn violations(&self) -> Vec<Violation> {
        self.state.lock().recent_violations.iter().cloned().collect()
    }

    /// Every violation seen this session, including those no longer kept
    pub fn violation_count(&self) -> usize {
        self.state.lock().violation_count
    }

    pub fn totals(&self) -> SessionTotals {
        self.state.lock().totals
    }

    /// Consistent copy of the whole profiler state, ending now
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        let session_end = self.backend.now_ms();
        let session_start = self.session_start.get().copied().unwrap_or(session_end);

        let threads = state
            .registry
            .iter()
            .enumerate()
            .map(|(index, slot)| ThreadSnapshot {
                index,
                profile: slot.profile.clone(),
                views: GroupingPolicy::EVERY
                    .iter()
                    .map(|&policy| ViewSnapshot {
                        policy,
                        aggregates: slot.views.table(policy).sorted().into_iter().cloned().collect(),
                    })
                    .collect(),
            })
            .collect();

        let unique = GroupingPolicy::ByUnique;
        let locked = state
            .holds
            .sorted()
            .into_iter()
            .filter_map(|hold| {
                state.registry[hold.owner]
                    .views
                    .table(unique)
                    .get(hold.refs[unique.index()])
                    .cloned()
            })
            .collect();

        Snapshot {
            threads,
            locked,
            totals: state.totals,
            violations: state.violation_count,
            session_start,
            session_end,
        }
    }

    /// Render the report in the configured format
    pub fn render(&self) -> Result<String> {
        ReportGenerator::from_config(&self.config.report).render(&self.snapshot())
    }

    /// Write the report to `path` in the configured format
    pub fn generate<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ReportGenerator::from_config(&self.config.report).write(&self.snapshot(), path)
    }

    /// End the session: write the report to the configured path
    pub fn shutdown(&self) -> Result<Snapshot> {
        let snapshot = self.snapshot();
        let path = &self.config.report.path;
        ReportGenerator::from_config(&self.config.report).write(&snapshot, path)?;

        if !snapshot.locked.is_empty() {
            tracing::warn!(held = snapshot.locked.len(), "mutexes still held at shutdown");
        }
        tracing::info!(
            path = %path.display(),
            threads = snapshot.threads.len(),
            locks = snapshot.totals.lock_count,
            violations = snapshot.violations,
            "lock report written"
        );
        Ok(snapshot)
    }
}
