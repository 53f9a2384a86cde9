//! Per-key lock statistics and the four grouping views over them
//!
//! Every lock event is filed into four tables at once. They differ only in
//! which events they consider "the same":
//!
//! | Policy       | Equal when                                   | Hash            |
//! |--------------|----------------------------------------------|-----------------|
//! | `All`        | same mutex and same call site                | mutex + line    |
//! | `ByMutex`    | same mutex                                   | mutex           |
//! | `ByPosition` | same call site                               | line            |
//! | `ByUnique`   | same mutex, or same label, or same call site | constant        |
//!
//! `ByUnique` is not an equivalence relation. Two events can each match a
//! third entry without matching each other, and whichever entry comes first
//! in the chain absorbs the event. The report relies on exactly this
//! first-match behaviour to fold related lock sites together.

use crate::call_site::{CallSite, MutexId};
use serde::Serialize;

/// Accumulated timings for one grouping key
///
/// The label, site and mutex are those of the first event that created the
/// entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aggregate {
    pub label: String,
    pub site: CallSite,
    pub mutex: MutexId,
    /// Time spent waiting to acquire (ms)
    pub lock_time_total: u64,
    pub lock_count: u64,
    /// Time spent inside the critical section (ms)
    pub exec_time_total: u64,
    pub exec_count: u64,
    /// Time spent in the release call (ms)
    pub unlock_time_total: u64,
    pub unlock_count: u64,
}

impl Aggregate {
    fn new(mutex: MutexId, site: &CallSite, label: &str) -> Self {
        Self {
            label: label.to_string(),
            site: site.clone(),
            mutex,
            lock_time_total: 0,
            lock_count: 0,
            exec_time_total: 0,
            exec_count: 0,
            unlock_time_total: 0,
            unlock_count: 0,
        }
    }

    pub fn record_lock(&mut self, ms: u64) {
        self.lock_time_total += ms;
        self.lock_count += 1;
    }

    pub fn record_exec(&mut self, ms: u64) {
        self.exec_time_total += ms;
        self.exec_count += 1;
    }

    pub fn record_unlock(&mut self, ms: u64) {
        self.unlock_time_total += ms;
        self.unlock_count += 1;
    }

    /// Lock plus unlock time; the sort key of every report view
    pub fn contention_total(&self) -> u64 {
        self.lock_time_total + self.unlock_time_total
    }

    pub fn average_lock(&self) -> f64 {
        average(self.lock_time_total, self.lock_count)
    }

    pub fn average_exec(&self) -> f64 {
        average(self.exec_time_total, self.exec_count)
    }

    pub fn average_unlock(&self) -> f64 {
        average(self.unlock_time_total, self.unlock_count)
    }
}

fn average(total: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

/// How a table decides that two lock events share an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GroupingPolicy {
    All,
    ByMutex,
    ByPosition,
    ByUnique,
}

impl GroupingPolicy {
    /// Every policy, in report order
    pub const EVERY: [GroupingPolicy; 4] = [
        GroupingPolicy::All,
        GroupingPolicy::ByMutex,
        GroupingPolicy::ByPosition,
        GroupingPolicy::ByUnique,
    ];

    /// Section heading used in the text report
    pub fn title(self) -> &'static str {
        match self {
            GroupingPolicy::All => "All",
            GroupingPolicy::ByMutex => "By Mutex",
            GroupingPolicy::ByPosition => "By Position",
            GroupingPolicy::ByUnique => "By Unique",
        }
    }

    pub fn index(self) -> usize {
        match self {
            GroupingPolicy::All => 0,
            GroupingPolicy::ByMutex => 1,
            GroupingPolicy::ByPosition => 2,
            GroupingPolicy::ByUnique => 3,
        }
    }

    /// Buckets to allocate given the configured default
    fn bucket_count(self, configured: usize) -> usize {
        match self {
            GroupingPolicy::ByUnique => 1,
            _ => configured.max(1),
        }
    }

    fn hash(self, mutex: MutexId, site: &CallSite) -> usize {
        match self {
            GroupingPolicy::All => mutex.as_raw().wrapping_add(site.line as usize),
            GroupingPolicy::ByMutex => mutex.as_raw(),
            GroupingPolicy::ByPosition => site.line as usize,
            GroupingPolicy::ByUnique => 0,
        }
    }

    fn matches(self, entry: &Aggregate, mutex: MutexId, site: &CallSite, label: &str) -> bool {
        match self {
            GroupingPolicy::All => entry.mutex == mutex && entry.site == *site,
            GroupingPolicy::ByMutex => entry.mutex == mutex,
            GroupingPolicy::ByPosition => entry.site == *site,
            GroupingPolicy::ByUnique => {
                entry.mutex == mutex || entry.label == label || entry.site == *site
            }
        }
    }
}

/// Chained hash multi-map from a grouping key to an [`Aggregate`]
///
/// Entries live in an insertion-ordered arena; buckets hold chains of arena
/// slots. Slots are stable for the life of the table, so they can be kept
/// in active hold records while the lock is held.
#[derive(Debug, Clone)]
pub struct AggregateTable {
    policy: GroupingPolicy,
    buckets: Vec<Vec<usize>>,
    entries: Vec<Aggregate>,
}

impl AggregateTable {
    pub fn new(policy: GroupingPolicy, buckets: usize) -> Self {
        Self {
            policy,
            buckets: vec![Vec::new(); policy.bucket_count(buckets)],
            entries: Vec::new(),
        }
    }

    pub fn policy(&self) -> GroupingPolicy {
        self.policy
    }

    /// Find the first entry in the key's chain that the policy considers
    /// equal, or append a new one at the chain tail. Returns its slot.
    pub fn get_or_create(&mut self, mutex: MutexId, site: &CallSite, label: &str) -> usize {
        let bucket = self.policy.hash(mutex, site) % self.buckets.len();
        let chain = &mut self.buckets[bucket];

        if let Some(&slot) = chain
            .iter()
            .find(|&&slot| self.policy.matches(&self.entries[slot], mutex, site, label))
        {
            return slot;
        }

        let slot = self.entries.len();
        self.entries.push(Aggregate::new(mutex, site, label));
        chain.push(slot);
        slot
    }

    pub fn get(&self, slot: usize) -> Option<&Aggregate> {
        self.entries.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Aggregate> {
        self.entries.get_mut(slot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by descending lock plus unlock time, ties in insertion order
    pub fn sorted(&self) -> Vec<&Aggregate> {
        let mut sorted: Vec<&Aggregate> = self.entries.iter().collect();
        // sort_by is stable
        sorted.sort_by(|a, b| b.contention_total().cmp(&a.contention_total()));
        sorted
    }

    pub fn iterate_sorted<F>(&self, mut callback: F)
    where
        F: FnMut(&Aggregate),
    {
        for entry in self.sorted() {
            callback(entry);
        }
    }
}
