//! Dense per-thread indices and the data owned by each registered thread

use crate::aggregate::{Aggregate, AggregateTable, GroupingPolicy};
use crate::backend::ThreadKey;
use crate::call_site::{CallSite, MutexId};
use fnv::FnvHashMap;
use serde::Serialize;
use std::ops::{Index, IndexMut};

/// Where a thread came from and how long it spent not running
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadProfile {
    pub origin_site: CallSite,
    /// Lock waits plus unlock times (ms)
    pub cumulative_lock_wait: u64,
    pub cumulative_delay: u64,
    pub cumulative_cond_wait: u64,
}

impl ThreadProfile {
    fn new(origin_site: CallSite) -> Self {
        Self {
            origin_site,
            cumulative_lock_wait: 0,
            cumulative_delay: 0,
            cumulative_cond_wait: 0,
        }
    }
}

/// Slots of one event in each of a thread's four tables, indexed by
/// [`GroupingPolicy::index`]
pub type AggregateRefs = [usize; 4];

/// One table per grouping policy
#[derive(Debug, Clone)]
pub struct ViewSet {
    tables: [AggregateTable; 4],
}

impl ViewSet {
    fn new(buckets: usize) -> Self {
        Self {
            tables: GroupingPolicy::EVERY.map(|policy| AggregateTable::new(policy, buckets)),
        }
    }

    pub fn table(&self, policy: GroupingPolicy) -> &AggregateTable {
        &self.tables[policy.index()]
    }

    /// Resolve (or create) the entry for this event in every view
    pub fn resolve(&mut self, mutex: MutexId, site: &CallSite, label: &str) -> AggregateRefs {
        let mut refs = [0; 4];
        for (slot, table) in refs.iter_mut().zip(self.tables.iter_mut()) {
            *slot = table.get_or_create(mutex, site, label);
        }
        refs
    }

    /// Apply `update` to the entry each ref points at
    pub fn update<F>(&mut self, refs: &AggregateRefs, mut update: F)
    where
        F: FnMut(&mut Aggregate),
    {
        for (&slot, table) in refs.iter().zip(self.tables.iter_mut()) {
            if let Some(entry) = table.get_mut(slot) {
                update(entry);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThreadSlot {
    pub profile: ThreadProfile,
    pub views: ViewSet,
}

/// Append-only map from OS thread id to a dense index
///
/// Index 0 belongs to whichever thread registers first; if it did not
/// bring an origin of its own it is recorded as [`CallSite::MAIN`].
/// Threads are never removed, so profiles outlive the threads they describe.
#[derive(Debug)]
pub struct ThreadRegistry {
    index_of: FnvHashMap<ThreadKey, usize>,
    slots: Vec<ThreadSlot>,
    buckets: usize,
}

impl ThreadRegistry {
    pub fn new(buckets: usize) -> Self {
        Self {
            index_of: FnvHashMap::default(),
            slots: Vec::new(),
            buckets,
        }
    }

    /// Look up `thread`, registering it with `origin` if it is new
    ///
    /// `None` as origin means "no better provenance than this event"; the
    /// very first thread then becomes `main`, later ones take `fallback`.
    pub fn register_or_get(
        &mut self,
        thread: ThreadKey,
        origin: Option<&CallSite>,
        fallback: &CallSite,
    ) -> usize {
        if let Some(&index) = self.index_of.get(&thread) {
            return index;
        }

        let origin_site = match origin {
            Some(site) => site.clone(),
            None if self.slots.is_empty() => CallSite::MAIN,
            None => fallback.clone(),
        };

        let index = self.slots.len();
        tracing::debug!(index, origin = %origin_site, "registered thread");
        self.slots.push(ThreadSlot {
            profile: ThreadProfile::new(origin_site),
            views: ViewSet::new(self.buckets),
        });
        self.index_of.insert(thread, index);
        index
    }

    pub fn index_of(&self, thread: ThreadKey) -> Option<usize> {
        self.index_of.get(&thread).copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&ThreadSlot> {
        self.slots.get(index)
    }

    /// Slots in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ThreadSlot> {
        self.slots.iter()
    }
}

impl Index<usize> for ThreadRegistry {
    type Output = ThreadSlot;

    fn index(&self, index: usize) -> &ThreadSlot {
        &self.slots[index]
    }
}

impl IndexMut<usize> for ThreadRegistry {
    fn index_mut(&mut self, index: usize) -> &mut ThreadSlot {
        &mut self.slots[index]
    }
}
