//! Which mutexes are held right now, by whom, and since when

use crate::call_site::{CallSite, MutexId};
use crate::registry::AggregateRefs;
use fnv::FnvHashMap;

/// A monitored mutex that is currently locked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveHold {
    pub mutex: MutexId,
    pub owner: usize,
    pub label: String,
    pub site: CallSite,
    pub acquired_at: u64,
    /// Entries in the owner's four views
    pub refs: AggregateRefs,
}

/// At most one [`ActiveHold`] per mutex identity
#[derive(Debug, Default)]
pub struct ActiveHoldTable {
    holds: FnvHashMap<MutexId, ActiveHold>,
}

impl ActiveHoldTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mutex: MutexId) -> Option<&ActiveHold> {
        self.holds.get(&mutex)
    }

    /// Record `hold`, returning whatever it displaced
    pub fn insert(&mut self, hold: ActiveHold) -> Option<ActiveHold> {
        self.holds.insert(hold.mutex, hold)
    }

    pub fn remove(&mut self, mutex: MutexId) -> Option<ActiveHold> {
        self.holds.remove(&mutex)
    }

    pub fn len(&self) -> usize {
        self.holds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }

    /// Holds ordered by mutex identity
    pub fn sorted(&self) -> Vec<&ActiveHold> {
        let mut holds: Vec<&ActiveHold> = self.holds.values().collect();
        holds.sort_by_key(|hold| hold.mutex);
        holds
    }
}
