//! Dispatcher-side occupancy table for referral workers.
//!
//! The [`WorkerRegistry`] is a fixed, ordered array with one entry per worker,
//! created at start-up and never resized. Each entry caches the last status
//! its worker reported on the bus. The table sits behind a single
//! [`parking_lot::Mutex`] that is held only for the length of a scan or an
//! update, never across I/O.
//!
//! ## Staleness
//!
//! Workers report `Occupied` only after a referred client has actually
//! connected. Until that report is applied, the cache still says `Free`:
//!
//! - Under [`SelectionPolicy::Cached`] a second client arriving in that window
//!   is referred to the same worker and queues behind the first conversation
//!   in the worker's accept backlog.
//! - Under [`SelectionPolicy::Reserve`] the chosen entry is marked reserved in
//!   the same critical section, so the next scan skips it. The worker's own
//!   `Occupied` report later confirms it. A referred client that never
//!   connects leaves its worker reserved until the worker reports again.

use crate::server::config::SelectionPolicy;
use parking_lot::Mutex;
use turnstile_core::{Endpoint, StatusUpdate, WorkerStatus};

/// Dispatcher's view of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedStatus {
    Free,
    /// Referred to a client whose connection the worker has not reported yet.
    Reserved,
    Occupied,
}

impl From<WorkerStatus> for CachedStatus {
    fn from(status: WorkerStatus) -> Self {
        match status {
            WorkerStatus::Free => Self::Free,
            WorkerStatus::Occupied => Self::Occupied,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WorkerEntry {
    endpoint: Endpoint,
    status: CachedStatus,
}

/// A worker picked for a referral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selected {
    pub index: usize,
    pub endpoint: Endpoint,
}

#[derive(Debug)]
pub struct WorkerRegistry {
    policy: SelectionPolicy,
    entries: Mutex<Vec<WorkerEntry>>,
}

impl WorkerRegistry {
    /// Builds the table in pool order. Every worker starts `Free`.
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>, policy: SelectionPolicy) -> Self {
        let entries = endpoints
            .into_iter()
            .map(|endpoint| WorkerEntry {
                endpoint,
                status: CachedStatus::Free,
            })
            .collect();
        Self {
            policy,
            entries: Mutex::new(entries),
        }
    }

    /// Returns the lowest-indexed worker whose cached status is `Free`.
    ///
    /// Under [`SelectionPolicy::Reserve`] the returned entry is marked
    /// [`CachedStatus::Reserved`] before the lock is released.
    pub fn select_free_worker(&self) -> Option<Selected> {
        let mut entries = self.entries.lock();
        let (index, entry) = entries
            .iter_mut()
            .enumerate()
            .find(|(_, entry)| entry.status == CachedStatus::Free)?;

        if self.policy == SelectionPolicy::Reserve {
            entry.status = CachedStatus::Reserved;
        }
        Some(Selected {
            index,
            endpoint: entry.endpoint,
        })
    }

    /// Overwrites the cached status of the worker listening on
    /// `update.worker_port`. Returns the worker's index, or `None` if no
    /// worker uses that port.
    pub fn apply(&self, update: StatusUpdate) -> Option<usize> {
        let mut entries = self.entries.lock();
        let (index, entry) = entries
            .iter_mut()
            .enumerate()
            .find(|(_, entry)| entry.endpoint.port() == update.worker_port)?;
        entry.status = update.status.into();
        Some(index)
    }

    /// Cached statuses in pool order.
    pub fn snapshot(&self) -> Vec<CachedStatus> {
        self.entries.lock().iter().map(|e| e.status).collect()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.entries.lock().iter().map(|e| e.endpoint).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn policy(&self) -> SelectionPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CachedStatus::{Free, Occupied, Reserved};

    fn registry(n: u16, policy: SelectionPolicy) -> WorkerRegistry {
        WorkerRegistry::new((1..=n).map(|i| Endpoint::localhost(9000 + i)), policy)
    }

    fn report(port: u16, status: WorkerStatus) -> StatusUpdate {
        StatusUpdate {
            worker_port: port,
            status,
        }
    }

    #[test]
    fn selects_lowest_free_index() {
        let registry = registry(3, SelectionPolicy::Cached);
        assert_eq!(registry.select_free_worker().unwrap().index, 0);

        registry.apply(report(9001, WorkerStatus::Occupied));
        let selected = registry.select_free_worker().unwrap();
        assert_eq!(selected.index, 1);
        assert_eq!(selected.endpoint, Endpoint::localhost(9002));

        registry.apply(report(9001, WorkerStatus::Free));
        assert_eq!(registry.select_free_worker().unwrap().index, 0);
    }

    #[test]
    fn none_when_all_occupied() {
        let registry = registry(2, SelectionPolicy::Cached);
        registry.apply(report(9001, WorkerStatus::Occupied));
        registry.apply(report(9002, WorkerStatus::Occupied));
        assert_eq!(registry.select_free_worker(), None);
    }

    #[test]
    fn cached_policy_repeats_until_report_arrives() {
        let registry = registry(2, SelectionPolicy::Cached);
        assert_eq!(registry.select_free_worker().unwrap().index, 0);
        assert_eq!(registry.select_free_worker().unwrap().index, 0);
        assert_eq!(registry.snapshot(), vec![Free, Free]);
    }

    #[test]
    fn reserve_policy_skips_reserved_entries() {
        let registry = registry(2, SelectionPolicy::Reserve);
        assert_eq!(registry.select_free_worker().unwrap().index, 0);
        assert_eq!(registry.select_free_worker().unwrap().index, 1);
        assert_eq!(registry.select_free_worker(), None);
        assert_eq!(registry.snapshot(), vec![Reserved, Reserved]);

        registry.apply(report(9001, WorkerStatus::Occupied));
        registry.apply(report(9002, WorkerStatus::Free));
        assert_eq!(registry.snapshot(), vec![Occupied, Free]);
    }

    #[test]
    fn unknown_port_is_ignored() {
        let registry = registry(1, SelectionPolicy::Cached);
        assert_eq!(registry.apply(report(1234, WorkerStatus::Occupied)), None);
        assert_eq!(registry.snapshot(), vec![Free]);
    }
}
