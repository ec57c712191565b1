//! Aggregated translation counters.
//!
//! Recomputed from the status table alone after every rebuild. The registry
//! only holds the latest snapshot; exporting it is an external concern.

use crate::status::{ObjectStatus, StatusKind};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub orphaned: usize,
}

// === impl Counts ===

impl Counts {
    fn record(&mut self, kind: StatusKind) {
        self.total += 1;
        match kind {
            StatusKind::Valid => self.valid += 1,
            StatusKind::Invalid => self.invalid += 1,
            StatusKind::Orphaned => self.orphaned += 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub namespaces: BTreeMap<String, Counts>,
    pub vhosts: BTreeMap<String, Counts>,
}

#[derive(Debug, Default)]
pub struct Registry(RwLock<Snapshot>);

// === impl Registry ===

impl Registry {
    /// Replaces the counters with ones derived from `statuses`.
    pub fn update(&self, statuses: &[ObjectStatus]) {
        let mut snapshot = Snapshot::default();
        for status in statuses {
            snapshot
                .namespaces
                .entry(status.meta.namespace.clone())
                .or_default()
                .record(status.kind);
            if let Some(vhost) = status.vhost.as_ref() {
                snapshot
                    .vhosts
                    .entry(vhost.clone())
                    .or_default()
                    .record(status.kind);
            }
        }
        *self.0.write() = snapshot;
    }

    pub fn snapshot(&self) -> Snapshot {
        self.0.read().clone()
    }
}
