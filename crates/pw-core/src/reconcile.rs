//! Realtime merge reconciliation.
//!
//! Keeps an ordered local collection in step with a backend table under a
//! fetch-then-subscribe protocol:
//!
//! - the initial fetch sets the base order;
//! - an upsert for a known id merges into that entry where it sits;
//! - an upsert for an unknown id appends at the tail;
//! - a delete removes the entry and leaves a tombstone so a late, older
//!   upsert cannot bring it back.
//!
//! Events that arrive before the fetch completes are buffered and replayed
//! on top of it. Version stamps make replay and duplicate delivery
//! harmless.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::change::{Change, Patch, RawChange};
use crate::constants::{PENDING_EVENT_LIMIT, TOMBSTONE_LIMIT};
use crate::record::Record;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SyncStatus {
    /// Waiting for the initial fetch; events are buffered.
    #[default]
    Loading,
    Live,
    /// The subscription failed. The collection is frozen at its last good
    /// state until the next `initialize`.
    Failed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Buffered,
    Merged,
    Appended,
    Removed,
    /// Older than what we hold.
    Stale,
    /// Re-delivery of what we already hold.
    Duplicate,
    /// Invalid payload, or a partial row for an id we do not hold.
    Rejected,
    /// Collection frozen, or delete for an unknown id.
    Ignored,
}

impl ApplyOutcome {
    pub fn changed(self) -> bool {
        matches!(
            self,
            ApplyOutcome::Merged | ApplyOutcome::Appended | ApplyOutcome::Removed
        )
    }
}

pub struct Reconciler<T: Record> {
    items: Vec<T>,
    index: HashMap<T::Id, usize>,
    pending: VecDeque<Change<T>>,
    pending_limit: usize,
    /// Commit time of recent deletes. Untimed deletes leave none.
    tombstones: HashMap<T::Id, DateTime<Utc>>,
    status: SyncStatus,
}

impl<T: Record> Default for Reconciler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Reconciler<T> {
    pub fn new() -> Self {
        Self::with_pending_limit(PENDING_EVENT_LIMIT)
    }

    pub fn with_pending_limit(pending_limit: usize) -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            pending: VecDeque::new(),
            pending_limit: pending_limit.max(1),
            tombstones: HashMap::new(),
            status: SyncStatus::Loading,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.clone()
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Install the fetched rows as the base collection, then replay any
    /// buffered events. Duplicate ids in the snapshot keep their first
    /// position and value.
    pub fn initialize(&mut self, snapshot: Vec<T>) {
        self.items.clear();
        self.index.clear();
        self.tombstones.clear();

        for record in snapshot {
            let id = record.id();
            if self.index.contains_key(&id) {
                warn!(table = T::TABLE, %id, "duplicate id in snapshot, keeping first");
                continue;
            }
            self.index.insert(id, self.items.len());
            self.items.push(record);
        }
        self.status = SyncStatus::Live;

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!(table = T::TABLE, count = pending.len(), "replaying buffered events");
        }
        for change in pending {
            self.apply(change);
        }
    }

    /// Mark the event stream as failed. Rows stay as they are.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(table = T::TABLE, %reason, "subscription failed, freezing collection");
        self.pending.clear();
        self.status = SyncStatus::Failed(reason);
    }

    /// Validate and apply a wire event. Invalid payloads are logged and
    /// dropped.
    pub fn apply_raw(&mut self, raw: &RawChange) -> ApplyOutcome {
        match Change::<T>::from_raw(raw) {
            Ok(change) => self.apply(change),
            Err(e) => {
                warn!(table = T::TABLE, kind = %raw.kind, "rejecting change: {e}");
                ApplyOutcome::Rejected
            }
        }
    }

    pub fn apply(&mut self, change: Change<T>) -> ApplyOutcome {
        match self.status {
            SyncStatus::Loading => {
                if self.pending.len() >= self.pending_limit {
                    warn!(
                        table = T::TABLE,
                        limit = self.pending_limit,
                        "pending event buffer full, dropping oldest"
                    );
                    self.pending.pop_front();
                }
                self.pending.push_back(change);
                ApplyOutcome::Buffered
            }
            SyncStatus::Failed(_) => {
                debug!(table = T::TABLE, id = %change.id(), "collection frozen, ignoring event");
                ApplyOutcome::Ignored
            }
            SyncStatus::Live => match change {
                Change::Upsert(patch) => self.upsert(patch),
                Change::Delete { id, at } => self.delete(id, at),
            },
        }
    }

    fn upsert(&mut self, patch: Patch<T>) -> ApplyOutcome {
        let id = patch.id().clone();

        if let Some(&pos) = self.index.get(&id) {
            let current = &self.items[pos];
            let merged = match patch.apply_to(current) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!(table = T::TABLE, %id, "rejecting merge: {e}");
                    return ApplyOutcome::Rejected;
                }
            };
            if is_older(merged.version(), current.version()) {
                debug!(table = T::TABLE, %id, "dropping stale update");
                return ApplyOutcome::Stale;
            }
            if &merged == current {
                return ApplyOutcome::Duplicate;
            }
            self.items[pos] = merged;
            return ApplyOutcome::Merged;
        }

        let record = match patch.to_record() {
            Ok(record) => record,
            Err(e) => {
                warn!(table = T::TABLE, %id, "rejecting partial row for unknown id: {e}");
                return ApplyOutcome::Rejected;
            }
        };

        if let Some(&deleted_at) = self.tombstones.get(&id) {
            if record.version().is_some_and(|v| v <= deleted_at) {
                debug!(table = T::TABLE, %id, "dropping upsert for deleted row");
                return ApplyOutcome::Stale;
            }
            self.tombstones.remove(&id);
        }

        self.index.insert(id, self.items.len());
        self.items.push(record);
        ApplyOutcome::Appended
    }

    fn delete(&mut self, id: T::Id, at: Option<DateTime<Utc>>) -> ApplyOutcome {
        let Some(pos) = self.index.remove(&id) else {
            debug!(table = T::TABLE, %id, "delete for unknown id");
            self.bury(id, at);
            return ApplyOutcome::Ignored;
        };
        self.items.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        self.bury(id, at);
        ApplyOutcome::Removed
    }

    fn bury(&mut self, id: T::Id, at: Option<DateTime<Utc>>) {
        let Some(at) = at else {
            self.tombstones.remove(&id);
            return;
        };
        let stamp = self.tombstones.entry(id).or_insert(at);
        *stamp = (*stamp).max(at);

        if self.tombstones.len() > TOMBSTONE_LIMIT {
            let oldest = self
                .tombstones
                .iter()
                .min_by_key(|&(_, at)| *at)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                self.tombstones.remove(&oldest);
            }
        }
    }

    pub fn tombstone_len(&self) -> usize {
        self.tombstones.len()
    }
}

fn is_older(candidate: Option<DateTime<Utc>>, current: Option<DateTime<Utc>>) -> bool {
    matches!((candidate, current), (Some(c), Some(cur)) if c < cur)
}
