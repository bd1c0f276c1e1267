//! Shared result bookkeeping for one scrape run.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use parking_lot::Mutex;
use rosterex_model::{MemberRecord, UserId};

/// The id -> member mapping shared by every session of one scrape run.
///
/// First-writer-wins: a record is created the first time any session observes
/// the id and never overwritten, so duplicate chunk deliveries are harmless.
/// The only cross-session mutable state in a run; all access goes through the
/// mutex, and reads hand out copies rather than internal references.
#[derive(Debug, Default)]
pub struct ResultStore {
    members: Mutex<HashMap<UserId, MemberRecord>>,
    abandoned: Mutex<Vec<String>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the record if the id is absent. Returns true when it was newly
    /// added; a later sighting of the same id is discarded, not merged.
    pub fn upsert(&self, record: MemberRecord) -> bool {
        let mut members = self.members.lock();
        match members.entry(record.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    pub fn get(&self, id: &UserId) -> Option<MemberRecord> {
        self.members.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Thread-safe copy of the current contents, for progress reporting and
    /// the final outcome.
    pub fn snapshot(&self) -> Vec<MemberRecord> {
        self.members.lock().values().cloned().collect()
    }

    /// Record a prefix that exhausted its retry budget. Surfaced in the final
    /// outcome so callers can assess completeness.
    pub fn record_abandoned(&self, prefix: String) {
        self.abandoned.lock().push(prefix);
    }

    pub fn abandoned_prefixes(&self) -> Vec<String> {
        self.abandoned.lock().clone()
    }
}
