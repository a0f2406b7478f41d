use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::{SlotKey, SlotState};

pub type SharedSlotState = Arc<RwLock<SlotState>>;

/// The booking record store: slot states keyed by slot key, plus a reverse
/// index from booking id to the slot currently holding it.
///
/// A successful write is visible to every subsequent read (the maps are the
/// single source of truth). Invariant enforcement happens above this layer.
pub struct SlotStore {
    slots: DashMap<SlotKey, SharedSlotState>,
    index: DashMap<Ulid, SlotKey>,
}

impl Default for SlotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            index: DashMap::new(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn booking_count(&self) -> usize {
        self.index.len()
    }

    pub fn get_slot(&self, key: &SlotKey) -> Option<SharedSlotState> {
        self.slots.get(key).map(|e| e.value().clone())
    }

    /// Write-lock a slot, creating it if absent. Loops when the guarded
    /// state turns out to be retired: the sweeper unlinked it between our
    /// map lookup and lock acquisition, so the entry must be re-fetched.
    pub async fn acquire_slot(
        &self,
        key: &SlotKey,
    ) -> (SharedSlotState, OwnedRwLockWriteGuard<SlotState>) {
        loop {
            let arc = self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(RwLock::new(SlotState::new(key.clone()))))
                .clone();
            let guard = arc.clone().write_owned().await;
            if !guard.retired {
                return (arc, guard);
            }
        }
    }

    /// Fetch-or-create without locking. Replay-only: the caller is the sole
    /// owner of the store at that point.
    pub(super) fn insert_slot_for_replay(&self, key: SlotKey) -> SharedSlotState {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(SlotState::new(key))))
            .clone()
    }

    // ── Booking index ────────────────────────────────────────

    pub fn slot_of(&self, id: &Ulid) -> Option<SlotKey> {
        self.index.get(id).map(|e| e.value().clone())
    }

    pub fn map_booking(&self, id: Ulid, key: SlotKey) {
        self.index.insert(id, key);
    }

    pub fn unmap_booking(&self, id: &Ulid) {
        self.index.remove(id);
    }

    /// Snapshot of all slot handles, for scans. Callers read-lock each slot
    /// individually; the snapshot itself is not a consistent cut.
    pub fn snapshot(&self) -> Vec<SharedSlotState> {
        self.slots.iter().map(|e| e.value().clone()).collect()
    }

    /// Unlink slots that hold no bookings. Each candidate is retired under
    /// its write lock before removal so a concurrent `acquire_slot` can
    /// detect the unlink and re-fetch. Slots we cannot lock right now are
    /// simply left for the next pass.
    pub fn prune_empty(&self) -> usize {
        let keys: Vec<SlotKey> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut pruned = 0;
        for key in keys {
            let Some(arc) = self.get_slot(&key) else {
                continue;
            };
            if let Ok(mut guard) = arc.try_write() {
                if guard.bookings.is_empty() && !guard.retired {
                    guard.retired = true;
                    self.slots.remove(&key);
                    pruned += 1;
                }
            }
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn key(hour: u32) -> SlotKey {
        SlotKey {
            date: NaiveDate::from_ymd_opt(2024, 12, 15).unwrap(),
            start: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
            resource: None,
        }
    }

    #[tokio::test]
    async fn acquire_creates_on_demand() {
        let store = SlotStore::new();
        assert_eq!(store.slot_count(), 0);
        let (_arc, guard) = store.acquire_slot(&key(9)).await;
        assert_eq!(guard.key, key(9));
        assert_eq!(store.slot_count(), 1);
    }

    #[tokio::test]
    async fn acquire_returns_existing_state() {
        let store = SlotStore::new();
        let (arc1, guard) = store.acquire_slot(&key(9)).await;
        drop(guard);
        let (arc2, _guard) = store.acquire_slot(&key(9)).await;
        assert!(Arc::ptr_eq(&arc1, &arc2));
        assert_eq!(store.slot_count(), 1);
    }

    #[tokio::test]
    async fn prune_removes_only_empty_unlocked_slots() {
        let store = SlotStore::new();
        {
            let (_arc, _guard) = store.acquire_slot(&key(9)).await;
        }
        // Held lock: slot must survive the pass
        let (_arc, held) = store.acquire_slot(&key(10)).await;

        assert_eq!(store.slot_count(), 2);
        assert_eq!(store.prune_empty(), 1);
        assert_eq!(store.slot_count(), 1);
        drop(held);
        assert_eq!(store.prune_empty(), 1);
        assert_eq!(store.slot_count(), 0);
    }

    #[tokio::test]
    async fn acquire_after_prune_yields_fresh_slot() {
        let store = SlotStore::new();
        let (old_arc, guard) = store.acquire_slot(&key(9)).await;
        drop(guard);
        assert_eq!(store.prune_empty(), 1);

        let (new_arc, guard) = store.acquire_slot(&key(9)).await;
        assert!(!guard.retired);
        assert!(!Arc::ptr_eq(&old_arc, &new_arc));
    }
}
