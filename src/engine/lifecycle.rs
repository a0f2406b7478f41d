use ulid::Ulid;

use crate::model::*;

use super::capacity::{admit, validate_booking, validate_draft};
use super::{Engine, EngineError, MAX_RESOLVE_ATTEMPTS};

impl Engine {
    /// Validate, admit against the slot's headcount cap, persist.
    /// The slot write lock is held from the admission check through the WAL
    /// append and state insert — no interleaving admission can overfill.
    pub async fn create_booking(&self, draft: BookingDraft) -> Result<Booking, EngineError> {
        validate_draft(&draft)?;

        let booking = Booking {
            id: Ulid::new(),
            participant: draft.participant,
            staff: draft.staff,
            date: draft.date,
            start: draft.start,
            end: draft.end,
            resource: draft.resource,
            activity: draft.activity,
            status: draft.status.unwrap_or_default(),
            payment_status: draft.payment_status.unwrap_or_default(),
            price: draft.price,
            notes: draft.notes,
            created_at: self.clock.now(),
        };

        let key = booking.slot_key(self.capacity().scope);
        let (_arc, mut guard) = self.store.acquire_slot(&key).await;
        if booking.status.counts_for_occupancy() {
            admit(&guard, self.capacity())?;
        }

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(booking)
    }

    /// Merge the patch, re-validate, and persist. Capacity is re-evaluated
    /// only when the slot key changed (date, time, or — under per-resource
    /// scope — the resource label); a pure status/payment/notes edit never
    /// re-runs admission.
    pub async fn update_booking(
        &self,
        id: Ulid,
        patch: BookingPatch,
    ) -> Result<Booking, EngineError> {
        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let old_key = self.store.slot_of(&id).ok_or(EngineError::NotFound(id))?;
            let Some(old_arc) = self.store.get_slot(&old_key) else {
                continue;
            };
            let mut old_guard = old_arc.clone().write_owned().await;
            if old_guard.retired {
                continue;
            }
            let Some(current) = old_guard.find(&id) else {
                continue; // moved while we waited on the lock
            };

            let mut updated = current.clone();
            patch.apply_to(&mut updated);
            validate_booking(&updated)?;

            let new_key = updated.slot_key(self.capacity().scope);
            if new_key == old_key {
                let event = Event::BookingUpdated {
                    booking: updated.clone(),
                };
                self.persist_and_apply(&mut old_guard, &event).await?;
                return Ok(updated);
            }

            // Slot move: release and re-lock both slots in key order, then
            // re-check everything that may have changed while unlocked.
            drop(old_guard);
            let (first, second) = if new_key < old_key {
                (new_key.clone(), old_key.clone())
            } else {
                (old_key.clone(), new_key.clone())
            };
            let (_a1, mut g1) = self.store.acquire_slot(&first).await;
            let (_a2, mut g2) = self.store.acquire_slot(&second).await;
            let (old_guard, new_guard) = if first == old_key {
                (&mut g1, &mut g2)
            } else {
                (&mut g2, &mut g1)
            };

            let Some(current) = old_guard.find(&id) else {
                continue;
            };
            let mut updated = current.clone();
            patch.apply_to(&mut updated);
            validate_booking(&updated)?;
            if updated.slot_key(self.capacity().scope) != new_key {
                continue; // concurrent edit changed the target slot — retry
            }

            if updated.status.counts_for_occupancy() {
                admit(new_guard, self.capacity())?;
            }

            let event = Event::BookingUpdated {
                booking: updated.clone(),
            };
            self.wal_append(&event).await?;
            old_guard.remove(id);
            new_guard.insert(updated.clone());
            self.store.map_booking(id, new_key.clone());
            self.notify.send(old_key.date, &event);
            if new_key.date != old_key.date {
                self.notify.send(new_key.date, &event);
            }
            return Ok(updated);
        }
        Err(EngineError::NotFound(id))
    }

    /// Direct status set. Any of the five values may follow any other; the
    /// enumeration itself is the only guard. A transition into CANCELLED
    /// frees the booking's seat the instant the write lands — occupancy is
    /// always computed from the live field.
    pub async fn set_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let (_key, mut guard) = self.resolve_booking_write(&id).await?;
        let event = Event::StatusChanged { id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.find(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Hard delete. The emptied slot entry is left for the sweeper.
    pub async fn delete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (_key, mut guard) = self.resolve_booking_write(&id).await?;
        let event = Event::BookingDeleted { id };
        self.persist_and_apply(&mut guard, &event).await
    }
}
