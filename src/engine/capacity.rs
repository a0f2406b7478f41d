use chrono::{Datelike, NaiveDate, NaiveTime};

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Admission configuration: the headcount cap and how it is scoped.
#[derive(Debug, Clone, Copy)]
pub struct CapacityConfig {
    /// Max concurrent live bookings per slot key.
    pub max_capacity: u32,
    pub scope: CapacityScope,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_capacity: 8,
            scope: CapacityScope::Global,
        }
    }
}

/// Reject the candidate when the slot already holds `max_capacity` live
/// bookings. Callers hold the slot's write lock, so check and insert are
/// one critical section.
pub(super) fn admit(slot: &SlotState, config: &CapacityConfig) -> Result<(), EngineError> {
    if slot.live_count() >= config.max_capacity {
        return Err(EngineError::CapacityExceeded(config.max_capacity));
    }
    Ok(())
}

pub(super) fn validate_draft(draft: &BookingDraft) -> Result<(), EngineError> {
    validate_fields(
        &draft.participant,
        &draft.staff,
        draft.date,
        draft.start,
        draft.end,
        &draft.resource,
        &draft.activity,
        draft.price,
        draft.notes.as_deref(),
    )
}

pub(super) fn validate_booking(booking: &Booking) -> Result<(), EngineError> {
    validate_fields(
        &booking.participant,
        &booking.staff,
        booking.date,
        booking.start,
        booking.end,
        &booking.resource,
        &booking.activity,
        booking.price,
        booking.notes.as_deref(),
    )
}

#[allow(clippy::too_many_arguments)]
fn validate_fields(
    participant: &str,
    staff: &str,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    resource: &str,
    activity: &str,
    price: f64,
    notes: Option<&str>,
) -> Result<(), EngineError> {
    if participant.is_empty() {
        return Err(EngineError::Validation {
            field: "participant",
            reason: "must not be empty",
        });
    }
    if staff.is_empty() {
        return Err(EngineError::Validation {
            field: "staff",
            reason: "must not be empty",
        });
    }
    if start >= end {
        return Err(EngineError::Validation {
            field: "end",
            reason: "must be after start",
        });
    }
    if !price.is_finite() || price < 0.0 {
        return Err(EngineError::Validation {
            field: "price",
            reason: "must be a non-negative amount",
        });
    }
    if date.year() < MIN_VALID_YEAR || date.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if price > MAX_PRICE {
        return Err(EngineError::LimitExceeded("price too large"));
    }
    if participant.len() > MAX_REF_LEN {
        return Err(EngineError::LimitExceeded("participant reference too long"));
    }
    if staff.len() > MAX_REF_LEN {
        return Err(EngineError::LimitExceeded("staff reference too long"));
    }
    if resource.len() > MAX_LABEL_LEN {
        return Err(EngineError::LimitExceeded("resource label too long"));
    }
    if activity.len() > MAX_LABEL_LEN {
        return Err(EngineError::LimitExceeded("activity label too long"));
    }
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

impl Engine {
    /// Per-slot occupancy for one date: non-cancelled bookings grouped by
    /// slot key, ordered by start time, each group banded by fill ratio.
    /// Always rebuilt from the store — nothing here is cached.
    pub async fn occupancy_for_date(&self, date: NaiveDate) -> OccupancyReport {
        let max = self.capacity().max_capacity;
        let mut slots = Vec::new();

        for arc in self.store.snapshot() {
            let guard = arc.read().await;
            if guard.key.date != date {
                continue;
            }
            let bookings: Vec<Booking> = guard.live_bookings().cloned().collect();
            if bookings.is_empty() {
                continue;
            }
            let booked = bookings.len() as u32;
            slots.push(SlotOccupancy {
                start: guard.key.start,
                end: guard.key.end,
                resource: guard.key.resource.clone(),
                booked,
                max_capacity: max,
                band: OccupancyBand::classify(booked, max),
                bookings,
            });
        }

        slots.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(a.end.cmp(&b.end))
                .then(a.resource.cmp(&b.resource))
        });

        OccupancyReport {
            date,
            total_bookings: slots.iter().map(|s| s.booked).sum(),
            slots,
        }
    }
}
