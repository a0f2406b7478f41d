use ulid::Ulid;

use crate::limits::{MAX_PAGE_LIMIT, MAX_SEARCH_LEN};
use crate::model::*;

use super::{Engine, EngineError, MAX_RESOLVE_ATTEMPTS};

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let key = self.store.slot_of(&id).ok_or(EngineError::NotFound(id))?;
            let Some(arc) = self.store.get_slot(&key) else {
                continue;
            };
            let guard = arc.read().await;
            if let Some(b) = guard.find(&id) {
                return Ok(b.clone());
            }
        }
        Err(EngineError::NotFound(id))
    }

    /// Clone every booking out of the store, in creation (id) order. The
    /// per-request rescan is deliberate: nothing derived is ever cached, so
    /// nothing can silently diverge from the store.
    pub(super) async fn snapshot_bookings(&self) -> Vec<Booking> {
        let mut bookings = Vec::new();
        for arc in self.store.snapshot() {
            let guard = arc.read().await;
            bookings.extend(guard.bookings.iter().cloned());
        }
        bookings.sort_by_key(|b| b.id);
        bookings
    }

    /// Filtered, ordered, offset-paged listing.
    ///
    /// `date` beats `start_date`/`end_date` when both are present. Ordering
    /// is `date` descending then `start` ascending, matching the calendar
    /// view this feeds. Search is case-insensitive over participant/staff
    /// display names (directory-resolved, falling back to the raw
    /// reference), activity, resource, and notes.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Result<Page<Booking>, EngineError> {
        if filter.page == 0 {
            return Err(EngineError::Validation {
                field: "page",
                reason: "must be positive",
            });
        }
        if filter.limit == 0 {
            return Err(EngineError::Validation {
                field: "limit",
                reason: "must be positive",
            });
        }
        if filter.limit > MAX_PAGE_LIMIT {
            return Err(EngineError::LimitExceeded("page limit too large"));
        }
        if let Some(ref s) = filter.search
            && s.len() > MAX_SEARCH_LEN
        {
            return Err(EngineError::LimitExceeded("search string too long"));
        }

        let mut items = self.snapshot_bookings().await;

        if let Some(status) = filter.status {
            items.retain(|b| b.status == status);
        }
        if let Some(ref p) = filter.participant {
            items.retain(|b| b.participant == *p);
        }
        if let Some(ref s) = filter.staff {
            items.retain(|b| b.staff == *s);
        }
        if let Some(date) = filter.date {
            items.retain(|b| b.date == date);
        } else {
            if let Some(from) = filter.start_date {
                items.retain(|b| b.date >= from);
            }
            if let Some(to) = filter.end_date {
                items.retain(|b| b.date <= to);
            }
        }

        if let Some(ref search) = filter.search {
            let needle = search.to_lowercase();
            let mut refs: Vec<String> = items
                .iter()
                .flat_map(|b| [b.participant.clone(), b.staff.clone()])
                .collect();
            refs.sort();
            refs.dedup();
            let names = self.directory.display_names(&refs).await;
            items.retain(|b| {
                let participant = names
                    .get(&b.participant)
                    .map(String::as_str)
                    .unwrap_or(b.participant.as_str());
                let staff = names
                    .get(&b.staff)
                    .map(String::as_str)
                    .unwrap_or(b.staff.as_str());
                participant.to_lowercase().contains(&needle)
                    || staff.to_lowercase().contains(&needle)
                    || b.activity.to_lowercase().contains(&needle)
                    || b.resource.to_lowercase().contains(&needle)
                    || b.notes
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&needle))
            });
        }

        // Stable sort: full ties stay in creation order.
        items.sort_by(|a, b| b.date.cmp(&a.date).then(a.start.cmp(&b.start)));

        let total = items.len() as u64;
        let limit = filter.limit;
        let total_pages = total.div_ceil(limit as u64);
        let skip = (filter.page as usize - 1) * limit as usize;
        let items: Vec<Booking> = items.into_iter().skip(skip).take(limit as usize).collect();

        Ok(Page {
            items,
            page: filter.page,
            limit,
            total,
            total_pages,
        })
    }
}
