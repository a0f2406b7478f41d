use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::limits::MAX_REPORT_RANGE_DAYS;
use crate::model::*;

use super::{Engine, EngineError};

fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), EngineError> {
    if end < start {
        return Err(EngineError::Validation {
            field: "end_date",
            reason: "must not be before start_date",
        });
    }
    if (end - start).num_days() > MAX_REPORT_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("report range too wide"));
    }
    Ok(())
}

fn completed(b: &Booking) -> bool {
    b.status == BookingStatus::Completed
}

/// A booking earns revenue only once it is both completed and paid.
fn earns_revenue(b: &Booking) -> bool {
    completed(b) && b.payment_status == PaymentStatus::Paid
}

impl Engine {
    /// Period totals, top participants, and per-staff statistics over an
    /// inclusive date range. Recomputed from the store on every call.
    pub async fn monthly_report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<MonthlyReport, EngineError> {
        validate_range(start, end)?;

        let mut bookings = self.snapshot_bookings().await;
        bookings.retain(|b| b.date >= start && b.date <= end);

        let total = bookings.len() as u64;
        let completed_count = bookings.iter().filter(|b| completed(b)).count() as u64;
        let revenue: f64 = bookings
            .iter()
            .filter(|b| earns_revenue(b))
            .map(|b| b.price)
            .sum();
        let completion_rate = if total == 0 {
            0.0
        } else {
            completed_count as f64 / total as f64 * 100.0
        };

        // Both groupings walk bookings in creation order, so equal counts
        // keep first-seen order under the stable sort below.
        let mut participant_order: Vec<ParticipantCount> = Vec::new();
        let mut participant_idx: HashMap<String, usize> = HashMap::new();
        let mut staff_order: Vec<StaffTotals> = Vec::new();
        let mut staff_idx: HashMap<String, usize> = HashMap::new();

        for b in bookings.iter().filter(|b| completed(b)) {
            let i = *participant_idx
                .entry(b.participant.clone())
                .or_insert_with(|| {
                    participant_order.push(ParticipantCount {
                        participant: b.participant.clone(),
                        completed: 0,
                    });
                    participant_order.len() - 1
                });
            participant_order[i].completed += 1;

            let i = *staff_idx.entry(b.staff.clone()).or_insert_with(|| {
                staff_order.push(StaffTotals {
                    staff: b.staff.clone(),
                    completed: 0,
                    revenue: 0.0,
                });
                staff_order.len() - 1
            });
            staff_order[i].completed += 1;
            staff_order[i].revenue += b.price;
        }

        participant_order.sort_by(|a, b| b.completed.cmp(&a.completed));
        participant_order.truncate(5);

        Ok(MonthlyReport {
            totals: PeriodTotals {
                total,
                completed: completed_count,
                revenue,
                completion_rate,
            },
            top_participants: participant_order,
            staff: staff_order,
        })
    }

    /// Revenue per day over an inclusive range: completed-and-paid bookings
    /// grouped by date, ascending. Days with no revenue are omitted.
    pub async fn revenue_by_day(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RevenuePoint>, EngineError> {
        validate_range(start, end)?;

        let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for arc in self.store.snapshot() {
            let guard = arc.read().await;
            if guard.key.date < start || guard.key.date > end {
                continue;
            }
            for b in guard.bookings.iter().filter(|b| earns_revenue(b)) {
                *by_day.entry(b.date).or_insert(0.0) += b.price;
            }
        }

        Ok(by_day
            .into_iter()
            .map(|(date, revenue)| RevenuePoint { date, revenue })
            .collect())
    }
}
