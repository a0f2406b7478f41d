use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Wall-clock times travel as `HH:MM` — minute precision, no seconds.
pub mod time_format {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => super::serialize(t, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            raw.map(|s| {
                NaiveTime::parse_from_str(&s, super::FORMAT).map_err(serde::de::Error::custom)
            })
            .transpose()
        }
    }
}

/// Booking status. The five values below are the entire state space —
/// nothing else is representable once a request has been parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            BookingStatus::Scheduled => "SCHEDULED",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::NoShow => "NO_SHOW",
        }
    }

    /// Parse the wire spelling. `None` for anything outside the enumeration.
    pub fn from_label(raw: &str) -> Option<Self> {
        match raw {
            "SCHEDULED" => Some(BookingStatus::Scheduled),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "COMPLETED" => Some(BookingStatus::Completed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "NO_SHOW" => Some(BookingStatus::NoShow),
            _ => None,
        }
    }

    /// Cancelled bookings hold no seat.
    pub fn counts_for_occupancy(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

impl Default for BookingStatus {
    fn default() -> Self {
        BookingStatus::Scheduled
    }
}

/// Payment status, tracked orthogonally to `BookingStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Exempt,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Pending
    }
}

/// Whether one headcount cap is shared across all resources for a slot,
/// or evaluated separately per resource label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityScope {
    Global,
    PerResource,
}

impl CapacityScope {
    pub fn from_label(raw: &str) -> Option<Self> {
        match raw {
            "global" => Some(CapacityScope::Global),
            "per_resource" => Some(CapacityScope::PerResource),
            _ => None,
        }
    }
}

/// A single booked session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub participant: String,
    pub staff: String,
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub start: NaiveTime,
    #[serde(with = "time_format")]
    pub end: NaiveTime,
    pub resource: String,
    pub activity: String,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub price: f64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// The capacity bucket this booking occupies. Exact tuple equality —
    /// overlapping but non-identical time ranges are distinct slots.
    pub fn slot_key(&self, scope: CapacityScope) -> SlotKey {
        SlotKey {
            date: self.date,
            start: self.start,
            end: self.end,
            resource: match scope {
                CapacityScope::Global => None,
                CapacityScope::PerResource => Some(self.resource.clone()),
            },
        }
    }
}

/// Grouping/locking key for capacity admission. `resource` is populated
/// only under `CapacityScope::PerResource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub start: NaiveTime,
    #[serde(with = "time_format")]
    pub end: NaiveTime,
    pub resource: Option<String>,
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.date,
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )?;
        if let Some(ref r) = self.resource {
            write!(f, " @{r}")?;
        }
        Ok(())
    }
}

/// All bookings sharing one slot key, in creation order. The unit of
/// locking: admission holds this state's write lock across check and write.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub key: SlotKey,
    /// Set by the sweeper just before the entry is unlinked; an admitter
    /// that observes it must re-fetch the slot.
    pub retired: bool,
    pub bookings: Vec<Booking>,
}

impl SlotState {
    pub fn new(key: SlotKey) -> Self {
        Self {
            key,
            retired: false,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining creation (id) order.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.id, |b| b.id)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn find(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn find_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Seats currently taken: bookings whose status counts for occupancy.
    pub fn live_count(&self) -> u32 {
        self.bookings
            .iter()
            .filter(|b| b.status.counts_for_occupancy())
            .count() as u32
    }

    pub fn live_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings
            .iter()
            .filter(|b| b.status.counts_for_occupancy())
    }
}

/// The WAL record format — flat, no nesting. Create/update carry the full
/// post-image so replay is a plain replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated { booking: Booking },
    BookingUpdated { booking: Booking },
    StatusChanged { id: Ulid, status: BookingStatus },
    BookingDeleted { id: Ulid },
}

// ── Inbound field sets ───────────────────────────────────────────

/// Fields accepted when creating a booking. Status and payment status
/// default to `SCHEDULED` / `PENDING` when absent.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookingDraft {
    pub participant: String,
    pub staff: String,
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub start: NaiveTime,
    #[serde(with = "time_format")]
    pub end: NaiveTime,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub activity: String,
    #[serde(default)]
    pub status: Option<BookingStatus>,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
    pub price: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Partial update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BookingPatch {
    pub participant: Option<String>,
    pub staff: Option<String>,
    pub date: Option<NaiveDate>,
    #[serde(with = "time_format::option")]
    pub start: Option<NaiveTime>,
    #[serde(with = "time_format::option")]
    pub end: Option<NaiveTime>,
    pub resource: Option<String>,
    pub activity: Option<String>,
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub price: Option<f64>,
    pub notes: Option<String>,
}

impl BookingPatch {
    pub fn apply_to(&self, booking: &mut Booking) {
        if let Some(ref v) = self.participant {
            booking.participant = v.clone();
        }
        if let Some(ref v) = self.staff {
            booking.staff = v.clone();
        }
        if let Some(v) = self.date {
            booking.date = v;
        }
        if let Some(v) = self.start {
            booking.start = v;
        }
        if let Some(v) = self.end {
            booking.end = v;
        }
        if let Some(ref v) = self.resource {
            booking.resource = v.clone();
        }
        if let Some(ref v) = self.activity {
            booking.activity = v.clone();
        }
        if let Some(v) = self.status {
            booking.status = v;
        }
        if let Some(v) = self.payment_status {
            booking.payment_status = v;
        }
        if let Some(v) = self.price {
            booking.price = v;
        }
        if let Some(ref v) = self.notes {
            booking.notes = Some(v.clone());
        }
    }
}

/// Recognized list-query options. The contract is closed: unknown fields
/// are rejected at the wire boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BookingFilter {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
    pub status: Option<BookingStatus>,
    pub participant: Option<String>,
    pub staff: Option<String>,
    /// Exact-day match. Takes precedence over `start_date`/`end_date`.
    pub date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Default for BookingFilter {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            search: None,
            status: None,
            participant: None,
            staff: None,
            date: None,
            start_date: None,
            end_date: None,
        }
    }
}

// ── Query & report result types ──────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

/// Presentation label for a slot's fill ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccupancyBand {
    Available,
    Moderate,
    NearlyFull,
    Full,
}

impl OccupancyBand {
    /// <50% AVAILABLE, 50–74% MODERATE, 75–99% NEARLY_FULL, 100% FULL.
    pub fn classify(booked: u32, max: u32) -> Self {
        if booked >= max {
            OccupancyBand::Full
        } else if booked * 4 >= max * 3 {
            OccupancyBand::NearlyFull
        } else if booked * 2 >= max {
            OccupancyBand::Moderate
        } else {
            OccupancyBand::Available
        }
    }
}

/// One slot's occupancy on a given date. Derived, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct SlotOccupancy {
    #[serde(with = "time_format")]
    pub start: NaiveTime,
    #[serde(with = "time_format")]
    pub end: NaiveTime,
    pub resource: Option<String>,
    pub booked: u32,
    pub max_capacity: u32,
    pub band: OccupancyBand,
    pub bookings: Vec<Booking>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OccupancyReport {
    pub date: NaiveDate,
    /// Non-cancelled bookings on the date, across all slots.
    pub total_bookings: u32,
    pub slots: Vec<SlotOccupancy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodTotals {
    pub total: u64,
    pub completed: u64,
    /// Sum of price over COMPLETED and PAID bookings only.
    pub revenue: f64,
    /// `completed / total * 100`; 0 for an empty period.
    pub completion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantCount {
    pub participant: String,
    pub completed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaffTotals {
    pub staff: String,
    pub completed: u64,
    /// Sum of price over completed bookings, regardless of payment status.
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
    pub totals: PeriodTotals,
    pub top_participants: Vec<ParticipantCount>,
    pub staff: Vec<StaffTotals>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenuePoint {
    pub date: NaiveDate,
    pub revenue: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(y: i32, mo: u32, da: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, mo, da).unwrap()
    }

    fn sample_booking() -> Booking {
        Booking {
            id: Ulid::new(),
            participant: "p-01".into(),
            staff: "s-01".into(),
            date: d(2024, 12, 15),
            start: t(9, 0),
            end: t(10, 0),
            resource: "Room 1".into(),
            activity: "Solo".into(),
            status: BookingStatus::Scheduled,
            payment_status: PaymentStatus::Pending,
            price: 80.0,
            notes: None,
            created_at: Utc.with_ymd_and_hms(2024, 12, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn status_labels_round_trip() {
        for s in [
            BookingStatus::Scheduled,
            BookingStatus::Confirmed,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
            BookingStatus::NoShow,
        ] {
            assert_eq!(BookingStatus::from_label(s.as_label()), Some(s));
        }
        assert_eq!(BookingStatus::from_label("DONE"), None);
        assert_eq!(BookingStatus::from_label("scheduled"), None);
    }

    #[test]
    fn only_cancelled_releases_seat() {
        assert!(BookingStatus::Scheduled.counts_for_occupancy());
        assert!(BookingStatus::Confirmed.counts_for_occupancy());
        assert!(BookingStatus::Completed.counts_for_occupancy());
        assert!(BookingStatus::NoShow.counts_for_occupancy());
        assert!(!BookingStatus::Cancelled.counts_for_occupancy());
    }

    #[test]
    fn band_thresholds() {
        // max 8: 0-3 available, 4-5 moderate, 6-7 nearly full, 8 full
        assert_eq!(OccupancyBand::classify(0, 8), OccupancyBand::Available);
        assert_eq!(OccupancyBand::classify(3, 8), OccupancyBand::Available);
        assert_eq!(OccupancyBand::classify(4, 8), OccupancyBand::Moderate);
        assert_eq!(OccupancyBand::classify(5, 8), OccupancyBand::Moderate);
        assert_eq!(OccupancyBand::classify(6, 8), OccupancyBand::NearlyFull);
        assert_eq!(OccupancyBand::classify(7, 8), OccupancyBand::NearlyFull);
        assert_eq!(OccupancyBand::classify(8, 8), OccupancyBand::Full);
    }

    #[test]
    fn band_single_seat_slot() {
        assert_eq!(OccupancyBand::classify(0, 1), OccupancyBand::Available);
        assert_eq!(OccupancyBand::classify(1, 1), OccupancyBand::Full);
    }

    #[test]
    fn slot_key_ignores_resource_in_global_scope() {
        let mut a = sample_booking();
        let mut b = sample_booking();
        a.resource = "Room 1".into();
        b.resource = "Room 2".into();
        assert_eq!(
            a.slot_key(CapacityScope::Global),
            b.slot_key(CapacityScope::Global)
        );
        assert_ne!(
            a.slot_key(CapacityScope::PerResource),
            b.slot_key(CapacityScope::PerResource)
        );
    }

    #[test]
    fn slot_key_distinguishes_overlapping_ranges() {
        let a = sample_booking();
        let mut b = sample_booking();
        b.start = t(9, 30);
        b.end = t(10, 30);
        // 09:00-10:00 and 09:30-10:30 overlap but are different slots
        assert_ne!(
            a.slot_key(CapacityScope::Global),
            b.slot_key(CapacityScope::Global)
        );
    }

    #[test]
    fn slot_state_ordering_and_removal() {
        let key = sample_booking().slot_key(CapacityScope::Global);
        let mut slot = SlotState::new(key);
        let mut first = sample_booking();
        first.id = Ulid::from_parts(1, 1);
        let mut second = sample_booking();
        second.id = Ulid::from_parts(2, 2);
        // Insert out of creation order; iteration comes back ordered.
        slot.insert(second.clone());
        slot.insert(first.clone());
        assert_eq!(slot.bookings[0].id, first.id);
        assert_eq!(slot.bookings[1].id, second.id);

        assert!(slot.remove(first.id).is_some());
        assert!(slot.remove(first.id).is_none());
        assert_eq!(slot.bookings.len(), 1);
    }

    #[test]
    fn live_count_skips_cancelled() {
        let key = sample_booking().slot_key(CapacityScope::Global);
        let mut slot = SlotState::new(key);
        let mut cancelled = sample_booking();
        cancelled.status = BookingStatus::Cancelled;
        slot.insert(sample_booking());
        slot.insert(cancelled);
        slot.insert(sample_booking());
        assert_eq!(slot.bookings.len(), 3);
        assert_eq!(slot.live_count(), 2);
    }

    #[test]
    fn booking_wire_times_are_minute_precision() {
        let json = serde_json::to_string(&sample_booking()).unwrap();
        assert!(json.contains("\"start\":\"09:00\""), "{json}");
        assert!(json.contains("\"end\":\"10:00\""), "{json}");
        assert!(json.contains("\"date\":\"2024-12-15\""), "{json}");
        assert!(json.contains("\"status\":\"SCHEDULED\""), "{json}");
    }

    #[test]
    fn draft_rejects_second_resolution_times() {
        let raw = r#"{
            "participant": "p", "staff": "s", "date": "2024-12-15",
            "start": "09:00:30", "end": "10:00", "price": 80.0
        }"#;
        assert!(serde_json::from_str::<BookingDraft>(raw).is_err());
    }

    #[test]
    fn draft_defaults() {
        let raw = r#"{
            "participant": "p", "staff": "s", "date": "2024-12-15",
            "start": "09:00", "end": "10:00", "price": 80.0
        }"#;
        let draft: BookingDraft = serde_json::from_str(raw).unwrap();
        assert_eq!(draft.status, None);
        assert_eq!(draft.payment_status, None);
        assert!(draft.resource.is_empty());
        assert!(draft.notes.is_none());
    }

    #[test]
    fn filter_rejects_unknown_fields() {
        let raw = r#"{"page": 1, "studentId": "x"}"#;
        assert!(serde_json::from_str::<BookingFilter>(raw).is_err());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: sample_booking(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);

        let event = Event::StatusChanged {
            id: Ulid::new(),
            status: BookingStatus::NoShow,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn slot_key_display() {
        let b = sample_booking();
        let global = b.slot_key(CapacityScope::Global);
        assert_eq!(global.to_string(), "2024-12-15 09:00-10:00");
        let scoped = b.slot_key(CapacityScope::PerResource);
        assert_eq!(scoped.to_string(), "2024-12-15 09:00-10:00 @Room 1");
    }
}
