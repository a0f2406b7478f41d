//! headcount — a booking-occupancy engine for instructor-led sessions.
//!
//! The engine admits bookings against a per-slot headcount cap, tracks each
//! booking through its status lifecycle, answers filtered/paginated queries,
//! and folds bookings into occupancy and revenue reports. State lives in
//! memory and is made durable by an append-only WAL replayed at startup.

pub mod clock;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sweeper;
pub mod wal;
pub mod wire;
