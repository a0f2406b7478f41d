use ulid::Ulid;

/// Every expected failure of an engine operation. All four business
/// outcomes of the booking contract are here (`NotFound`, `Validation`,
/// `CapacityExceeded`, `InvalidStatus`); the rest are operational.
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    Validation {
        field: &'static str,
        reason: &'static str,
    },
    /// The slot already holds `max` live bookings.
    CapacityExceeded(u32),
    /// A status string outside the five enumerated values.
    InvalidStatus(String),
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            EngineError::CapacityExceeded(max) => {
                write!(f, "capacity {max} exceeded: slot is full")
            }
            EngineError::InvalidStatus(s) => write!(f, "invalid status: {s}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
