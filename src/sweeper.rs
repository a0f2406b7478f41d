use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task that prunes slot entries left empty by deletes and
/// slot-moving updates. Slots whose lock is held are skipped and picked up
/// on a later pass.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let pruned = engine.store.prune_empty();
        if pruned > 0 {
            debug!("swept {pruned} empty slots");
        }
        metrics::gauge!(crate::observability::SLOTS_ACTIVE).set(engine.store.slot_count() as f64);
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::directory::StaticDirectory;
    use crate::engine::CapacityConfig;
    use crate::model::{BookingDraft, BookingStatus};
    use crate::notify::NotifyHub;
    use chrono::{NaiveDate, NaiveTime};
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("headcount_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn draft(hour: u32) -> BookingDraft {
        BookingDraft {
            participant: "p-01".into(),
            staff: "s-01".into(),
            date: NaiveDate::from_ymd_opt(2024, 12, 15).unwrap(),
            start: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
            resource: "Room 1".into(),
            activity: "Solo".into(),
            status: None,
            payment_status: None,
            price: 80.0,
            notes: None,
        }
    }

    #[tokio::test]
    async fn deleted_bookings_leave_slots_for_the_sweeper() {
        let engine = Engine::new(
            test_wal_path("sweep_delete.wal"),
            Arc::new(NotifyHub::new()),
            CapacityConfig::default(),
            Arc::new(StaticDirectory::default()),
            Arc::new(SystemClock),
        )
        .unwrap();

        let a = engine.create_booking(draft(9)).await.unwrap();
        let b = engine.create_booking(draft(10)).await.unwrap();
        assert_eq!(engine.store.slot_count(), 2);

        engine.delete_booking(a.id).await.unwrap();
        // Cancellation empties nothing — the booking record stays.
        engine
            .set_status(b.id, BookingStatus::Cancelled)
            .await
            .unwrap();

        assert_eq!(engine.store.prune_empty(), 1);
        assert_eq!(engine.store.slot_count(), 1);
    }
}
