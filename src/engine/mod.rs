mod capacity;
mod error;
mod lifecycle;
mod queries;
mod reports;
mod store;

pub use capacity::CapacityConfig;
pub use error::EngineError;
pub use store::{SharedSlotState, SlotStore};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard};
use ulid::Ulid;

use crate::clock::Clock;
use crate::directory::Directory;
use crate::limits::MAX_SLOT_CAPACITY;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

/// Upper bound on re-fetch attempts when a booking moves slots between an
/// index lookup and the lock acquisition. Admission never loops unbounded.
const MAX_RESOLVE_ATTEMPTS: usize = 8;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking engine: slot store + capacity config + durability + notify.
pub struct Engine {
    pub(crate) store: SlotStore,
    capacity: CapacityConfig,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) directory: Arc<dyn Directory>,
    pub(super) clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        capacity: CapacityConfig,
        directory: Arc<dyn Directory>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        if capacity.max_capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "max capacity must be positive",
            ));
        }
        if capacity.max_capacity > MAX_SLOT_CAPACITY {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "max capacity too large",
            ));
        }

        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: SlotStore::new(),
            capacity,
            wal_tx,
            notify,
            directory,
            clock,
        };

        // Replay events — we're the sole owner of every slot Arc here, so
        // try_write always succeeds instantly. Never use blocking_write: new()
        // may run inside an async context.
        for event in &events {
            engine.replay_apply(event);
        }

        Ok(engine)
    }

    pub fn capacity(&self) -> &CapacityConfig {
        &self.capacity
    }

    /// Number of bookings currently stored.
    pub fn booking_count(&self) -> usize {
        self.store.booking_count()
    }

    /// Apply one replayed event to the store, bypassing WAL and notify.
    fn replay_apply(&self, event: &Event) {
        match event {
            Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
                // An update may move the booking to a different slot key.
                if let Some(old_key) = self.store.slot_of(&booking.id)
                    && let Some(old_arc) = self.store.get_slot(&old_key)
                {
                    let mut old_guard = old_arc.try_write().expect("replay: uncontended write");
                    old_guard.remove(booking.id);
                }
                let key = booking.slot_key(self.capacity.scope);
                let arc = self.replay_slot(&key);
                let mut guard = arc.try_write().expect("replay: uncontended write");
                guard.insert(booking.clone());
                self.store.map_booking(booking.id, key);
            }
            Event::StatusChanged { id, status } => {
                if let Some(key) = self.store.slot_of(id)
                    && let Some(arc) = self.store.get_slot(&key)
                {
                    let mut guard = arc.try_write().expect("replay: uncontended write");
                    if let Some(b) = guard.find_mut(id) {
                        b.status = *status;
                    }
                }
            }
            Event::BookingDeleted { id } => {
                if let Some(key) = self.store.slot_of(id)
                    && let Some(arc) = self.store.get_slot(&key)
                {
                    let mut guard = arc.try_write().expect("replay: uncontended write");
                    guard.remove(*id);
                }
                self.store.unmap_booking(id);
            }
        }
    }

    /// Synchronous slot fetch-or-create for replay.
    fn replay_slot(&self, key: &SlotKey) -> SharedSlotState {
        if let Some(arc) = self.store.get_slot(key) {
            return arc;
        }
        self.store.insert_slot_for_replay(key.clone())
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// WAL-append + apply + notify in one call, for events confined to one
    /// slot. The caller holds the slot's write lock across the whole thing,
    /// which is what makes the admission check-then-act race-free.
    pub(super) async fn persist_and_apply(
        &self,
        guard: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_slot(guard, event);
        self.notify.send(guard.key.date, event);
        Ok(())
    }

    pub(super) fn apply_to_slot(&self, rs: &mut SlotState, event: &Event) {
        match event {
            Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
                rs.remove(booking.id);
                rs.insert(booking.clone());
                self.store.map_booking(booking.id, rs.key.clone());
            }
            Event::StatusChanged { id, status } => {
                if let Some(b) = rs.find_mut(id) {
                    b.status = *status;
                }
            }
            Event::BookingDeleted { id } => {
                rs.remove(*id);
                self.store.unmap_booking(id);
            }
        }
    }

    /// Lookup booking → slot, acquire the slot's write lock, and confirm the
    /// booking is still there. Bounded retry: a concurrent update can move
    /// the booking between the index read and the lock grant.
    pub(super) async fn resolve_booking_write(
        &self,
        id: &Ulid,
    ) -> Result<(SlotKey, OwnedRwLockWriteGuard<SlotState>), EngineError> {
        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let key = self.store.slot_of(id).ok_or(EngineError::NotFound(*id))?;
            let Some(arc) = self.store.get_slot(&key) else {
                continue;
            };
            let guard = arc.write_owned().await;
            if guard.retired || guard.find(id).is_none() {
                continue;
            }
            return Ok((key, guard));
        }
        Err(EngineError::NotFound(*id))
    }

    /// Compact the WAL down to one create event per live booking.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        for arc in self.store.snapshot() {
            let guard = arc.read().await;
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
