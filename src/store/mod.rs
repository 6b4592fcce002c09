//! Storage contract and the WAL-backed in-memory implementation.
//!
//! Writes are staged on an explicit [`Transaction`] value obtained from
//! [`Repository::begin`] and applied atomically by [`Repository::commit`].
//! Dropping a transaction without committing discards it.

mod compactor;
mod memory;
mod wal;

pub use compactor::{compact_if_needed, run_compactor};
pub use memory::{InstructorState, WalStore};
pub use wal::{Wal, WalRecord};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("WAL error: {0}")]
    Wal(String),

    #[error("store is shut down")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One change to stored state. Also the WAL payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    SlotsCleared {
        instructor_id: Ulid,
        dates: Vec<NaiveDate>,
    },
    SlotCreated {
        slot: AvailabilitySlot,
    },
    SlotUpdated {
        slot: AvailabilitySlot,
    },
    SlotDeleted {
        id: Ulid,
        instructor_id: Ulid,
    },
    BlackoutAdded {
        blackout: BlackoutDate,
    },
    BlackoutRemoved {
        id: Ulid,
        instructor_id: Ulid,
    },
    BookingRecorded {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        instructor_id: Ulid,
        status: BookingStatus,
    },
}

impl StoreEvent {
    pub fn instructor_id(&self) -> Ulid {
        match self {
            StoreEvent::SlotsCleared { instructor_id, .. }
            | StoreEvent::SlotDeleted { instructor_id, .. }
            | StoreEvent::BlackoutRemoved { instructor_id, .. }
            | StoreEvent::BookingStatusChanged { instructor_id, .. } => *instructor_id,
            StoreEvent::SlotCreated { slot } | StoreEvent::SlotUpdated { slot } => slot.instructor_id,
            StoreEvent::BlackoutAdded { blackout } => blackout.instructor_id,
            StoreEvent::BookingRecorded { booking } => booking.instructor_id,
        }
    }
}

/// Staged write set. Nothing is visible to readers until it is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: Ulid,
    events: Vec<StoreEvent>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: Ulid::new(),
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[StoreEvent] {
        &self.events
    }

    pub fn into_record(self) -> WalRecord {
        WalRecord {
            tx: self.id,
            events: self.events,
        }
    }

    /// Bulk delete every slot on the given dates.
    pub fn clear_dates(&mut self, instructor_id: Ulid, dates: &[NaiveDate]) {
        if dates.is_empty() {
            return;
        }
        self.events.push(StoreEvent::SlotsCleared {
            instructor_id,
            dates: dates.to_vec(),
        });
    }

    pub fn create_slot(&mut self, slot: AvailabilitySlot) {
        self.events.push(StoreEvent::SlotCreated { slot });
    }

    /// Bulk create.
    pub fn create_slots(&mut self, slots: impl IntoIterator<Item = AvailabilitySlot>) {
        self.events
            .extend(slots.into_iter().map(|slot| StoreEvent::SlotCreated { slot }));
    }

    pub fn update_slot(&mut self, slot: AvailabilitySlot) {
        self.events.push(StoreEvent::SlotUpdated { slot });
    }

    pub fn delete_slot(&mut self, instructor_id: Ulid, id: Ulid) {
        self.events.push(StoreEvent::SlotDeleted { id, instructor_id });
    }

    pub fn add_blackout(&mut self, blackout: BlackoutDate) {
        self.events.push(StoreEvent::BlackoutAdded { blackout });
    }

    pub fn delete_blackout(&mut self, instructor_id: Ulid, id: Ulid) {
        self.events.push(StoreEvent::BlackoutRemoved { id, instructor_id });
    }

    pub fn record_booking(&mut self, booking: Booking) {
        self.events.push(StoreEvent::BookingRecorded { booking });
    }

    pub fn set_booking_status(&mut self, instructor_id: Ulid, id: Ulid, status: BookingStatus) {
        self.events.push(StoreEvent::BookingStatusChanged {
            id,
            instructor_id,
            status,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub tx: Ulid,
    pub events: usize,
}

/// System of record for slots, blackouts and (read-only) bookings.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn begin(&self) -> Result<Transaction, RepositoryError> {
        Ok(Transaction::new())
    }

    /// Apply every staged event or none of them.
    async fn commit(&self, tx: Transaction) -> Result<CommitReceipt, RepositoryError>;

    async fn slots_on_dates(
        &self,
        instructor_id: Ulid,
        dates: &[NaiveDate],
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError>;

    /// Inclusive on both ends.
    async fn slots_between(
        &self,
        instructor_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError>;

    async fn get_slot(&self, id: Ulid) -> Result<Option<AvailabilitySlot>, RepositoryError>;

    /// Every booking regardless of status; callers filter.
    async fn bookings_between(
        &self,
        instructor_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Booking>, RepositoryError>;

    async fn blackouts_between(
        &self,
        instructor_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BlackoutDate>, RepositoryError>;

    async fn get_blackout(&self, id: Ulid) -> Result<Option<BlackoutDate>, RepositoryError>;

    async fn slots_on(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        self.slots_on_dates(instructor_id, &[date]).await
    }

    async fn bookings_on(&self, instructor_id: Ulid, date: NaiveDate) -> Result<Vec<Booking>, RepositoryError> {
        self.bookings_between(instructor_id, date, date).await
    }

    async fn blackout_on(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
    ) -> Result<Option<BlackoutDate>, RepositoryError> {
        Ok(self
            .blackouts_between(instructor_id, date, date)
            .await?
            .into_iter()
            .next())
    }
}
