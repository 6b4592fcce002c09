use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::WAL_CHANNEL_CAPACITY;
use crate::model::*;

use super::wal::{Wal, WalRecord};
use super::{CommitReceipt, Repository, RepositoryError, StoreEvent, Transaction};

pub type SharedInstructorState = Arc<RwLock<InstructorState>>;

/// Everything stored for one instructor, keyed by date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructorState {
    /// Rows per date, sorted by window.
    pub slots: BTreeMap<NaiveDate, Vec<AvailabilitySlot>>,
    pub blackouts: BTreeMap<NaiveDate, BlackoutDate>,
    pub bookings: BTreeMap<NaiveDate, Vec<Booking>>,
}

impl InstructorState {
    fn insert_slot(&mut self, slot: AvailabilitySlot) {
        let rows = self.slots.entry(slot.date).or_default();
        let pos = rows.partition_point(|r| r.window <= slot.window);
        rows.insert(pos, slot);
    }

    fn remove_slot(&mut self, id: Ulid, date: NaiveDate) -> Option<AvailabilitySlot> {
        let rows = self.slots.get_mut(&date)?;
        let pos = rows.iter().position(|r| r.id == id)?;
        let removed = rows.remove(pos);
        if rows.is_empty() {
            self.slots.remove(&date);
        }
        Some(removed)
    }

    /// Rebuild the minimal event list that recreates this state.
    fn snapshot_events(&self) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        for rows in self.slots.values() {
            events.extend(rows.iter().cloned().map(|slot| StoreEvent::SlotCreated { slot }));
        }
        for blackout in self.blackouts.values() {
            events.push(StoreEvent::BlackoutAdded {
                blackout: blackout.clone(),
            });
        }
        for bookings in self.bookings.values() {
            events.extend(
                bookings
                    .iter()
                    .cloned()
                    .map(|booking| StoreEvent::BookingRecorded { booking }),
            );
        }
        events
    }
}

/// id → (instructor, date) lookups for rows addressed by id.
#[derive(Default)]
struct Indexes {
    slots: DashMap<Ulid, (Ulid, NaiveDate)>,
    blackouts: DashMap<Ulid, (Ulid, NaiveDate)>,
    bookings: DashMap<Ulid, (Ulid, NaiveDate)>,
}

/// Apply an event to an InstructorState. The caller holds its write lock.
fn apply_event(rs: &mut InstructorState, event: &StoreEvent, indexes: &Indexes) {
    match event {
        StoreEvent::SlotsCleared { dates, .. } => {
            for date in dates {
                if let Some(rows) = rs.slots.remove(date) {
                    for row in rows {
                        indexes.slots.remove(&row.id);
                    }
                }
            }
        }
        StoreEvent::SlotCreated { slot } => {
            indexes.slots.insert(slot.id, (slot.instructor_id, slot.date));
            rs.insert_slot(slot.clone());
        }
        StoreEvent::SlotUpdated { slot } => {
            if let Some((_, (_, old_date))) = indexes.slots.remove(&slot.id) {
                rs.remove_slot(slot.id, old_date);
            }
            indexes.slots.insert(slot.id, (slot.instructor_id, slot.date));
            rs.insert_slot(slot.clone());
        }
        StoreEvent::SlotDeleted { id, .. } => {
            if let Some((_, (_, date))) = indexes.slots.remove(id) {
                rs.remove_slot(*id, date);
            }
        }
        StoreEvent::BlackoutAdded { blackout } => {
            if let Some(previous) = rs.blackouts.insert(blackout.date, blackout.clone()) {
                indexes.blackouts.remove(&previous.id);
            }
            indexes
                .blackouts
                .insert(blackout.id, (blackout.instructor_id, blackout.date));
        }
        StoreEvent::BlackoutRemoved { id, .. } => {
            if let Some((_, (_, date))) = indexes.blackouts.remove(id) {
                rs.blackouts.remove(&date);
            }
        }
        StoreEvent::BookingRecorded { booking } => {
            if let Some((_, (_, old_date))) = indexes.bookings.remove(&booking.id)
                && let Some(list) = rs.bookings.get_mut(&old_date)
            {
                list.retain(|b| b.id != booking.id);
            }
            indexes
                .bookings
                .insert(booking.id, (booking.instructor_id, booking.date));
            rs.bookings.entry(booking.date).or_default().push(booking.clone());
        }
        StoreEvent::BookingStatusChanged { id, status, .. } => {
            if let Some(entry) = indexes.bookings.get(id) {
                let (_, date) = *entry.value();
                if let Some(booking) = rs
                    .bookings
                    .get_mut(&date)
                    .and_then(|list| list.iter_mut().find(|b| b.id == *id))
                {
                    booking.status = *status;
                }
            }
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        record: WalRecord,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<WalRecord>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is queued, then one
/// `flush_sync` for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                flush_and_respond(&mut wal, batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: Vec<(WalRecord, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut append_err: Option<io::Error> = None;
    for (record, _) in &batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    let result = match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    };
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { record, response } => flush_and_respond(wal, vec![(record, response)]),
    }
}

/// In-memory store made durable by a group-committed WAL.
pub struct WalStore {
    state: DashMap<Ulid, SharedInstructorState>,
    indexes: Indexes,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Commits hold this shared; compaction holds it exclusively so the snapshot
    /// and the file swap see the same state.
    gate: RwLock<()>,
}

impl WalStore {
    /// Replay the WAL at `wal_path` and start the writer task. Must run inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let indexes = Indexes::default();
        let mut replayed: HashMap<Ulid, InstructorState> = HashMap::new();
        let mut events = 0usize;
        for record in &records {
            for event in &record.events {
                let rs = replayed.entry(event.instructor_id()).or_default();
                apply_event(rs, event, &indexes);
                events += 1;
            }
        }
        info!(
            "store replayed {} transactions ({events} events) from {}",
            records.len(),
            wal_path.display()
        );

        let state = DashMap::new();
        for (id, rs) in replayed {
            state.insert(id, Arc::new(RwLock::new(rs)));
        }

        Ok(Self {
            state,
            indexes,
            wal_tx,
            gate: RwLock::new(()),
        })
    }

    fn instructor(&self, id: &Ulid) -> Option<SharedInstructorState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    fn instructor_or_create(&self, id: Ulid) -> SharedInstructorState {
        self.state
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(InstructorState::default())))
            .value()
            .clone()
    }

    pub fn instructor_count(&self) -> usize {
        self.state.len()
    }

    /// Clone of one instructor's full state.
    pub async fn snapshot(&self, instructor_id: Ulid) -> InstructorState {
        match self.instructor(&instructor_id) {
            Some(rs) => rs.read().await.clone(),
            None => InstructorState::default(),
        }
    }

    async fn wal_append(&self, record: WalRecord) -> Result<(), RepositoryError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { record, response: tx })
            .await
            .map_err(|_| RepositoryError::Closed)?;
        rx.await
            .map_err(|_| RepositoryError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| RepositoryError::Wal(e.to_string()))
    }

    /// Rewrite the WAL as one snapshot record per instructor.
    pub async fn compact(&self) -> Result<(), RepositoryError> {
        let _exclusive = self.gate.write().await;

        let shared: Vec<(Ulid, SharedInstructorState)> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let mut records = Vec::with_capacity(shared.len());
        for (_, rs) in shared {
            let guard = rs.read().await;
            let events = guard.snapshot_events();
            if !events.is_empty() {
                records.push(WalRecord {
                    tx: Ulid::new(),
                    events,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| RepositoryError::Closed)?;
        rx.await
            .map_err(|_| RepositoryError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| RepositoryError::Wal(e.to_string()))?;
        info!("store compacted: {} instructors", self.state.len());
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
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

#[async_trait]
impl Repository for WalStore {
    async fn commit(&self, tx: Transaction) -> Result<CommitReceipt, RepositoryError> {
        let receipt = CommitReceipt {
            tx: tx.id(),
            events: tx.len(),
        };
        if tx.is_empty() {
            return Ok(receipt);
        }
        let _shared = self.gate.read().await;

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut instructor_ids: Vec<Ulid> = tx.events().iter().map(StoreEvent::instructor_id).collect();
        instructor_ids.sort();
        instructor_ids.dedup();

        let mut guards = Vec::with_capacity(instructor_ids.len());
        let mut slot_of = HashMap::with_capacity(instructor_ids.len());
        for id in &instructor_ids {
            let rs = self.instructor_or_create(*id);
            slot_of.insert(*id, guards.len());
            guards.push(rs.write_owned().await);
        }

        let record = tx.into_record();
        self.wal_append(record.clone()).await?;
        for event in &record.events {
            let idx = slot_of[&event.instructor_id()];
            apply_event(&mut guards[idx], event, &self.indexes);
        }
        debug!("committed tx {} ({} events)", receipt.tx, receipt.events);
        Ok(receipt)
    }

    async fn slots_on_dates(
        &self,
        instructor_id: Ulid,
        dates: &[NaiveDate],
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        let Some(rs) = self.instructor(&instructor_id) else {
            return Ok(Vec::new());
        };
        let guard = rs.read().await;
        let mut dates = dates.to_vec();
        dates.sort();
        dates.dedup();
        Ok(dates
            .iter()
            .filter_map(|d| guard.slots.get(d))
            .flat_map(|rows| rows.iter().cloned())
            .collect())
    }

    async fn slots_between(
        &self,
        instructor_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        let Some(rs) = self.instructor(&instructor_id) else {
            return Ok(Vec::new());
        };
        if end < start {
            return Ok(Vec::new());
        }
        let guard = rs.read().await;
        Ok(guard
            .slots
            .range(start..=end)
            .flat_map(|(_, rows)| rows.iter().cloned())
            .collect())
    }

    async fn get_slot(&self, id: Ulid) -> Result<Option<AvailabilitySlot>, RepositoryError> {
        let Some((instructor_id, date)) = self.indexes.slots.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(rs) = self.instructor(&instructor_id) else {
            return Ok(None);
        };
        let guard = rs.read().await;
        Ok(guard
            .slots
            .get(&date)
            .and_then(|rows| rows.iter().find(|r| r.id == id))
            .cloned())
    }

    async fn bookings_between(
        &self,
        instructor_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let Some(rs) = self.instructor(&instructor_id) else {
            return Ok(Vec::new());
        };
        if end < start {
            return Ok(Vec::new());
        }
        let guard = rs.read().await;
        Ok(guard
            .bookings
            .range(start..=end)
            .flat_map(|(_, list)| list.iter().cloned())
            .collect())
    }

    async fn blackouts_between(
        &self,
        instructor_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BlackoutDate>, RepositoryError> {
        let Some(rs) = self.instructor(&instructor_id) else {
            return Ok(Vec::new());
        };
        if end < start {
            return Ok(Vec::new());
        }
        let guard = rs.read().await;
        Ok(guard.blackouts.range(start..=end).map(|(_, b)| b.clone()).collect())
    }

    async fn get_blackout(&self, id: Ulid) -> Result<Option<BlackoutDate>, RepositoryError> {
        let Some((instructor_id, date)) = self.indexes.blackouts.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(rs) = self.instructor(&instructor_id) else {
            return Ok(None);
        };
        let guard = rs.read().await;
        Ok(guard.blackouts.get(&date).filter(|b| b.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotwise_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn w(start: &str, end: &str) -> TimeWindow {
        TimeWindow::parse(start, end).unwrap()
    }

    fn booking(instructor: Ulid, date: NaiveDate, window: TimeWindow, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            instructor_id: instructor,
            date,
            window,
            status,
            service_id: None,
        }
    }

    #[tokio::test]
    async fn commit_and_read_back() {
        let store = WalStore::open(test_wal_path("commit_read.wal")).unwrap();
        let instructor = Ulid::new();

        let mut tx = store.begin().await.unwrap();
        tx.create_slots(vec![
            AvailabilitySlot::new(instructor, d("2025-07-15"), w("13:00", "14:00")),
            AvailabilitySlot::new(instructor, d("2025-07-15"), w("09:00", "10:00")),
            AvailabilitySlot::new(instructor, d("2025-07-16"), w("09:00", "10:00")),
        ]);
        let receipt = store.commit(tx).await.unwrap();
        assert_eq!(receipt.events, 3);

        let rows = store.slots_on(instructor, d("2025-07-15")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].window, w("09:00", "10:00"));

        let all = store.slots_between(instructor, d("2025-07-14"), d("2025-07-20")).await.unwrap();
        assert_eq!(all.len(), 3);

        let fetched = store.get_slot(rows[1].id).await.unwrap().unwrap();
        assert_eq!(fetched, rows[1]);
    }

    #[tokio::test]
    async fn uncommitted_transaction_invisible() {
        let store = WalStore::open(test_wal_path("uncommitted.wal")).unwrap();
        let instructor = Ulid::new();
        let mut tx = store.begin().await.unwrap();
        tx.create_slot(AvailabilitySlot::new(instructor, d("2025-07-15"), w("09:00", "10:00")));
        drop(tx);
        assert!(store.slots_on(instructor, d("2025-07-15")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_dates_removes_rows_and_index() {
        let store = WalStore::open(test_wal_path("clear_dates.wal")).unwrap();
        let instructor = Ulid::new();
        let slot = AvailabilitySlot::new(instructor, d("2025-07-15"), w("09:00", "10:00"));
        let keep = AvailabilitySlot::new(instructor, d("2025-07-16"), w("09:00", "10:00"));

        let mut tx = store.begin().await.unwrap();
        tx.create_slots(vec![slot.clone(), keep.clone()]);
        store.commit(tx).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.clear_dates(instructor, &[d("2025-07-15")]);
        store.commit(tx).await.unwrap();

        assert!(store.get_slot(slot.id).await.unwrap().is_none());
        assert_eq!(store.get_slot(keep.id).await.unwrap(), Some(keep));
    }

    #[tokio::test]
    async fn update_moves_row() {
        let store = WalStore::open(test_wal_path("update_moves.wal")).unwrap();
        let instructor = Ulid::new();
        let mut slot = AvailabilitySlot::new(instructor, d("2025-07-15"), w("09:00", "10:00"));

        let mut tx = store.begin().await.unwrap();
        tx.create_slot(slot.clone());
        store.commit(tx).await.unwrap();

        slot.window = w("11:00", "12:00");
        let mut tx = store.begin().await.unwrap();
        tx.update_slot(slot.clone());
        store.commit(tx).await.unwrap();

        let rows = store.slots_on(instructor, d("2025-07-15")).await.unwrap();
        assert_eq!(rows, vec![slot]);
    }

    #[tokio::test]
    async fn blackout_lookup_by_id_and_date() {
        let store = WalStore::open(test_wal_path("blackouts.wal")).unwrap();
        let instructor = Ulid::new();
        let blackout = BlackoutDate {
            id: Ulid::new(),
            instructor_id: instructor,
            date: d("2025-07-18"),
            reason: None,
        };
        let mut tx = store.begin().await.unwrap();
        tx.add_blackout(blackout.clone());
        store.commit(tx).await.unwrap();

        assert_eq!(store.get_blackout(blackout.id).await.unwrap(), Some(blackout.clone()));
        assert_eq!(store.blackout_on(instructor, d("2025-07-18")).await.unwrap(), Some(blackout.clone()));

        let mut tx = store.begin().await.unwrap();
        tx.delete_blackout(instructor, blackout.id);
        store.commit(tx).await.unwrap();
        assert!(store.get_blackout(blackout.id).await.unwrap().is_none());
        assert!(store.blackout_on(instructor, d("2025-07-18")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn booking_status_change() {
        let store = WalStore::open(test_wal_path("booking_status.wal")).unwrap();
        let instructor = Ulid::new();
        let b = booking(instructor, d("2025-07-15"), w("09:00", "10:00"), BookingStatus::Confirmed);

        let mut tx = store.begin().await.unwrap();
        tx.record_booking(b.clone());
        store.commit(tx).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.set_booking_status(instructor, b.id, BookingStatus::Cancelled);
        store.commit(tx).await.unwrap();

        let bookings = store.bookings_on(instructor, d("2025-07-15")).await.unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn replay_restores_state() {
        let path = test_wal_path("replay_state.wal");
        let instructor = Ulid::new();
        let slot = AvailabilitySlot::new(instructor, d("2025-07-15"), w("09:00", "10:00"));
        {
            let store = WalStore::open(path.clone()).unwrap();
            let mut tx = store.begin().await.unwrap();
            tx.create_slot(slot.clone());
            tx.record_booking(booking(instructor, d("2025-07-15"), w("09:00", "09:30"), BookingStatus::Confirmed));
            store.commit(tx).await.unwrap();
        }

        let store = WalStore::open(path).unwrap();
        assert_eq!(store.get_slot(slot.id).await.unwrap(), Some(slot));
        assert_eq!(store.bookings_on(instructor, d("2025-07-15")).await.unwrap().len(), 1);
    }

    // ── WAL compaction tests ──────────────────────────────────────

    #[tokio::test]
    async fn compact_preserves_state_and_shrinks_wal() {
        let path = test_wal_path("compact_state.wal");
        let store = WalStore::open(path.clone()).unwrap();
        let instructor = Ulid::new();

        // Churn: replace the same day over and over
        for i in 0..20u32 {
            let mut tx = store.begin().await.unwrap();
            tx.clear_dates(instructor, &[d("2025-07-15")]);
            let start = minute_to_time((8 * 60 + i * 15) as Minute);
            let window = TimeWindow::new(start, parse_clock("20:00").unwrap()).unwrap();
            tx.create_slot(AvailabilitySlot::new(instructor, d("2025-07-15"), window));
            store.commit(tx).await.unwrap();
        }
        let before_state = store.snapshot(instructor).await;
        let size_before = std::fs::metadata(&path).unwrap().len();
        assert_eq!(store.appends_since_compact().await, 20);

        store.compact().await.unwrap();

        let size_after = std::fs::metadata(&path).unwrap().len();
        assert!(size_after < size_before, "compacted WAL ({size_after}) should be smaller than {size_before}");
        assert_eq!(store.appends_since_compact().await, 0);
        assert_eq!(store.snapshot(instructor).await, before_state);

        drop(store);
        let reopened = WalStore::open(path).unwrap();
        assert_eq!(reopened.snapshot(instructor).await, before_state);
    }

    #[tokio::test]
    async fn group_commit_concurrent_writers() {
        let path = test_wal_path("group_commit.wal");
        let store = Arc::new(WalStore::open(path.clone()).unwrap());

        let n = 20;
        let mut handles = Vec::new();
        for _ in 0..n {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let instructor = Ulid::new();
                let mut tx = store.begin().await.unwrap();
                tx.create_slot(AvailabilitySlot::new(instructor, d("2025-07-15"), w("09:00", "10:00")));
                store.commit(tx).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.instructor_count(), n);

        let reopened = WalStore::open(path).unwrap();
        assert_eq!(reopened.instructor_count(), n);
    }
}
