//! Transaction log. Each committed [`WalRecord`] is one frame:
//! `len: u32 LE | bincode payload | crc32(payload): u32 LE`.
//!
//! A frame cut short or failing its checksum marks the end of the log; it is
//! the tail of a write that never finished. A frame with a good checksum that
//! does not decode is a real error and fails the open instead of hiding every
//! transaction after it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::StoreEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub tx: Ulid,
    pub events: Vec<StoreEvent>,
}

fn write_frame(out: &mut impl Write, record: &WalRecord) -> io::Result<()> {
    let payload = bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// `Ok(false)` when the input ends before `buf` is full.
fn fill(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact payload, or `None` at a clean end, a torn frame or a bad checksum.
fn read_frame(input: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut word = [0u8; 4];
    if !fill(input, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !fill(input, &mut payload)? || !fill(input, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

fn tmp_path_for(path: &Path) -> PathBuf {
    path.with_extension("wal.tmp")
}

/// Append handle on the log file. The store batches appends and calls
/// [`Wal::flush_sync`] once per group commit.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &WalRecord) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, record: &WalRecord) -> io::Result<()> {
        write_frame(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot next to the log. Slow; the caller holds no log lock.
    pub fn write_compact_file(path: &Path, records: &[WalRecord]) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(tmp_path_for(path))?);
        for record in records {
            write_frame(&mut out, record)?;
        }
        out.flush()?;
        out.get_ref().sync_all()
    }

    /// Move the snapshot over the log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(tmp_path_for(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, records: &[WalRecord]) -> io::Result<()> {
        Self::write_compact_file(&self.path, records)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every committed record, in commit order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<WalRecord>> {
        let mut input = match File::open(path) {
            Ok(file) => BufReader::new(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut records = Vec::new();
        while let Some(payload) = read_frame(&mut input)? {
            let record = bincode::deserialize::<WalRecord>(&payload).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: record {} does not decode: {e}", path.display(), records.len()),
                )
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AvailabilitySlot, BlackoutDate, TimeWindow};
    use chrono::NaiveDate;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotwise_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 14).unwrap()
    }

    fn slot_record(instructor: Ulid) -> WalRecord {
        WalRecord {
            tx: Ulid::new(),
            events: vec![
                StoreEvent::SlotsCleared {
                    instructor_id: instructor,
                    dates: vec![date()],
                },
                StoreEvent::SlotCreated {
                    slot: AvailabilitySlot::new(instructor, date(), TimeWindow::parse("09:00", "10:00").unwrap()),
                },
            ],
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let instructor = Ulid::new();
        let records = vec![
            slot_record(instructor),
            WalRecord {
                tx: Ulid::new(),
                events: vec![StoreEvent::BlackoutAdded {
                    blackout: BlackoutDate {
                        id: Ulid::new(),
                        instructor_id: instructor,
                        date: date(),
                        reason: Some("Vacation".into()),
                    },
                }],
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for r in &records {
                wal.append(r).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, records);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_torn_transaction() {
        let path = tmp_path("torn.wal");
        let _ = fs::remove_file(&path);

        let record = slot_record(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&record).unwrap();
        }
        // Second record cut off mid-payload
        {
            let payload = bincode::serialize(&slot_record(Ulid::new())).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload[..payload.len() / 2]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![record]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        {
            let payload = bincode::serialize(&slot_record(Ulid::new())).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn full_day_window_replays() {
        let path = tmp_path("full_day.wal");
        let _ = fs::remove_file(&path);

        let instructor = Ulid::new();
        let full_day = WalRecord {
            tx: Ulid::new(),
            events: vec![StoreEvent::SlotCreated {
                slot: AvailabilitySlot::new(instructor, date(), TimeWindow::parse("00:00", "24:00").unwrap()),
            }],
        };
        let later = slot_record(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&full_day).unwrap();
            wal.append(&later).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![full_day, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn undecodable_record_fails_replay() {
        let path = tmp_path("undecodable.wal");
        let _ = fs::remove_file(&path);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&slot_record(Ulid::new())).unwrap();
            let garbage = [0xFFu8; 3];
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(garbage.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&garbage).unwrap();
            f.write_all(&crc32fast::hash(&garbage).to_le_bytes()).unwrap();
        }

        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let instructor = Ulid::new();
        let snapshot = vec![slot_record(instructor)];
        let after = slot_record(instructor);

        {
            let mut wal = Wal::open(&path).unwrap();
            for _ in 0..10 {
                wal.append(&slot_record(instructor)).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            wal.compact(&snapshot).unwrap();
            let compacted = fs::metadata(&path).unwrap().len();
            assert!(compacted < before);
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&after).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![snapshot[0].clone(), after]);

        let _ = fs::remove_file(&path);
    }
}
