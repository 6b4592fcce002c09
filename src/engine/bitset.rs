//! Pack a day's 48 half-hour slots into a 6-byte bitmap.
//!
//! Bit `b` lives in byte `b / 8` at position `b % 8` (LSB first). Slot `b`
//! starts at minute `b * 30`.

use serde::{Deserialize, Serialize};

use crate::limits::{BITMAP_BYTES, SLOT_MINUTES, SLOTS_PER_DAY};
use crate::model::TimeWindow;

use super::AvailabilityError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayBitmap([u8; BITMAP_BYTES]);

fn check_index(index: usize) -> Result<(), AvailabilityError> {
    if index >= SLOTS_PER_DAY {
        return Err(AvailabilityError::Validation(format!(
            "Slot index {index} out of range [0, {SLOTS_PER_DAY})"
        )));
    }
    Ok(())
}

impl DayBitmap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Decode the raw wire form. Anything other than exactly 6 bytes is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AvailabilityError> {
        let raw: [u8; BITMAP_BYTES] = bytes.try_into().map_err(|_| {
            AvailabilityError::Validation(format!(
                "Bitmap must be exactly {BITMAP_BYTES} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }

    pub fn to_bytes(&self) -> [u8; BITMAP_BYTES] {
        self.0
    }

    pub fn is_set(&self, index: usize) -> Result<bool, AvailabilityError> {
        check_index(index)?;
        Ok(self.0[index / 8] & (1 << (index % 8)) != 0)
    }

    pub fn count(&self) -> usize {
        self.0.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    fn set_bit(&mut self, index: usize, value: bool) {
        let mask = 1 << (index % 8);
        if value {
            self.0[index / 8] |= mask;
        } else {
            self.0[index / 8] &= !mask;
        }
    }
}

pub fn pack(indexes: &[usize]) -> Result<DayBitmap, AvailabilityError> {
    let mut bitmap = DayBitmap::empty();
    for &index in indexes {
        check_index(index)?;
        bitmap.set_bit(index, true);
    }
    Ok(bitmap)
}

/// Set indexes in ascending order.
pub fn unpack(bitmap: &DayBitmap) -> Vec<usize> {
    (0..SLOTS_PER_DAY)
        .filter(|&i| bitmap.0[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

pub fn toggle(bitmap: &DayBitmap, index: usize, value: bool) -> Result<DayBitmap, AvailabilityError> {
    check_index(index)?;
    let mut out = *bitmap;
    out.set_bit(index, value);
    Ok(out)
}

/// Coalesce consecutive set slots into merged windows.
pub fn windows_from_bits(bitmap: &DayBitmap) -> Vec<TimeWindow> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for index in unpack(bitmap) {
        if let Some(last) = runs.last_mut()
            && last.1 == index
        {
            last.1 = index + 1;
            continue;
        }
        runs.push((index, index + 1));
    }
    runs.into_iter()
        .filter_map(|(start, end)| {
            TimeWindow::from_minutes(start as u16 * SLOT_MINUTES, end as u16 * SLOT_MINUTES).ok()
        })
        .collect()
}

/// Inverse of [`windows_from_bits`]. Each boundary snaps to the half-hour slot
/// containing it, so `09:45` lands on the `09:30` slot.
pub fn bits_from_windows(windows: &[TimeWindow]) -> DayBitmap {
    let mut bitmap = DayBitmap::empty();
    for w in windows {
        let first = usize::from(w.start_minute() / SLOT_MINUTES);
        let last = usize::from(w.end_minute() / SLOT_MINUTES).min(SLOTS_PER_DAY);
        for index in first..last {
            bitmap.set_bit(index, true);
        }
    }
    bitmap
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(start: &str, end: &str) -> TimeWindow {
        TimeWindow::parse(start, end).unwrap()
    }

    #[test]
    fn pack_sets_lsb_first() {
        let bitmap = pack(&[0, 9, 47]).unwrap();
        assert_eq!(bitmap.to_bytes(), [0b0000_0001, 0b0000_0010, 0, 0, 0, 0b1000_0000]);
    }

    #[test]
    fn unpack_sorts() {
        let bitmap = pack(&[20, 2, 0, 1]).unwrap();
        assert_eq!(unpack(&bitmap), vec![0, 1, 2, 20]);
    }

    #[test]
    fn pack_rejects_out_of_range() {
        let result = pack(&[3, 48]);
        assert!(matches!(result, Err(AvailabilityError::Validation(_))));
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(DayBitmap::from_bytes(&[0; 5]).is_err());
        assert!(DayBitmap::from_bytes(&[0; 7]).is_err());
        assert!(DayBitmap::from_bytes(&[0xFF; 6]).is_ok());
    }

    #[test]
    fn toggle_on_and_off() {
        let bitmap = toggle(&DayBitmap::empty(), 5, true).unwrap();
        assert!(bitmap.is_set(5).unwrap());
        let bitmap = toggle(&bitmap, 5, false).unwrap();
        assert!(bitmap.is_empty());
        assert!(toggle(&bitmap, 48, true).is_err());
        assert!(bitmap.is_set(48).is_err());
    }

    #[test]
    fn windows_from_runs() {
        let bitmap = pack(&[0, 1, 2, 20]).unwrap();
        let windows = windows_from_bits(&bitmap);
        let rendered: Vec<(String, String)> = windows
            .iter()
            .map(|w| (w.start_string(), w.end_string()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("00:00:00".to_string(), "01:30:00".to_string()),
                ("10:00:00".to_string(), "10:30:00".to_string()),
            ]
        );
    }

    #[test]
    fn last_slot_ends_at_midnight() {
        let bitmap = pack(&[46, 47]).unwrap();
        let windows = windows_from_bits(&bitmap);
        assert_eq!(windows, vec![w("23:00", "24:00")]);
        assert!(windows[0].ends_at_midnight());
    }

    #[test]
    fn full_day() {
        let all: Vec<usize> = (0..48).collect();
        let bitmap = pack(&all).unwrap();
        assert_eq!(windows_from_bits(&bitmap), vec![w("00:00", "24:00")]);
        assert_eq!(bits_from_windows(&windows_from_bits(&bitmap)), bitmap);
    }

    #[test]
    fn bits_from_windows_snaps_to_half_hours() {
        let bitmap = bits_from_windows(&[w("09:45", "10:45")]);
        assert_eq!(unpack(&bitmap), vec![19, 20]);

        let bitmap = bits_from_windows(&[w("09:00", "10:00"), w("10:00", "11:00")]);
        assert_eq!(unpack(&bitmap), vec![18, 19, 20, 21]);
        assert_eq!(windows_from_bits(&bitmap), vec![w("09:00", "11:00")]);
    }

    #[test]
    fn empty_bitmap_has_no_windows() {
        assert!(windows_from_bits(&DayBitmap::empty()).is_empty());
        assert_eq!(bits_from_windows(&[]), DayBitmap::empty());
    }
}
