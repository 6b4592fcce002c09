// ── Day grid ──────────────────────────────────────────────────────

pub const MINUTES_PER_DAY: u16 = 1440;

/// Width of one bitmap slot in minutes.
pub const SLOT_MINUTES: u16 = 30;

/// 48 half-hour slots per day.
pub const SLOTS_PER_DAY: usize = (MINUTES_PER_DAY / SLOT_MINUTES) as usize;

/// 48 bits packed LSB-first.
pub const BITMAP_BYTES: usize = SLOTS_PER_DAY / 8;

/// Slot boundaries written through SlotManager and the bulk paths must sit on this grid.
pub const SLOT_ALIGNMENT_MINUTES: u16 = 15;

/// Two windows merge when the gap between them is at most this many minutes.
pub const MERGE_GAP_TOLERANCE_MINUTES: u16 = 1;

// ── Booking rules (defaults, overridable through Config) ──────────

pub const DEFAULT_MIN_ADVANCE_HOURS: u32 = 2;
pub const DEFAULT_MIN_BOOKING_MINUTES: u32 = 30;
pub const DEFAULT_MAX_BOOKING_MINUTES: u32 = 240;
pub const DEFAULT_EARLIEST_HOUR: u32 = 9;
pub const DEFAULT_LATEST_HOUR: u32 = 21;

// ── Request limits ────────────────────────────────────────────────

pub const MAX_BULK_OPERATIONS: usize = 500;
pub const MAX_PATTERN_RANGE_DAYS: i64 = 366;
pub const MAX_WINDOWS_PER_DAY: usize = 96;
pub const MAX_BLACKOUT_REASON_LEN: usize = 500;

// ── Cache ─────────────────────────────────────────────────────────

pub const TTL_HOT_SECS: u64 = 300;
pub const TTL_WARM_SECS: u64 = 3_600;
pub const TTL_COLD_SECS: u64 = 86_400;
pub const TTL_STATIC_SECS: u64 = 604_800;

pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 60;

/// Backoff before each verification retry when warming the cache.
pub const WARM_RETRY_BACKOFF_MS: [u64; 3] = [50, 100, 200];

// ── Store ─────────────────────────────────────────────────────────

pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
pub const WAL_CHANNEL_CAPACITY: usize = 4096;
