//! Availability engine: bitmap codec, interval algebra, the conflict checker
//! and the services built on top of them.

mod availability;
pub mod bitset;
mod bulk;
mod conflict;
mod error;
pub mod intervals;
mod slots;
mod warming;
mod week;

pub use availability::{AvailabilityService, SaveWeekResult};
pub use bitset::DayBitmap;
pub use bulk::{
    diff_week, ActionSummary, BulkOperationService, BulkSummary, BulkValidationResult, DayWindows,
    OperationValidation, WeekDiff,
};
pub use conflict::{validate_time_range, BookingRequest, BookingRules, BookingValidation, ConflictChecker};
pub use error::AvailabilityError;
pub use slots::{MergeOutcome, SlotManager};
pub use warming::{read_week_uncached, resolve_days, CacheWarmer, ReadThroughCache, WarmOutcome};
pub use week::{ApplyPatternResult, CopyWeekResult, WeekOperationService};
