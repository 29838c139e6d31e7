//! Cron expression parsing and occurrence computation, used to drive
//! scheduled task dispatch against a timezone-aware calendar.
mod dom;
mod dow;
mod error;
mod field;
mod schedule;

pub use self::dom::DayOfMonth;
pub use self::dow::DayOfWeek;
pub use self::error::ParseError;
pub use self::schedule::Schedule;
