/// Time helpers: the wall clock used by monitoring, and timestamp formatting
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Source of the current local time
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock in a fixed local UTC offset
///
/// The offset must be resolved with `UtcOffset::current_local_offset` before any
/// other thread is started; `time` refuses to determine it afterwards.
pub struct LocalClock {
    offset: UtcOffset,
}

impl LocalClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Clock for LocalClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!("[day].[month].[year] - [hour]:[minute]:[second]");
    dt.format(&format).unwrap_or_else(|_| dt.to_string())
}

/// Format a timestamp for use in a file name (DD-MM-YYYY-HH-MM-SS)
pub fn format_file_stamp(dt: &OffsetDateTime) -> String {
    let format = format_description!("[day]-[month]-[year]-[hour]-[minute]-[second]");
    dt.format(&format).unwrap_or_else(|_| dt.unix_timestamp().to_string())
}
