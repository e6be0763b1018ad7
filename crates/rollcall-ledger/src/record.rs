use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;

/// Persisted date format (`Date` column).
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Persisted time-of-day format (`Time` column).
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// One identity's first appearance on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl AttendanceRecord {
    /// Record for `name` at `now`, truncated to whole seconds.
    pub fn at(name: &str, now: NaiveDateTime) -> Self {
        let time = now.time();
        Self {
            name: name.to_string(),
            date: now.date(),
            time: time.with_nanosecond(0).unwrap_or(time),
        }
    }

    pub fn date_str(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn time_str(&self) -> String {
        self.time.format(TIME_FORMAT).to_string()
    }
}

/// Result of asking the ledger to record attendance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new record was appended and persisted.
    Recorded(AttendanceRecord),
    /// The identity already has a record for that day; nothing changed.
    AlreadyRecorded(AttendanceRecord),
}

impl RecordOutcome {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            RecordOutcome::Recorded(r) | RecordOutcome::AlreadyRecorded(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, RecordOutcome::Recorded(_))
    }
}
