//! rollcall-ledger: durable attendance records, one per identity per day.

pub mod ledger;
pub mod record;

pub use ledger::{Ledger, LedgerError};
pub use record::{AttendanceRecord, RecordOutcome};
