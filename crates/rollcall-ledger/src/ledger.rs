//! SQLite-backed attendance ledger.
//!
//! One table, `attendance("Name", "Date", "Time")`, append-only. The ledger
//! itself guarantees at most one row per `(Name, Date)`: the lookup and the
//! insert run inside one IMMEDIATE transaction, and the table carries a
//! UNIQUE constraint on the pair.

use crate::record::{AttendanceRecord, RecordOutcome, DATE_FORMAT, TIME_FORMAT};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS attendance (
    "Name" TEXT NOT NULL,
    "Date" TEXT NOT NULL,
    "Time" TEXT NOT NULL,
    UNIQUE ("Name", "Date")
);
"#;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("cannot create ledger directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

/// `SQLITE_READONLY_DBMOVED`: the database file was unlinked or renamed
/// underneath an open connection.
const READONLY_DBMOVED: std::os::raw::c_int = 1032;

/// Append-only, idempotent-per-day attendance store.
///
/// Assumes a single writer per process; `&mut self` on the write path keeps
/// the check-then-append sequence exclusive.
pub struct Ledger {
    conn: Connection,
    path: Option<PathBuf>,
    flags: OpenFlags,
}

impl Ledger {
    /// Open the ledger at `path`, creating the file, its parent directories,
    /// and the schema as needed. Safe to call on an existing ledger.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let existed = path.exists();
        let flags = OpenFlags::default();
        let ledger = Self {
            conn: connect(path, flags)?,
            path: Some(path.to_path_buf()),
            flags,
        };
        ledger.initialize()?;

        if existed {
            tracing::debug!(path = %path.display(), "opened attendance ledger");
        } else {
            tracing::info!(path = %path.display(), "created attendance ledger");
        }
        Ok(ledger)
    }

    /// Open an existing ledger for reading only. Nothing is created; writes fail.
    pub fn open_read_only(path: &Path) -> Result<Self, LedgerError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Ok(Self {
            conn: connect(path, flags)?,
            path: Some(path.to_path_buf()),
            flags,
        })
    }

    /// Non-persistent ledger, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let ledger = Self {
            conn: Connection::open_in_memory()?,
            path: None,
            flags: OpenFlags::default(),
        };
        ledger.initialize()?;
        Ok(ledger)
    }

    /// Create the schema if it is absent. Idempotent.
    pub fn initialize(&self) -> Result<(), LedgerError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn is_read_only(&self) -> bool {
        self.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY)
    }

    /// Record `name` as present on the calendar day of `now`.
    ///
    /// The first call per `(name, day)` appends a record stamped with `now`;
    /// later calls that day change nothing and return the first record.
    /// If the store file or its schema has gone missing it is recreated once
    /// and the write retried.
    pub fn record_attendance(
        &mut self,
        name: &str,
        now: NaiveDateTime,
    ) -> Result<RecordOutcome, LedgerError> {
        if self.store_missing() {
            tracing::warn!(path = ?self.path, "ledger store missing; recreating");
            self.reopen()?;
        }
        match self.try_record(name, now) {
            Err(LedgerError::Sqlite(e)) if !self.is_read_only() && needs_reopen(&e) => {
                tracing::warn!(error = %e, "ledger store lost; re-initializing");
                self.reopen()?;
                self.try_record(name, now)
            }
            other => other,
        }
    }

    fn store_missing(&self) -> bool {
        !self.is_read_only() && self.path.as_deref().is_some_and(|p| !p.exists())
    }

    /// Open a fresh connection to the configured path and ensure the schema.
    fn reopen(&mut self) -> Result<(), LedgerError> {
        if let Some(path) = &self.path {
            self.conn = connect(path, self.flags)?;
        }
        self.initialize()
    }

    fn try_record(&mut self, name: &str, now: NaiveDateTime) -> Result<RecordOutcome, LedgerError> {
        let candidate = AttendanceRecord::at(name, now);
        let date = candidate.date_str();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .query_row(
                r#"SELECT "Time" FROM attendance
                   WHERE "Name" = ?1 AND "Date" = ?2
                   ORDER BY rowid LIMIT 1"#,
                params![name, date],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(time) = existing {
            let record = AttendanceRecord {
                name: candidate.name,
                date: candidate.date,
                time: parse_time(&time)?,
            };
            tracing::info!(name, date = %date, "already recorded today");
            return Ok(RecordOutcome::AlreadyRecorded(record));
        }

        tx.execute(
            r#"INSERT INTO attendance ("Name", "Date", "Time") VALUES (?1, ?2, ?3)"#,
            params![candidate.name, date, candidate.time_str()],
        )?;
        tx.commit()?;

        tracing::info!(name, date = %date, time = %candidate.time_str(), "attendance recorded");
        Ok(RecordOutcome::Recorded(candidate))
    }

    /// All records in insertion order.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        self.query(
            r#"SELECT "Name", "Date", "Time" FROM attendance ORDER BY rowid"#,
            [],
        )
    }

    /// Records for one calendar day, in insertion order.
    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        self.query(
            r#"SELECT "Name", "Date", "Time" FROM attendance WHERE "Date" = ?1 ORDER BY rowid"#,
            [date.format(DATE_FORMAT).to_string()],
        )
    }

    pub fn len(&self) -> Result<usize, LedgerError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM attendance", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    fn query<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (name, date, time) = row?;
            records.push(AttendanceRecord {
                name,
                date: parse_date(&date)?,
                time: parse_time(&time)?,
            });
        }
        Ok(records)
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, LedgerError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| LedgerError::Corrupt(format!("date {s:?}: {e}")))
}

fn parse_time(s: &str) -> Result<NaiveTime, LedgerError> {
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|e| LedgerError::Corrupt(format!("time {s:?}: {e}")))
}

/// Open `path`, creating parent directories when the flags allow creation.
fn connect(path: &Path, flags: OpenFlags) -> Result<Connection, LedgerError> {
    if flags.contains(OpenFlags::SQLITE_OPEN_CREATE) {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(Connection::open_with_flags(path, flags)?)
}

fn needs_reopen(e: &rusqlite::Error) -> bool {
    is_missing_table(e) || is_store_moved(e)
}

fn is_missing_table(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.starts_with("no such table"))
}

fn is_store_moved(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ReadOnly && err.extended_code == READONLY_DBMOVED
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_same_day_is_idempotent() {
        let mut ledger = Ledger::open_in_memory().unwrap();

        let first = ledger.record_attendance("ALICE", at(6, 8, 0, 0)).unwrap();
        let second = ledger.record_attendance("ALICE", at(6, 17, 30, 0)).unwrap();
        let third = ledger.record_attendance("ALICE", at(6, 23, 59, 59)).unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(second, third);
        assert_eq!(second.record(), first.record());

        let records = ledger.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time_str(), "08:00:00");
    }

    #[test]
    fn test_different_days_are_distinct() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger.record_attendance("ALICE", at(6, 9, 0, 0)).unwrap();
        ledger.record_attendance("ALICE", at(7, 9, 0, 0)).unwrap();

        let dates: Vec<String> = ledger.records().unwrap().iter().map(|r| r.date_str()).collect();
        assert_eq!(dates, vec!["2024-05-06", "2024-05-07"]);
    }

    #[test]
    fn test_midnight_boundary() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        assert!(ledger.record_attendance("BOB", at(6, 23, 59, 59)).unwrap().is_new());
        assert!(ledger.record_attendance("BOB", at(7, 0, 0, 0)).unwrap().is_new());
        assert_eq!(ledger.len().unwrap(), 2);
    }

    #[test]
    fn test_names_are_independent() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger.record_attendance("ALICE", at(6, 9, 0, 0)).unwrap();
        ledger.record_attendance("BOB", at(6, 9, 5, 0)).unwrap();
        ledger.record_attendance("ALICE", at(6, 9, 10, 0)).unwrap();

        let names: Vec<String> = ledger.records().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["ALICE", "BOB"]);
    }

    #[test]
    fn test_records_on_filters_by_day() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger.record_attendance("ALICE", at(6, 9, 0, 0)).unwrap();
        ledger.record_attendance("BOB", at(7, 9, 0, 0)).unwrap();
        ledger.record_attendance("CAROL", at(7, 10, 0, 0)).unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 5, 7).unwrap();
        let names: Vec<String> = ledger
            .records_on(day)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["BOB", "CAROL"]);
    }

    #[test]
    fn test_open_creates_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/attendance.db");
        assert!(!path.exists());

        let ledger = Ledger::open(&path).unwrap();
        assert!(path.exists());
        assert!(ledger.is_empty().unwrap());
        assert_eq!(ledger.path(), Some(path.as_path()));
    }

    #[test]
    fn test_schema_columns() {
        let ledger = Ledger::open_in_memory().unwrap();
        let mut stmt = ledger.conn.prepare("PRAGMA table_info(attendance)").unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(columns, vec!["Name", "Date", "Time"]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");

        {
            let mut ledger = Ledger::open(&path).unwrap();
            ledger.record_attendance("ALICE", at(6, 8, 15, 0)).unwrap();
        }

        let mut ledger = Ledger::open(&path).unwrap();
        let outcome = ledger.record_attendance("ALICE", at(6, 12, 0, 0)).unwrap();
        assert_eq!(
            outcome,
            RecordOutcome::AlreadyRecorded(AttendanceRecord::at("ALICE", at(6, 8, 15, 0)))
        );
        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[test]
    fn test_missing_table_is_recreated_once() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger.conn.execute_batch("DROP TABLE attendance").unwrap();

        let outcome = ledger.record_attendance("ALICE", at(6, 9, 0, 0)).unwrap();
        assert!(outcome.is_new());
        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[test]
    fn test_deleted_store_is_recreated_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        let mut ledger = Ledger::open(&path).unwrap();
        ledger.record_attendance("ALICE", at(6, 9, 0, 0)).unwrap();

        std::fs::remove_file(&path).unwrap();
        let outcome = ledger.record_attendance("BOB", at(6, 9, 5, 0)).unwrap();
        assert!(matches!(outcome, RecordOutcome::Recorded(_)));
        assert!(path.exists());
        drop(ledger);

        let reopened = Ledger::open(&path).unwrap();
        let names: Vec<String> = reopened.records().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["BOB"]);
    }

    #[test]
    fn test_moved_store_error_is_recognized() {
        let moved = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(READONLY_DBMOVED),
            Some("attempt to write a readonly database".into()),
        );
        assert!(needs_reopen(&moved));

        let plain_read_only = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_READONLY),
            Some("attempt to write a readonly database".into()),
        );
        assert!(!needs_reopen(&plain_read_only));
    }

    #[test]
    fn test_missing_table_error_is_recognized() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.conn.execute_batch("DROP TABLE attendance").unwrap();
        let err = ledger.len().unwrap_err();
        match err {
            LedgerError::Sqlite(e) => assert!(is_missing_table(&e)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_only_open_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/attendance.db");
        assert!(Ledger::open_read_only(&path).is_err());
        assert!(!path.exists());
        assert!(!dir.path().join("nested").exists());
    }

    #[test]
    fn test_read_only_open_reads_but_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        Ledger::open(&path)
            .unwrap()
            .record_attendance("ALICE", at(6, 9, 0, 0))
            .unwrap();

        let mut ledger = Ledger::open_read_only(&path).unwrap();
        assert_eq!(ledger.len().unwrap(), 1);
        let err = ledger.record_attendance("BOB", at(6, 9, 0, 0)).unwrap_err();
        assert!(matches!(err, LedgerError::Sqlite(_)));
        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[test]
    fn test_write_failure_propagates() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger.conn.execute_batch("PRAGMA query_only = ON").unwrap();

        let err = ledger.record_attendance("ALICE", at(6, 9, 0, 0)).unwrap_err();
        assert!(matches!(err, LedgerError::Sqlite(_)));
    }

    #[test]
    fn test_unique_constraint_rejects_duplicate_day() {
        let ledger = Ledger::open_in_memory().unwrap();
        let insert = r#"INSERT INTO attendance ("Name", "Date", "Time")
                        VALUES ('ALICE', '2024-05-06', '09:00:00')"#;
        ledger.conn.execute(insert, []).unwrap();
        assert!(ledger.conn.execute(insert, []).is_err());
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger
            .conn
            .execute(
                r#"INSERT INTO attendance ("Name", "Date", "Time")
                   VALUES ('ALICE', 'yesterday', '09:00:00')"#,
                [],
            )
            .unwrap();
        assert!(matches!(ledger.records(), Err(LedgerError::Corrupt(_))));
    }
}
