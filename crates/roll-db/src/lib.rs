//! Record store for rollcall.
//!
//! Provides persistence for courses, groups, reservation slots, attendance and
//! notification preferences using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Request handlers running on different threads should each open their own
//! `Database` on the same file. Writes that must observe a consistent snapshot
//! (slot insert/update, token check-in, batch marks) run in `BEGIN IMMEDIATE`
//! transactions, which SQLite serializes across connections; the connection's
//! busy timeout makes concurrent writers wait rather than fail.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond precision
//! (e.g., `2025-03-03T08:05:00.000Z`). Calendar dates are stored as `YYYY-MM-DD`.
//!
//! ## Uniqueness
//!
//! - `attendance` is keyed by `(participant_id, course_id, date)`, so a second
//!   record for the same participant, course and day cannot be inserted.
//! - Reservation slots store `start_minute`/`end_minute` as minutes since
//!   midnight with `CHECK (start_minute < end_minute)`.

mod attendance;
mod schedule;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use roll_core::{
    CheckInError, CourseId, ErrorKind, Forbidden, GroupId, QuietWindow, SlotId, UserId,
    ValidationError,
};

pub use schedule::{NewSlot, SlotChanges};

/// How long a connection waits for another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    /// Input failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Token check-in was refused.
    #[error(transparent)]
    CheckIn(#[from] CheckInError),
    /// The caller's role does not permit the operation.
    #[error(transparent)]
    Forbidden(#[from] Forbidden),
    /// A reservation collides with existing slots.
    #[error("scheduling conflict with {}", join_ids(.conflicting))]
    ScheduleConflict { conflicting: Vec<SlotId> },
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp in {table}: {timestamp}")]
    TimestampParse {
        table: &'static str,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored value no longer parses as its domain type.
    #[error("invalid value in {table}.{column}: {value}")]
    InvalidRow {
        table: &'static str,
        column: &'static str,
        value: String,
    },
}

impl DbError {
    /// Classifies this error for callers.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(err) => err.kind(),
            Self::CheckIn(err) => err.kind(),
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::ScheduleConflict { .. } => ErrorKind::ScheduleConflict,
            Self::Sqlite(_) | Self::TimestampParse { .. } | Self::InvalidRow { .. } => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// A [`DbError::NotFound`] for `entity` with the given id.
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

fn join_ids(ids: &[SlotId]) -> String {
    ids.iter()
        .map(SlotId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// Row counts per table, for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub courses: i64,
    pub groups: i64,
    pub members: i64,
    pub slots: i64,
    pub attendance: i64,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS courses (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                presenter_id TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_courses_presenter ON courses(presenter_id);

            CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                PRIMARY KEY (group_id, participant_id),
                FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
            );

            -- Weekly reservations. start/end are minutes since midnight.
            CREATE TABLE IF NOT EXISTS reservation_slots (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                presenter_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                day TEXT NOT NULL,
                start_minute INTEGER NOT NULL,
                end_minute INTEGER NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                semester TEXT NOT NULL DEFAULT '',
                academic_year TEXT NOT NULL DEFAULT '',
                CHECK (start_minute < end_minute),
                FOREIGN KEY (group_id) REFERENCES groups(id)
            );

            CREATE INDEX IF NOT EXISTS idx_slots_day_group ON reservation_slots(day, group_id);
            CREATE INDEX IF NOT EXISTS idx_slots_day_presenter ON reservation_slots(day, presenter_id);
            CREATE INDEX IF NOT EXISTS idx_slots_day_room ON reservation_slots(day, room_id);

            -- One row per (participant, course, date).
            CREATE TABLE IF NOT EXISTS attendance (
                participant_id TEXT NOT NULL,
                course_id TEXT NOT NULL,
                date TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('present', 'absent', 'late', 'excused')),
                checked_in_at TEXT NOT NULL,
                method TEXT NOT NULL CHECK (method IN ('manual', 'token')),
                token TEXT,
                recorded_by TEXT NOT NULL,
                PRIMARY KEY (participant_id, course_id, date),
                FOREIGN KEY (course_id) REFERENCES courses(id)
            );

            CREATE INDEX IF NOT EXISTS idx_attendance_course_date ON attendance(course_id, date);

            CREATE TABLE IF NOT EXISTS notification_prefs (
                participant_id TEXT PRIMARY KEY,
                quiet_start TEXT NOT NULL,
                quiet_end TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Adds or renames a course.
    pub fn upsert_course(
        &mut self,
        id: &CourseId,
        name: &str,
        presenter: &UserId,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO courses (id, name, presenter_id) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, presenter_id = excluded.presenter_id
            ",
            params![id.as_str(), name, presenter.as_str()],
        )?;
        Ok(())
    }

    /// Lists the courses a presenter runs.
    pub fn courses_presented_by(&self, presenter: &UserId) -> Result<Vec<CourseId>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM courses WHERE presenter_id = ? ORDER BY id ASC")?;
        let rows = stmt.query_map([presenter.as_str()], |row| row.get::<_, String>(0))?;
        let mut courses = Vec::new();
        for row in rows {
            courses.push(parse_column(row?, "courses", "id")?);
        }
        Ok(courses)
    }

    /// Whether a course with this id exists.
    pub fn has_course(&self, id: &CourseId) -> Result<bool, DbError> {
        course_exists(&self.conn, id)
    }

    /// Whether a group with this id exists.
    pub fn has_group(&self, id: &GroupId) -> Result<bool, DbError> {
        group_exists(&self.conn, id)
    }

    /// Adds a group, ignoring duplicates.
    pub fn add_group(&mut self, id: &GroupId, name: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO groups (id, name) VALUES (?, ?)",
            params![id.as_str(), name],
        )?;
        Ok(())
    }

    /// Enrolls a participant in a group, ignoring duplicates.
    pub fn add_group_member(&mut self, group: &GroupId, participant: &UserId) -> Result<(), DbError> {
        if !group_exists(&self.conn, group)? {
            return Err(DbError::not_found("group", group));
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO group_members (group_id, participant_id) VALUES (?, ?)",
            params![group.as_str(), participant.as_str()],
        )?;
        Ok(())
    }

    /// Whether `participant` belongs to `group`.
    pub fn is_group_member(&self, group: &GroupId, participant: &UserId) -> Result<bool, DbError> {
        is_member(&self.conn, group, participant)
    }

    /// Stores a participant's quiet-hours preference, replacing any previous one.
    pub fn set_quiet_hours(
        &mut self,
        participant: &UserId,
        window: &QuietWindow,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO notification_prefs (participant_id, quiet_start, quiet_end) VALUES (?, ?, ?)
            ON CONFLICT(participant_id) DO UPDATE SET
                quiet_start = excluded.quiet_start,
                quiet_end = excluded.quiet_end
            ",
            params![
                participant.as_str(),
                window.start.to_string(),
                window.end.to_string()
            ],
        )?;
        Ok(())
    }

    /// A participant's quiet-hours window, if they set one.
    pub fn quiet_hours(&self, participant: &UserId) -> Result<Option<QuietWindow>, DbError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT quiet_start, quiet_end FROM notification_prefs WHERE participant_id = ?",
                [participant.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(start, end)| -> Result<QuietWindow, DbError> {
            Ok(QuietWindow::new(
                parse_column(start, "notification_prefs", "quiet_start")?,
                parse_column(end, "notification_prefs", "quiet_end")?,
            ))
        })
        .transpose()
    }

    /// Row counts for the main tables.
    pub fn counts(&self) -> Result<StoreCounts, DbError> {
        let count = |table: &str| -> Result<i64, DbError> {
            let n = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n)
        };
        Ok(StoreCounts {
            courses: count("courses")?,
            groups: count("groups")?,
            members: count("group_members")?,
            slots: count("reservation_slots")?,
            attendance: count("attendance")?,
        })
    }
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, DbError> {
    let found: Option<i64> = conn.query_row(sql, [id], |row| row.get(0)).optional()?;
    Ok(found.is_some())
}

fn course_exists(conn: &Connection, course: &CourseId) -> Result<bool, DbError> {
    exists(conn, "SELECT 1 FROM courses WHERE id = ?", course.as_str())
}

fn group_exists(conn: &Connection, group: &GroupId) -> Result<bool, DbError> {
    exists(conn, "SELECT 1 FROM groups WHERE id = ?", group.as_str())
}

fn is_member(conn: &Connection, group: &GroupId, participant: &UserId) -> Result<bool, DbError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM group_members WHERE group_id = ? AND participant_id = ?",
            params![group.as_str(), participant.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Parses a stored TEXT column into its domain type.
fn parse_column<T: FromStr>(
    value: String,
    table: &'static str,
    column: &'static str,
) -> Result<T, DbError> {
    value
        .parse()
        .map_err(|_| DbError::InvalidRow { table, column, value })
}

fn parse_timestamp(timestamp: &str, table: &'static str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            table,
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
