//! Attendance persistence: token check-in and manual batch marks.

use chrono::{DateTime, Local, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use roll_core::{
    AttendanceKey, AttendanceRecord, CallerContext, CheckInError, CourseId, ErrorKind, MarkEntry,
    MarkOutcome, SessionToken, TokenBinding, TokenCheckIn, UserId, plan_token_check_in,
};

use crate::{
    Database, DbError, course_exists, format_date, format_timestamp, is_member, parse_column,
    parse_timestamp,
};

const ATTENDANCE_COLUMNS: &str =
    "participant_id, course_id, date, status, checked_in_at, method, token, recorded_by";

#[derive(Debug)]
struct AttendanceRow {
    participant_id: String,
    course_id: String,
    date: String,
    status: String,
    checked_in_at: String,
    method: String,
    token: Option<String>,
    recorded_by: String,
}

impl AttendanceRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            participant_id: row.get(0)?,
            course_id: row.get(1)?,
            date: row.get(2)?,
            status: row.get(3)?,
            checked_in_at: row.get(4)?,
            method: row.get(5)?,
            token: row.get(6)?,
            recorded_by: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<AttendanceRecord, DbError> {
        let date: NaiveDate = parse_column(self.date, "attendance", "date")?;
        Ok(AttendanceRecord {
            key: AttendanceKey {
                participant: parse_column(self.participant_id, "attendance", "participant_id")?,
                course: parse_column(self.course_id, "attendance", "course_id")?,
                date,
            },
            status: parse_column(self.status, "attendance", "status")?,
            checked_in_at: parse_timestamp(&self.checked_in_at, "attendance")?,
            method: parse_column(self.method, "attendance", "method")?,
            token: self
                .token
                .map(|token| {
                    SessionToken::parse(&token).map_err(|_| DbError::InvalidRow {
                        table: "attendance",
                        column: "token",
                        value: token,
                    })
                })
                .transpose()?,
            recorded_by: parse_column(self.recorded_by, "attendance", "recorded_by")?,
        })
    }
}

fn load_record(conn: &Connection, key: &AttendanceKey) -> Result<Option<AttendanceRecord>, DbError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE participant_id = ? AND course_id = ? AND date = ?"
            ),
            params![
                key.participant.as_str(),
                key.course.as_str(),
                format_date(key.date)
            ],
            AttendanceRow::read,
        )
        .optional()?;
    row.map(AttendanceRow::into_record).transpose()
}

fn insert_record(conn: &Connection, record: &AttendanceRecord) -> rusqlite::Result<usize> {
    conn.execute(
        &format!("INSERT INTO attendance ({ATTENDANCE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"),
        params![
            record.key.participant.as_str(),
            record.key.course.as_str(),
            format_date(record.key.date),
            record.status.as_str(),
            format_timestamp(record.checked_in_at),
            record.method.as_str(),
            record.token.as_ref().map(SessionToken::as_str),
            record.recorded_by.as_str(),
        ],
    )
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn local_date(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Local).date_naive()
}

impl Database {
    /// Checks `participant` in with a validated token, dated today (server-local).
    pub fn check_in_by_token(
        &mut self,
        participant: &UserId,
        binding: &TokenBinding,
        token: &SessionToken,
    ) -> Result<AttendanceRecord, DbError> {
        let now = Utc::now();
        self.check_in_by_token_at(participant, binding, token, now, local_date(now))
    }

    /// Token check-in at an explicit instant and calendar date.
    ///
    /// The membership check, the read of the current record and the write all
    /// happen inside one immediate transaction, so two concurrent check-ins for
    /// the same key resolve to one `present` record and one
    /// [`CheckInError::AlreadyCheckedIn`].
    pub fn check_in_by_token_at(
        &mut self,
        participant: &UserId,
        binding: &TokenBinding,
        token: &SessionToken,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<AttendanceRecord, DbError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !is_member(&tx, &binding.group, participant)? {
            tracing::warn!(participant = %participant, group = %binding.group, "check-in refused: not enrolled");
            return Err(CheckInError::NotEnrolled {
                participant: participant.clone(),
                group: binding.group.clone(),
            }
            .into());
        }
        if !course_exists(&tx, &binding.course)? {
            return Err(DbError::not_found("course", &binding.course));
        }

        let key = AttendanceKey {
            participant: participant.clone(),
            course: binding.course.clone(),
            date: today,
        };
        let existing = load_record(&tx, &key)?;
        let transition = plan_token_check_in(&key, existing.as_ref())?;
        let record = AttendanceRecord::from_token_check_in(key.clone(), binding, token, now);

        match transition {
            TokenCheckIn::Create => match insert_record(&tx, &record) {
                Ok(_) => {}
                Err(err) if is_primary_key_violation(&err) => {
                    return Err(CheckInError::AlreadyCheckedIn { key }.into());
                }
                Err(err) => return Err(err.into()),
            },
            TokenCheckIn::Upgrade { .. } => {
                let updated = tx.execute(
                    "
                    UPDATE attendance
                    SET status = 'present', checked_in_at = ?, method = 'token', token = ?, recorded_by = ?
                    WHERE participant_id = ? AND course_id = ? AND date = ? AND status != 'present'
                    ",
                    params![
                        format_timestamp(now),
                        token.as_str(),
                        binding.issuer.as_str(),
                        key.participant.as_str(),
                        key.course.as_str(),
                        format_date(key.date),
                    ],
                )?;
                if updated == 0 {
                    return Err(CheckInError::AlreadyCheckedIn { key }.into());
                }
            }
        }
        tx.commit()?;

        let upgraded_from = match transition {
            TokenCheckIn::Create => None,
            TokenCheckIn::Upgrade { from } => Some(from.as_str()),
        };
        tracing::info!(
            participant = %record.key.participant,
            course = %record.key.course,
            date = %record.key.date,
            token = token.short(),
            upgraded_from,
            "token check-in recorded"
        );
        Ok(record)
    }

    /// Applies manual marks, stamped with the current time.
    pub fn mark_batch(
        &mut self,
        ctx: &CallerContext,
        entries: &[MarkEntry],
    ) -> Result<Vec<Result<MarkOutcome, DbError>>, DbError> {
        self.mark_batch_at(ctx, entries, Utc::now())
    }

    /// Upserts one record per entry.
    ///
    /// Each entry succeeds or fails on its own (unknown course, caller not
    /// allowed to mark that course). A storage failure aborts the whole batch
    /// and nothing is written.
    pub fn mark_batch_at(
        &mut self,
        ctx: &CallerContext,
        entries: &[MarkEntry],
        now: DateTime<Utc>,
    ) -> Result<Vec<Result<MarkOutcome, DbError>>, DbError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            match mark_one(&tx, ctx, entry, now) {
                Err(err) if err.kind() == ErrorKind::Infrastructure => return Err(err),
                result => results.push(result),
            }
        }
        tx.commit()?;
        let applied = results.iter().filter(|result| result.is_ok()).count();
        tracing::info!(applied, rejected = results.len() - applied, recorder = %ctx.user, "attendance batch applied");
        Ok(results)
    }

    /// The record for one key, if any.
    pub fn attendance_record(&self, key: &AttendanceKey) -> Result<Option<AttendanceRecord>, DbError> {
        load_record(&self.conn, key)
    }

    /// All records for a course on a date, ordered by participant.
    pub fn attendance_for(
        &self,
        course: &CourseId,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT {ATTENDANCE_COLUMNS} FROM attendance
            WHERE course_id = ? AND date = ?
            ORDER BY participant_id ASC
            "
        ))?;
        let rows = stmt.query_map(
            params![course.as_str(), format_date(date)],
            AttendanceRow::read,
        )?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

fn mark_one(
    conn: &Connection,
    ctx: &CallerContext,
    entry: &MarkEntry,
    now: DateTime<Utc>,
) -> Result<MarkOutcome, DbError> {
    ctx.authorize_mark(&entry.course)?;
    if !course_exists(conn, &entry.course)? {
        return Err(DbError::not_found("course", &entry.course));
    }
    let key = entry.key();
    let existed = load_record(conn, &key)?.is_some();
    let record = AttendanceRecord::from_manual_mark(key, entry.status, &ctx.user, now);
    conn.execute(
        &format!(
            "
            INSERT INTO attendance ({ATTENDANCE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(participant_id, course_id, date) DO UPDATE SET
                status = excluded.status,
                checked_in_at = excluded.checked_in_at,
                method = excluded.method,
                token = NULL,
                recorded_by = excluded.recorded_by
            "
        ),
        params![
            record.key.participant.as_str(),
            record.key.course.as_str(),
            format_date(record.key.date),
            record.status.as_str(),
            format_timestamp(record.checked_in_at),
            record.method.as_str(),
            Option::<&str>::None,
            record.recorded_by.as_str(),
        ],
    )?;
    Ok(MarkOutcome {
        key: record.key,
        status: record.status,
        created: !existed,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use roll_core::{
        AttendanceStatus, CheckInMethod, Clock, GroupId, ManualClock, Role, SessionTokenStore,
    };

    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-03T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
    }

    fn id(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    fn course() -> CourseId {
        CourseId::new("C1").unwrap()
    }

    fn seeded(db: &mut Database) {
        let group = GroupId::new("G1").unwrap();
        db.upsert_course(&course(), "Compilers", &id("T1")).unwrap();
        db.add_group(&group, "First years").unwrap();
        db.add_group_member(&group, &id("P1")).unwrap();
    }

    fn binding() -> TokenBinding {
        TokenBinding {
            course: course(),
            group: GroupId::new("G1").unwrap(),
            issuer: id("T1"),
        }
    }

    fn token() -> SessionToken {
        SessionToken::parse(&"5e".repeat(32)).unwrap()
    }

    fn presenter() -> CallerContext {
        CallerContext::new(id("T1"), Role::Presenter).with_courses([course()])
    }

    fn entry(participant: &str, course: &str, status: AttendanceStatus) -> MarkEntry {
        MarkEntry {
            participant: id(participant),
            course: CourseId::new(course).unwrap(),
            date: today(),
            status,
        }
    }

    #[test]
    fn token_scenario_present_then_already_checked_in_then_not_enrolled() {
        let mut db = Database::open_in_memory().unwrap();
        seeded(&mut db);
        let clock = Arc::new(ManualClock::new(t0()));
        let store = SessionTokenStore::new(clock.clone());
        let issued = store
            .issue(course(), GroupId::new("G1").unwrap(), id("T1"), Duration::minutes(15))
            .unwrap();

        clock.advance(Duration::minutes(5));
        let binding = store.validate(&issued.token).unwrap();
        let record = db
            .check_in_by_token_at(&id("P1"), &binding, &issued.token, clock.now(), today())
            .unwrap();
        assert_eq!(record.status, AttendanceStatus::Present);
        assert_eq!(record.method, CheckInMethod::Token);

        clock.advance(Duration::minutes(5));
        let binding = store.validate(&issued.token).unwrap();
        let err = db
            .check_in_by_token_at(&id("P1"), &binding, &issued.token, clock.now(), today())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyCheckedIn);

        let err = db
            .check_in_by_token_at(&id("P2"), &binding, &issued.token, clock.now(), today())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEnrolled);

        let stored = db.attendance_for(&course(), today()).unwrap();
        assert_eq!(stored, vec![record]);
    }

    #[test]
    fn token_check_in_upgrades_manual_absent() {
        let mut db = Database::open_in_memory().unwrap();
        seeded(&mut db);
        db.mark_batch_at(&presenter(), &[entry("P1", "C1", AttendanceStatus::Absent)], t0())
            .unwrap();

        let later = t0() + Duration::minutes(20);
        let record = db
            .check_in_by_token_at(&id("P1"), &binding(), &token(), later, today())
            .unwrap();
        assert_eq!(record.status, AttendanceStatus::Present);

        let stored = db.attendance_record(&record.key).unwrap().unwrap();
        assert_eq!(stored.method, CheckInMethod::Token);
        assert_eq!(stored.checked_in_at, later);
        assert_eq!(stored.token, Some(token()));
        assert_eq!(db.counts().unwrap().attendance, 1);
    }

    #[test]
    fn unknown_course_on_check_in_is_not_found() {
        let mut db = Database::open_in_memory().unwrap();
        seeded(&mut db);
        let mut binding = binding();
        binding.course = CourseId::new("C404").unwrap();
        let err = db
            .check_in_by_token_at(&id("P1"), &binding, &token(), t0(), today())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn batch_upserts_and_reports_per_entry() {
        let mut db = Database::open_in_memory().unwrap();
        seeded(&mut db);
        let batch = [
            entry("P1", "C1", AttendanceStatus::Present),
            entry("P2", "C1", AttendanceStatus::Late),
            entry("P3", "C404", AttendanceStatus::Absent),
        ];
        let results = db.mark_batch_at(&presenter(), &batch, t0()).unwrap();
        assert!(results[0].as_ref().unwrap().created);
        assert!(results[1].as_ref().unwrap().created);
        assert_eq!(results[2].as_ref().unwrap_err().kind(), ErrorKind::Forbidden);

        let corrected = [entry("P1", "C1", AttendanceStatus::Excused)];
        let results = db.mark_batch_at(&presenter(), &corrected, t0()).unwrap();
        let outcome = results[0].as_ref().unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.status, AttendanceStatus::Excused);

        let stored = db.attendance_for(&course(), today()).unwrap();
        let statuses: Vec<(&str, AttendanceStatus)> = stored
            .iter()
            .map(|r| (r.key.participant.as_str(), r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![("P1", AttendanceStatus::Excused), ("P2", AttendanceStatus::Late)]
        );
    }

    #[test]
    fn authority_batch_on_unknown_course_is_not_found() {
        let mut db = Database::open_in_memory().unwrap();
        seeded(&mut db);
        let authority = CallerContext::new(id("A1"), Role::Authority);
        let results = db
            .mark_batch_at(&authority, &[entry("P1", "C404", AttendanceStatus::Present)], t0())
            .unwrap();
        assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(db.counts().unwrap().attendance, 0);
    }

    #[test]
    fn manual_mark_can_demote_present() {
        let mut db = Database::open_in_memory().unwrap();
        seeded(&mut db);
        db.check_in_by_token_at(&id("P1"), &binding(), &token(), t0(), today())
            .unwrap();
        db.mark_batch_at(&presenter(), &[entry("P1", "C1", AttendanceStatus::Late)], t0())
            .unwrap();
        let key = entry("P1", "C1", AttendanceStatus::Late).key();
        let stored = db.attendance_record(&key).unwrap().unwrap();
        assert_eq!(stored.status, AttendanceStatus::Late);
        assert_eq!(stored.method, CheckInMethod::Manual);
        assert_eq!(stored.token, None);

        let record = db
            .check_in_by_token_at(&id("P1"), &binding(), &token(), t0(), today())
            .unwrap();
        assert_eq!(record.status, AttendanceStatus::Present);
    }

    #[test]
    fn concurrent_check_ins_leave_one_record() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("rollcall.db");
        let mut db = Database::open(&path).unwrap();
        seeded(&mut db);

        let results: Vec<Result<AttendanceRecord, DbError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let path = path.clone();
                    scope.spawn(move || {
                        let mut db = Database::open(&path).unwrap();
                        db.check_in_by_token_at(&id("P1"), &binding(), &token(), t0(), today())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(err.kind(), ErrorKind::AlreadyCheckedIn);

        let stored = db.attendance_for(&course(), today()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, AttendanceStatus::Present);
    }
}
