//! Manual attendance marking and listing.

use std::fmt::Write as _;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, SecondsFormat};
use serde::Deserialize;

use roll_core::{AttendanceRecord, AttendanceStatus, CallerContext, CourseId, MarkEntry, UserId};
use roll_db::Database;

use super::util::{render_error, write_json};

/// One JSON line of a marking batch.
#[derive(Debug, Deserialize)]
struct MarkLine {
    participant: UserId,
    course: CourseId,
    date: NaiveDate,
    status: String,
}

fn parse_marks<R: BufRead>(reader: R) -> Result<Vec<MarkEntry>> {
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed: MarkLine = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON on line {}", idx + 1))?;
        let status: AttendanceStatus = parsed
            .status
            .parse()
            .with_context(|| format!("invalid mark on line {}", idx + 1))?;
        entries.push(MarkEntry {
            participant: parsed.participant,
            course: parsed.course,
            date: parsed.date,
            status,
        });
    }
    Ok(entries)
}

/// Applies a batch of marks read from `reader` and reports each outcome.
///
/// A malformed line rejects the whole batch before anything is written.
pub fn mark<R: BufRead, W: Write>(
    reader: R,
    writer: &mut W,
    db: &mut Database,
    ctx: &CallerContext,
) -> Result<()> {
    let entries = parse_marks(reader)?;
    let results = db.mark_batch(ctx, &entries)?;

    let mut applied = 0;
    for (entry, result) in entries.iter().zip(results) {
        let label = format!("{} {} {}", entry.participant, entry.course, entry.date);
        match result {
            Ok(outcome) => {
                applied += 1;
                let verb = if outcome.created { "recorded" } else { "updated" };
                writeln!(writer, "{label}: {} ({verb})", outcome.status)?;
            }
            Err(err) => {
                writeln!(writer, "{label}: {}", render_error(&err.into()))?;
            }
        }
    }
    writeln!(writer, "Applied {applied} of {} mark(s)", entries.len())?;
    Ok(())
}

/// Lists a course's records for one day. Reading needs the same rights as marking.
pub fn list<W: Write>(
    writer: &mut W,
    db: &Database,
    ctx: &CallerContext,
    course: &CourseId,
    date: Option<NaiveDate>,
    json: bool,
) -> Result<()> {
    ctx.authorize_mark(course)?;
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let records = db.attendance_for(course, date)?;
    if json {
        write_json(writer, &records)?;
    } else {
        write!(writer, "{}", format_records(course, date, &records))?;
    }
    Ok(())
}

/// Format records as a table.
pub fn format_records(course: &CourseId, date: NaiveDate, records: &[AttendanceRecord]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Attendance for {course} on {date}");
    if records.is_empty() {
        output.push_str("No records.\n");
        return output;
    }
    for record in records {
        let _ = writeln!(
            output,
            "{:<10}  {:<8}  {:<6}  {}  by {}",
            record.key.participant.as_str(),
            record.status.as_str(),
            record.method.as_str(),
            record.checked_in_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            record.recorded_by
        );
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;
    use roll_core::{ErrorKind, Role};

    use crate::commands::util::error_kind;

    fn presenter() -> CallerContext {
        CallerContext::new(UserId::new("T1").unwrap(), Role::Presenter)
            .with_courses([CourseId::new("C1").unwrap()])
    }

    fn seeded() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_course(
            &CourseId::new("C1").unwrap(),
            "Compilers",
            &UserId::new("T1").unwrap(),
        )
        .unwrap();
        db
    }

    #[test]
    fn mark_reports_each_entry() {
        let mut db = seeded();
        let input = r#"
{"participant":"P1","course":"C1","date":"2025-03-03","status":"present"}
{"participant":"P2","course":"C1","date":"2025-03-03","status":"late"}
{"participant":"P3","course":"C9","date":"2025-03-03","status":"absent"}
{"participant":"P1","course":"C1","date":"2025-03-03","status":"excused"}
"#;
        let mut output = Vec::new();
        mark(input.as_bytes(), &mut output, &mut db, &presenter()).unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        P1 C1 2025-03-03: present (recorded)
        P2 C1 2025-03-03: late (recorded)
        P3 C9 2025-03-03: error [forbidden]: T1 (presenter) may not mark attendance for C9
        P1 C1 2025-03-03: excused (updated)
        Applied 3 of 4 mark(s)
        ");
    }

    #[test]
    fn unknown_status_rejects_batch() {
        let mut db = seeded();
        let input = concat!(
            r#"{"participant":"P1","course":"C1","date":"2025-03-03","status":"present"}"#,
            "\n",
            r#"{"participant":"P2","course":"C1","date":"2025-03-03","status":"maybe"}"#,
        );
        let err = mark(input.as_bytes(), &mut Vec::new(), &mut db, &presenter()).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidInput));
        assert!(err.to_string().contains("line 2"));
        assert_eq!(db.counts().unwrap().attendance, 0);
    }

    #[test]
    fn list_after_marks() {
        let mut db = seeded();
        let input = r#"{"participant":"P2","course":"C1","date":"2025-03-03","status":"absent"}"#;
        mark(input.as_bytes(), &mut Vec::new(), &mut db, &presenter()).unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let records = db.attendance_for(&CourseId::new("C1").unwrap(), date).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AttendanceStatus::Absent);

        let mut output = Vec::new();
        list(&mut output, &db, &presenter(), &CourseId::new("C1").unwrap(), Some(date), false)
            .unwrap();
        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("Attendance for C1 on 2025-03-03\nP2          absent    manual  "));
        assert!(output.trim_end().ends_with("by T1"));
    }

    #[test]
    fn list_requires_course_rights() {
        let db = seeded();
        let course = CourseId::new("C1").unwrap();
        let participant = CallerContext::new(UserId::new("P1").unwrap(), Role::Participant);
        let err = list(&mut Vec::new(), &db, &participant, &course, None, false).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Forbidden));

        let stranger = CallerContext::new(UserId::new("T2").unwrap(), Role::Presenter);
        let err = list(&mut Vec::new(), &db, &stranger, &course, None, true).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Forbidden));

        let authority = CallerContext::new(UserId::new("A1").unwrap(), Role::Authority);
        let mut output = Vec::new();
        list(&mut output, &db, &authority, &course, None, true).unwrap();
        assert_eq!(String::from_utf8(output).unwrap().trim(), "[]");
    }

    #[test]
    fn empty_list_format() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        assert_snapshot!(format_records(&CourseId::new("C1").unwrap(), date, &[]), @r"
        Attendance for C1 on 2025-03-03
        No records.
        ");
    }
}
