//! Timetable commands: conflict-checked slot writes, listing and audit.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;

use roll_core::{CallerContext, ConflictPair, ReservationSlot, TimeRange};
use roll_db::{Database, NewSlot, SlotChanges};

use super::util::write_json;
use crate::{SlotAction, SlotAddArgs, SlotEditArgs};

pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    ctx: &CallerContext,
    action: &SlotAction,
) -> Result<()> {
    match action {
        SlotAction::Add(args) => {
            let slot = db.create_slot(ctx, new_slot(args)?)?;
            writeln!(writer, "Reserved {}", describe(&slot))?;
        }
        SlotAction::Edit(args) => {
            let slot = db.update_slot(ctx, &args.id, changes(args))?;
            writeln!(writer, "Updated {}", describe(&slot))?;
        }
        SlotAction::Delete { id } => {
            db.delete_slot(ctx, id)?;
            writeln!(writer, "Deleted {id}")?;
        }
        SlotAction::List { json } => {
            let slots = db.list_slots()?;
            if *json {
                write_json(writer, &slots)?;
            } else {
                write!(writer, "{}", format_slots(&slots))?;
            }
        }
        SlotAction::Audit { json } => {
            let pairs = db.audit_slots()?;
            if *json {
                write_json(writer, &pairs)?;
            } else {
                write!(writer, "{}", format_audit(&pairs))?;
            }
        }
    }
    Ok(())
}

fn new_slot(args: &SlotAddArgs) -> Result<NewSlot> {
    Ok(NewSlot {
        group: args.group.clone(),
        presenter: args.presenter.clone(),
        room: args.room.clone(),
        day: args.day,
        time: TimeRange::new(args.start, args.end)?,
        subject: args.subject.clone(),
        semester: args.semester.clone(),
        academic_year: args.academic_year.clone(),
    })
}

fn changes(args: &SlotEditArgs) -> SlotChanges {
    SlotChanges {
        group: args.group.clone(),
        presenter: args.presenter.clone(),
        room: args.room.clone(),
        day: args.day,
        start: args.start,
        end: args.end,
        subject: args.subject.clone(),
        semester: args.semester.clone(),
        academic_year: args.academic_year.clone(),
    }
}

fn describe(slot: &ReservationSlot) -> String {
    format!(
        "{}: {} {} group {} presenter {} room {}",
        slot.id, slot.day, slot.time, slot.group, slot.presenter, slot.room
    )
}

/// Format slots as a table.
pub fn format_slots(slots: &[ReservationSlot]) -> String {
    let mut output = String::new();
    if slots.is_empty() {
        output.push_str("No slots reserved.\n");
        return output;
    }

    let _ = writeln!(
        output,
        "{:<36}  {:<9}  {:<11}  {:<8}  {:<9}  {:<6}  Subject",
        "ID", "Day", "Time", "Group", "Presenter", "Room"
    );
    for slot in slots {
        let _ = writeln!(
            output,
            "{:<36}  {:<9}  {:<11}  {:<8}  {:<9}  {:<6}  {}",
            slot.id,
            slot.day.as_str(),
            slot.time.to_string(),
            slot.group.as_str(),
            slot.presenter.as_str(),
            slot.room.as_str(),
            slot.subject
        );
    }
    output
}

/// Format audit findings, one colliding pair per line.
pub fn format_audit(pairs: &[ConflictPair]) -> String {
    let mut output = String::new();
    if pairs.is_empty() {
        output.push_str("No conflicts.\n");
        return output;
    }
    for pair in pairs {
        let shared: Vec<String> = pair.shared.iter().map(ToString::to_string).collect();
        let _ = writeln!(
            output,
            "{} <-> {} on {}: shares {}",
            pair.first,
            pair.second,
            pair.day,
            shared.join(", ")
        );
    }
    let _ = writeln!(output, "{} conflicting pair(s)", pairs.len());
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;
    use roll_core::{ErrorKind, GroupId, Resource, Role, RoomId, SlotId, UserId, Weekday};

    use crate::commands::util::error_kind;

    fn authority() -> CallerContext {
        CallerContext::new(UserId::new("A1").unwrap(), Role::Authority)
    }

    fn seeded() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        db.add_group(&GroupId::new("G1").unwrap(), "First years").unwrap();
        db.add_group(&GroupId::new("G2").unwrap(), "Second years").unwrap();
        db
    }

    fn add_args(group: &str, room: &str, start: &str, end: &str) -> SlotAddArgs {
        SlotAddArgs {
            group: GroupId::new(group).unwrap(),
            presenter: UserId::new("T1").unwrap(),
            room: RoomId::new(room).unwrap(),
            day: Weekday::Monday,
            start: start.parse().unwrap(),
            end: end.parse().unwrap(),
            subject: "Compilers".to_string(),
            semester: String::new(),
            academic_year: String::new(),
        }
    }

    #[test]
    fn shared_presenter_is_rejected() {
        let mut db = seeded();
        let mut output = Vec::new();
        run(
            &mut output,
            &mut db,
            &authority(),
            &SlotAction::Add(add_args("G1", "R1", "08:00", "09:30")),
        )
        .unwrap();

        let err = run(
            &mut output,
            &mut db,
            &authority(),
            &SlotAction::Add(add_args("G2", "R2", "09:00", "10:00")),
        )
        .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::ScheduleConflict));

        run(
            &mut output,
            &mut db,
            &authority(),
            &SlotAction::Add(add_args("G2", "R2", "09:30", "10:30")),
        )
        .unwrap();
        assert_eq!(db.list_slots().unwrap().len(), 2);
    }

    #[test]
    fn inverted_range_is_a_time_window_error() {
        let mut db = seeded();
        let err = run(
            &mut Vec::new(),
            &mut db,
            &authority(),
            &SlotAction::Add(add_args("G1", "R1", "10:00", "09:00")),
        )
        .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidTimeWindow));
    }

    #[test]
    fn list_table_format() {
        let slot = ReservationSlot {
            id: SlotId::new("0b8c6a52-6f1e-4c55-9d3e-0d2f4b7a1c11").unwrap(),
            group: GroupId::new("G1").unwrap(),
            presenter: UserId::new("T1").unwrap(),
            room: RoomId::new("R1").unwrap(),
            day: Weekday::Monday,
            time: TimeRange::parse("08:00", "09:30").unwrap(),
            subject: "Compilers".to_string(),
            semester: String::new(),
            academic_year: String::new(),
        };
        assert_snapshot!(format_slots(&[slot]), @r"
        ID                                    Day        Time         Group     Presenter  Room    Subject
        0b8c6a52-6f1e-4c55-9d3e-0d2f4b7a1c11  monday     08:00-09:30  G1        T1         R1      Compilers
        ");
        assert_eq!(format_slots(&[]), "No slots reserved.\n");
    }

    #[test]
    fn audit_format() {
        let pair = ConflictPair {
            first: SlotId::new("s-1").unwrap(),
            second: SlotId::new("s-2").unwrap(),
            day: Weekday::Monday,
            shared: vec![Resource::Presenter, Resource::Room],
        };
        assert_snapshot!(format_audit(&[pair]), @r"
        s-1 <-> s-2 on monday: shares presenter, room
        1 conflicting pair(s)
        ");
        assert_eq!(format_audit(&[]), "No conflicts.\n");
    }
}
