//! Reservation slots and conflict-checked timetable writes.
//!
//! Each insert or placement-changing update runs its conflict query, the
//! overlap predicate and the write inside one `BEGIN IMMEDIATE` transaction.
//! SQLite admits one such writer at a time, so two concurrent requests for the
//! same resource and time cannot both pass the check.

use rusqlite::{Connection, OptionalExtension, Params, Row, TransactionBehavior, params};
use serde::Deserialize;
use uuid::Uuid;

use roll_core::conflict;
use roll_core::{
    CallerContext, ConflictPair, GroupId, ReservationSlot, RoomId, SlotId, TimeOfDay, TimeRange,
    UserId, ValidationError, Weekday,
};

use crate::{Database, DbError, group_exists, parse_column};

/// A slot to be created. The id is assigned on insert.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSlot {
    pub group: GroupId,
    pub presenter: UserId,
    pub room: RoomId,
    pub day: Weekday,
    #[serde(flatten)]
    pub time: TimeRange,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub semester: String,
    #[serde(default)]
    pub academic_year: String,
}

impl NewSlot {
    fn into_slot(self, id: SlotId) -> ReservationSlot {
        ReservationSlot {
            id,
            group: self.group,
            presenter: self.presenter,
            room: self.room,
            day: self.day,
            time: self.time,
            subject: self.subject,
            semester: self.semester,
            academic_year: self.academic_year,
        }
    }
}

/// Fields to change on an existing slot; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct SlotChanges {
    pub group: Option<GroupId>,
    pub presenter: Option<UserId>,
    pub room: Option<RoomId>,
    pub day: Option<Weekday>,
    pub start: Option<TimeOfDay>,
    pub end: Option<TimeOfDay>,
    pub subject: Option<String>,
    pub semester: Option<String>,
    pub academic_year: Option<String>,
}

impl SlotChanges {
    /// Whether the change can affect conflicts (day, time or a resource).
    pub const fn moves_slot(&self) -> bool {
        self.group.is_some()
            || self.presenter.is_some()
            || self.room.is_some()
            || self.day.is_some()
            || self.start.is_some()
            || self.end.is_some()
    }

    fn apply(self, slot: &mut ReservationSlot) -> Result<(), ValidationError> {
        let start = self.start.unwrap_or_else(|| slot.time.start());
        let end = self.end.unwrap_or_else(|| slot.time.end());
        slot.time = TimeRange::new(start, end)?;
        if let Some(group) = self.group {
            slot.group = group;
        }
        if let Some(presenter) = self.presenter {
            slot.presenter = presenter;
        }
        if let Some(room) = self.room {
            slot.room = room;
        }
        if let Some(day) = self.day {
            slot.day = day;
        }
        if let Some(subject) = self.subject {
            slot.subject = subject;
        }
        if let Some(semester) = self.semester {
            slot.semester = semester;
        }
        if let Some(academic_year) = self.academic_year {
            slot.academic_year = academic_year;
        }
        Ok(())
    }
}

const SLOT_COLUMNS: &str = "id, group_id, presenter_id, room_id, day, start_minute, end_minute, subject, semester, academic_year";

#[derive(Debug)]
struct SlotRow {
    id: String,
    group_id: String,
    presenter_id: String,
    room_id: String,
    day: String,
    start_minute: i64,
    end_minute: i64,
    subject: String,
    semester: String,
    academic_year: String,
}

impl SlotRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            group_id: row.get(1)?,
            presenter_id: row.get(2)?,
            room_id: row.get(3)?,
            day: row.get(4)?,
            start_minute: row.get(5)?,
            end_minute: row.get(6)?,
            subject: row.get(7)?,
            semester: row.get(8)?,
            academic_year: row.get(9)?,
        })
    }

    fn into_slot(self) -> Result<ReservationSlot, DbError> {
        let start = minute_column(self.start_minute, "start_minute")?;
        let end = minute_column(self.end_minute, "end_minute")?;
        let time = TimeRange::new(start, end).map_err(|_| DbError::InvalidRow {
            table: "reservation_slots",
            column: "end_minute",
            value: self.end_minute.to_string(),
        })?;
        Ok(ReservationSlot {
            id: parse_column(self.id, "reservation_slots", "id")?,
            group: parse_column(self.group_id, "reservation_slots", "group_id")?,
            presenter: parse_column(self.presenter_id, "reservation_slots", "presenter_id")?,
            room: parse_column(self.room_id, "reservation_slots", "room_id")?,
            day: parse_column(self.day, "reservation_slots", "day")?,
            time,
            subject: self.subject,
            semester: self.semester,
            academic_year: self.academic_year,
        })
    }
}

fn minute_column(value: i64, column: &'static str) -> Result<TimeOfDay, DbError> {
    u16::try_from(value)
        .ok()
        .and_then(|minutes| TimeOfDay::from_minutes(minutes).ok())
        .ok_or_else(|| DbError::InvalidRow {
            table: "reservation_slots",
            column,
            value: value.to_string(),
        })
}

fn query_slots<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<ReservationSlot>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, SlotRow::read)?;
    let mut slots = Vec::new();
    for row in rows {
        slots.push(row?.into_slot()?);
    }
    Ok(slots)
}

fn load_slot(conn: &Connection, id: &SlotId) -> Result<Option<ReservationSlot>, DbError> {
    let row = conn
        .query_row(
            &format!("SELECT {SLOT_COLUMNS} FROM reservation_slots WHERE id = ?"),
            [id.as_str()],
            SlotRow::read,
        )
        .optional()?;
    row.map(SlotRow::into_slot).transpose()
}

/// Slots on the same day that share at least one resource with `slot`.
fn slots_sharing_resources(conn: &Connection, slot: &ReservationSlot) -> Result<Vec<ReservationSlot>, DbError> {
    query_slots(
        conn,
        &format!(
            "
            SELECT {SLOT_COLUMNS} FROM reservation_slots
            WHERE day = ?1 AND (group_id = ?2 OR presenter_id = ?3 OR room_id = ?4)
            "
        ),
        params![
            slot.day.as_str(),
            slot.group.as_str(),
            slot.presenter.as_str(),
            slot.room.as_str()
        ],
    )
}

fn ensure_no_conflict(
    conn: &Connection,
    candidate: &ReservationSlot,
    exclude: Option<&SlotId>,
) -> Result<(), DbError> {
    let rivals = slots_sharing_resources(conn, candidate)?;
    let conflicting: Vec<SlotId> = conflict::find_conflicts(candidate, &rivals, exclude)
        .into_iter()
        .map(|slot| slot.id.clone())
        .collect();
    if conflicting.is_empty() {
        return Ok(());
    }
    tracing::warn!(
        day = %candidate.day,
        time = %candidate.time,
        ?conflicting,
        "reservation rejected: scheduling conflict"
    );
    Err(DbError::ScheduleConflict { conflicting })
}

impl Database {
    /// Inserts a new slot after checking it against the timetable.
    pub fn create_slot(&mut self, ctx: &CallerContext, new: NewSlot) -> Result<ReservationSlot, DbError> {
        ctx.authorize_schedule()?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !group_exists(&tx, &new.group)? {
            return Err(DbError::not_found("group", &new.group));
        }
        let slot = new.into_slot(SlotId::new(Uuid::new_v4().to_string())?);
        ensure_no_conflict(&tx, &slot, None)?;
        tx.execute(
            &format!("INSERT INTO reservation_slots ({SLOT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                slot.id.as_str(),
                slot.group.as_str(),
                slot.presenter.as_str(),
                slot.room.as_str(),
                slot.day.as_str(),
                slot.time.start().minutes(),
                slot.time.end().minutes(),
                slot.subject,
                slot.semester,
                slot.academic_year,
            ],
        )?;
        tx.commit()?;
        tracing::info!(slot = %slot.id, day = %slot.day, time = %slot.time, "reservation created");
        Ok(slot)
    }

    /// Applies `changes` to an existing slot.
    ///
    /// The edited slot is re-checked, ignoring its own prior version, whenever
    /// the day, time or a resource changes.
    pub fn update_slot(
        &mut self,
        ctx: &CallerContext,
        id: &SlotId,
        changes: SlotChanges,
    ) -> Result<ReservationSlot, DbError> {
        ctx.authorize_schedule()?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut slot = load_slot(&tx, id)?.ok_or_else(|| DbError::not_found("slot", id))?;
        if let Some(group) = &changes.group {
            if !group_exists(&tx, group)? {
                return Err(DbError::not_found("group", group));
            }
        }
        let recheck = changes.moves_slot();
        changes.apply(&mut slot)?;
        if recheck {
            ensure_no_conflict(&tx, &slot, Some(id))?;
        }
        tx.execute(
            "
            UPDATE reservation_slots
            SET group_id = ?, presenter_id = ?, room_id = ?, day = ?, start_minute = ?, end_minute = ?,
                subject = ?, semester = ?, academic_year = ?
            WHERE id = ?
            ",
            params![
                slot.group.as_str(),
                slot.presenter.as_str(),
                slot.room.as_str(),
                slot.day.as_str(),
                slot.time.start().minutes(),
                slot.time.end().minutes(),
                slot.subject,
                slot.semester,
                slot.academic_year,
                slot.id.as_str(),
            ],
        )?;
        tx.commit()?;
        tracing::info!(slot = %slot.id, day = %slot.day, time = %slot.time, "reservation updated");
        Ok(slot)
    }

    /// Deletes a slot.
    pub fn delete_slot(&mut self, ctx: &CallerContext, id: &SlotId) -> Result<(), DbError> {
        ctx.authorize_schedule()?;
        let deleted = self
            .conn
            .execute("DELETE FROM reservation_slots WHERE id = ?", [id.as_str()])?;
        if deleted == 0 {
            return Err(DbError::not_found("slot", id));
        }
        tracing::info!(slot = %id, "reservation deleted");
        Ok(())
    }

    pub fn get_slot(&self, id: &SlotId) -> Result<ReservationSlot, DbError> {
        load_slot(&self.conn, id)?.ok_or_else(|| DbError::not_found("slot", id))
    }

    /// Lists all slots ordered by weekday, start time, then ID.
    pub fn list_slots(&self) -> Result<Vec<ReservationSlot>, DbError> {
        let mut slots = query_slots(
            &self.conn,
            &format!("SELECT {SLOT_COLUMNS} FROM reservation_slots"),
            [],
        )?;
        slots.sort_by(|a, b| {
            a.day
                .cmp(&b.day)
                .then_with(|| a.time.start().cmp(&b.time.start()))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(slots)
    }

    /// Reports every pair of stored slots that collide.
    ///
    /// Only possible for data written outside this crate, since every insert and
    /// update here is checked.
    pub fn audit_slots(&self) -> Result<Vec<ConflictPair>, DbError> {
        Ok(conflict::audit(&self.list_slots()?))
    }
}
