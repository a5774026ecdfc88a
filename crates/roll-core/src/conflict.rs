//! Conflict detection for weekly reservation slots.
//!
//! Two slots conflict when they fall on the same weekday, share at least one
//! resource (group, presenter or room) and their `[start, end)` intervals
//! overlap. Slots that merely touch (`a.end == b.start`) do not conflict.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::{GroupId, RoomId, SlotId, TimeRange, UserId, Weekday};

/// One recurring weekly meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSlot {
    pub id: SlotId,
    pub group: GroupId,
    pub presenter: UserId,
    pub room: RoomId,
    pub day: Weekday,
    #[serde(flatten)]
    pub time: TimeRange,
    /// Descriptive metadata; not consulted for conflicts.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub semester: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub academic_year: String,
}

/// A resource dimension a slot occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Group,
    Presenter,
    Room,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Group => "group",
            Self::Presenter => "presenter",
            Self::Room => "room",
        };
        write!(f, "{s}")
    }
}

/// Two existing slots found to collide by [`audit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictPair {
    pub first: SlotId,
    pub second: SlotId,
    pub day: Weekday,
    pub shared: Vec<Resource>,
}

/// Resources the two slots have in common, in group/presenter/room order.
pub fn shared_resources(a: &ReservationSlot, b: &ReservationSlot) -> Vec<Resource> {
    let mut shared = Vec::new();
    if a.group == b.group {
        shared.push(Resource::Group);
    }
    if a.presenter == b.presenter {
        shared.push(Resource::Presenter);
    }
    if a.room == b.room {
        shared.push(Resource::Room);
    }
    shared
}

/// Whether two slots collide. Symmetric in its arguments.
pub fn conflicts_with(a: &ReservationSlot, b: &ReservationSlot) -> bool {
    a.day == b.day
        && (a.group == b.group || a.presenter == b.presenter || a.room == b.room)
        && a.time.overlaps(&b.time)
}

/// Returns true if `candidate` collides with any slot in `existing`.
///
/// `exclude` names the candidate's own prior version when re-checking an edit;
/// that slot is skipped.
pub fn has_conflict(
    candidate: &ReservationSlot,
    existing: &[ReservationSlot],
    exclude: Option<&SlotId>,
) -> bool {
    existing
        .iter()
        .filter(|other| exclude != Some(&other.id))
        .any(|other| conflicts_with(candidate, other))
}

/// Like [`has_conflict`], but returns every colliding slot.
pub fn find_conflicts<'a>(
    candidate: &ReservationSlot,
    existing: &'a [ReservationSlot],
    exclude: Option<&SlotId>,
) -> Vec<&'a ReservationSlot> {
    existing
        .iter()
        .filter(|other| exclude != Some(&other.id))
        .filter(|other| conflicts_with(candidate, other))
        .collect()
}

/// Checks a whole timetable pairwise and reports every colliding pair.
///
/// Pairs are ordered by the position of their first slot, then the second.
pub fn audit(slots: &[ReservationSlot]) -> Vec<ConflictPair> {
    slots
        .par_iter()
        .enumerate()
        .flat_map_iter(|(i, a)| {
            slots[i + 1..]
                .iter()
                .filter(move |b| conflicts_with(a, b))
                .map(move |b| ConflictPair {
                    first: a.id.clone(),
                    second: b.id.clone(),
                    day: a.day,
                    shared: shared_resources(a, b),
                })
        })
        .collect()
}
