//! Core domain logic for rollcall.
//!
//! This crate contains the storage-independent pieces of attendance and
//! timetable coordination:
//! - Session tokens: issuing and validating short-lived check-in tokens
//! - Conflict detection: overlap rules for weekly reservation slots
//! - Attendance: the token check-in state machine and manual marks
//! - Quiet hours: midnight-aware notification suppression

pub mod attendance;
pub mod auth;
pub mod clock;
pub mod conflict;
pub mod error;
pub mod notify;
pub mod quiet_hours;
pub mod token;
pub mod types;

pub use attendance::{
    AttendanceKey, AttendanceRecord, AttendanceStatus, CheckInError, CheckInMethod, MarkEntry,
    MarkOutcome, TokenCheckIn, plan_token_check_in,
};
pub use auth::{CallerContext, Forbidden, Role};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::{ConflictPair, ReservationSlot, Resource, audit, find_conflicts, has_conflict};
pub use error::ErrorKind;
pub use notify::{DeliveryChannel, DeliveryError, DispatchOutcome, Notification, dispatch};
pub use quiet_hours::{QuietWindow, is_quiet};
pub use token::{IssuedToken, SessionToken, SessionTokenStore, TokenBinding, TokenError};
pub use types::{
    CourseId, GroupId, RoomId, SlotId, TimeOfDay, TimeRange, UserId, ValidationError, Weekday,
};
