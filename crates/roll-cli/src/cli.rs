//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use roll_core::{CourseId, GroupId, Role, RoomId, SlotId, TimeOfDay, UserId, Weekday};

/// Attendance and timetable coordination.
///
/// Issues short-lived check-in tokens, records attendance, keeps the weekly
/// timetable free of double bookings and holds notifications during quiet hours.
#[derive(Debug, Parser)]
#[command(name = "roll", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Identity of the caller.
    #[arg(long, global = true)]
    pub user: Option<UserId>,

    /// Role of the caller (authority, presenter, participant).
    #[arg(long, global = true)]
    pub role: Option<Role>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the database location and record counts.
    Status,

    /// Manage courses.
    #[command(subcommand)]
    Course(CourseAction),

    /// Manage groups and their members.
    #[command(subcommand)]
    Group(GroupAction),

    /// Manage weekly reservation slots.
    #[command(subcommand)]
    Slot(SlotAction),

    /// Record and list attendance.
    #[command(subcommand)]
    Attendance(AttendanceAction),

    /// Run the check-in kiosk (JSON requests on stdin, one response per line on stdout).
    Kiosk(KioskArgs),

    /// Manage notification preferences.
    #[command(subcommand)]
    Prefs(PrefsAction),

    /// Send a notification, honouring the recipient's quiet hours.
    Notify(NotifyArgs),
}

#[derive(Debug, Subcommand)]
pub enum CourseAction {
    /// Add a course, or rename it and change its presenter.
    Add {
        id: CourseId,
        #[arg(long)]
        name: String,
        #[arg(long)]
        presenter: UserId,
    },
}

#[derive(Debug, Subcommand)]
pub enum GroupAction {
    /// Add a group.
    Add {
        id: GroupId,
        #[arg(long)]
        name: String,
    },
    /// Enroll a participant in a group.
    AddMember {
        group: GroupId,
        participant: UserId,
    },
}

#[derive(Debug, Subcommand)]
pub enum SlotAction {
    /// Reserve a weekly slot.
    Add(SlotAddArgs),
    /// Change fields of an existing slot.
    Edit(SlotEditArgs),
    /// Delete a slot.
    Delete { id: SlotId },
    /// List all slots.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Report pairs of stored slots that conflict.
    Audit {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
pub struct SlotAddArgs {
    #[arg(long)]
    pub group: GroupId,
    #[arg(long)]
    pub presenter: UserId,
    #[arg(long)]
    pub room: RoomId,
    /// Day of the week (monday..sunday).
    #[arg(long)]
    pub day: Weekday,
    /// Start time, HH:MM.
    #[arg(long)]
    pub start: TimeOfDay,
    /// End time, HH:MM (exclusive).
    #[arg(long)]
    pub end: TimeOfDay,
    #[arg(long, default_value = "")]
    pub subject: String,
    #[arg(long, default_value = "")]
    pub semester: String,
    #[arg(long, default_value = "")]
    pub academic_year: String,
}

#[derive(Debug, Args)]
pub struct SlotEditArgs {
    pub id: SlotId,
    #[arg(long)]
    pub group: Option<GroupId>,
    #[arg(long)]
    pub presenter: Option<UserId>,
    #[arg(long)]
    pub room: Option<RoomId>,
    #[arg(long)]
    pub day: Option<Weekday>,
    #[arg(long)]
    pub start: Option<TimeOfDay>,
    #[arg(long)]
    pub end: Option<TimeOfDay>,
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub semester: Option<String>,
    #[arg(long)]
    pub academic_year: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum AttendanceAction {
    /// Apply manual marks read as JSON lines from stdin.
    Mark,
    /// List attendance for a course on a date.
    List {
        #[arg(long)]
        course: CourseId,
        /// Date (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
pub struct KioskArgs {
    /// Token lifetime in minutes; overrides `token_validity_minutes`.
    #[arg(long)]
    pub validity_minutes: Option<i64>,
}

#[derive(Debug, Subcommand)]
pub enum PrefsAction {
    /// Set a participant's quiet hours.
    Set {
        participant: UserId,
        /// Start of quiet hours, HH:MM.
        #[arg(long)]
        start: TimeOfDay,
        /// End of quiet hours, HH:MM (exclusive; may be earlier than start).
        #[arg(long)]
        end: TimeOfDay,
    },
    /// Show a participant's quiet hours.
    Show { participant: UserId },
}

#[derive(Debug, Args)]
pub struct NotifyArgs {
    pub recipient: UserId,
    #[arg(long)]
    pub subject: String,
    #[arg(long)]
    pub body: String,
    /// Evaluate quiet hours at this local time instead of now.
    #[arg(long)]
    pub at: Option<TimeOfDay>,
}
