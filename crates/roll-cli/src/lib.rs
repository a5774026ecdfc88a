//! rollcall CLI library.
//!
//! This crate provides the `roll` command-line interface over the core and
//! record-store crates.

mod cli;
pub mod commands;
mod config;

pub use cli::{
    AttendanceAction, Cli, Commands, CourseAction, GroupAction, KioskArgs, NotifyArgs,
    PrefsAction, SlotAction, SlotAddArgs, SlotEditArgs,
};
pub use config::Config;
