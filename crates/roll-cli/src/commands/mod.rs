//! CLI subcommand implementations.

pub mod attendance;
pub mod kiosk;
pub mod notify;
pub mod prefs;
pub mod roster;
pub mod slot;
pub mod status;
pub mod util;
