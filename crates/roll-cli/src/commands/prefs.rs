//! Quiet-hours preferences.

use std::io::Write;

use anyhow::Result;

use roll_core::{CallerContext, QuietWindow};
use roll_db::Database;

use crate::PrefsAction;

pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    ctx: &CallerContext,
    action: &PrefsAction,
) -> Result<()> {
    match action {
        PrefsAction::Set {
            participant,
            start,
            end,
        } => {
            ctx.authorize_prefs(participant)?;
            let window = QuietWindow::new(*start, *end);
            db.set_quiet_hours(participant, &window)?;
            tracing::info!(participant = %participant, %window, "quiet hours updated");
            let note = if window.wraps_midnight() {
                " (overnight)"
            } else {
                ""
            };
            writeln!(writer, "Quiet hours for {participant}: {window}{note}")?;
        }
        PrefsAction::Show { participant } => match db.quiet_hours(participant)? {
            Some(window) => writeln!(writer, "Quiet hours for {participant}: {window}")?,
            None => writeln!(writer, "No quiet hours set for {participant}")?,
        },
    }
    Ok(())
}
