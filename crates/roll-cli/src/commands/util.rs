//! Shared utilities for CLI commands.

use std::io::Write;

use anyhow::{Result, bail};
use serde::Serialize;

use roll_core::{
    CallerContext, CheckInError, DeliveryError, ErrorKind, Forbidden, Role, TokenError, UserId,
    ValidationError,
};
use roll_db::{Database, DbError};

/// Builds the caller context from `--user`/`--role`.
///
/// Presenters own the courses recorded against them in the database.
pub fn caller(db: &Database, user: Option<&UserId>, role: Option<Role>) -> Result<CallerContext> {
    let (Some(user), Some(role)) = (user, role) else {
        bail!("this command needs --user and --role");
    };
    let ctx = CallerContext::new(user.clone(), role);
    if role == Role::Presenter {
        return Ok(ctx.with_courses(db.courses_presented_by(user)?));
    }
    Ok(ctx)
}

/// The kind of the first typed error in the chain, if any.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain().find_map(|cause| {
        if let Some(err) = cause.downcast_ref::<DbError>() {
            Some(err.kind())
        } else if let Some(err) = cause.downcast_ref::<TokenError>() {
            Some(err.kind())
        } else if let Some(err) = cause.downcast_ref::<ValidationError>() {
            Some(err.kind())
        } else if let Some(err) = cause.downcast_ref::<CheckInError>() {
            Some(err.kind())
        } else if let Some(err) = cause.downcast_ref::<Forbidden>() {
            Some(err.kind())
        } else {
            cause.downcast_ref::<DeliveryError>().map(DeliveryError::kind)
        }
    })
}

/// The message shown to the user for a failed command.
///
/// Infrastructure failures are logged in full and shown generically.
pub fn render_error(err: &anyhow::Error) -> String {
    match error_kind(err) {
        Some(ErrorKind::Infrastructure) => {
            tracing::error!("internal error: {err:#}");
            format!("error [{}]: internal error", ErrorKind::Infrastructure)
        }
        Some(kind) => format!("error [{kind}]: {err:#}"),
        None => format!("error: {err:#}"),
    }
}

/// Writes `value` as pretty JSON followed by a newline.
pub fn write_json<W: Write, T: Serialize + ?Sized>(writer: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, value)?;
    writeln!(writer)?;
    Ok(())
}
