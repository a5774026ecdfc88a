//! Notification dispatch through a plain-text channel.

use std::io::Write;

use anyhow::Result;
use chrono::Local;

use roll_core::{
    DeliveryChannel, DeliveryError, DispatchOutcome, Notification, TimeOfDay, dispatch,
};
use roll_db::Database;

use crate::NotifyArgs;

/// Delivers notifications by writing them to a text stream.
pub struct WriterChannel<W> {
    writer: W,
}

impl<W: Write> WriterChannel<W> {
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> DeliveryChannel for WriterChannel<W> {
    fn deliver(&mut self, notification: &Notification) -> Result<(), DeliveryError> {
        writeln!(
            self.writer,
            "To: {}\nSubject: {}\n\n{}",
            notification.recipient, notification.subject, notification.body
        )
        .map_err(|err| DeliveryError {
            recipient: notification.recipient.clone(),
            message: err.to_string(),
        })
    }
}

pub fn run<W: Write>(writer: &mut W, db: &Database, args: &NotifyArgs) -> Result<()> {
    let window = db.quiet_hours(&args.recipient)?;
    let now = args
        .at
        .unwrap_or_else(|| TimeOfDay::from(Local::now().time()));
    let notification = Notification {
        recipient: args.recipient.clone(),
        subject: args.subject.clone(),
        body: args.body.clone(),
    };

    let outcome = dispatch(
        &mut WriterChannel::new(&mut *writer),
        &notification,
        window.as_ref(),
        now,
    )?;
    if let (DispatchOutcome::Suppressed, Some(window)) = (outcome, window) {
        writeln!(
            writer,
            "Dropped: {} is in quiet hours ({window}) at {now}",
            args.recipient
        )?;
    }
    Ok(())
}
