//! Notification dispatch gated by the recipient's quiet hours.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::quiet_hours::{QuietWindow, is_quiet};
use crate::types::{TimeOfDay, UserId};

/// A fully formed outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: UserId,
    pub subject: String,
    pub body: String,
}

/// The channel failed to accept a message.
#[derive(Debug, Error)]
#[error("delivery to {recipient} failed: {message}")]
pub struct DeliveryError {
    pub recipient: UserId,
    pub message: String,
}

impl DeliveryError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Infrastructure
    }
}

/// Where messages go once they clear quiet hours.
pub trait DeliveryChannel {
    fn deliver(&mut self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// What happened to a dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Delivered,
    /// Dropped because the recipient was in quiet hours. Not queued.
    Suppressed,
}

/// Delivers `notification` unless `now` falls in the recipient's quiet window.
///
/// `window` is the recipient's own preference; `None` means no quiet hours.
/// Suppressed messages are logged and dropped.
pub fn dispatch<C: DeliveryChannel + ?Sized>(
    channel: &mut C,
    notification: &Notification,
    window: Option<&QuietWindow>,
    now: TimeOfDay,
) -> Result<DispatchOutcome, DeliveryError> {
    if let Some(window) = window.filter(|window| is_quiet(now, window)) {
        tracing::info!(
            recipient = %notification.recipient,
            %window,
            %now,
            "quiet hours, notification dropped"
        );
        return Ok(DispatchOutcome::Suppressed);
    }
    channel.deliver(notification)?;
    tracing::debug!(recipient = %notification.recipient, "notification delivered");
    Ok(DispatchOutcome::Delivered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Outbox {
        sent: Vec<Notification>,
        fail: bool,
    }

    impl DeliveryChannel for Outbox {
        fn deliver(&mut self, notification: &Notification) -> Result<(), DeliveryError> {
            if self.fail {
                return Err(DeliveryError {
                    recipient: notification.recipient.clone(),
                    message: "mailbox full".to_string(),
                });
            }
            self.sent.push(notification.clone());
            Ok(())
        }
    }

    fn note() -> Notification {
        Notification {
            recipient: UserId::new("P1").unwrap(),
            subject: "Room change".to_string(),
            body: "Monday 08:00 moves to R2".to_string(),
        }
    }

    fn at(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn suppressed_inside_overnight_window() {
        let window = QuietWindow::parse("22:00", "07:00").unwrap();
        let mut outbox = Outbox::default();
        let outcome = dispatch(&mut outbox, &note(), Some(&window), at("23:30")).unwrap();
        assert_eq!(outcome, DispatchOutcome::Suppressed);
        assert!(outbox.sent.is_empty());
    }

    #[test]
    fn delivered_at_window_end() {
        let window = QuietWindow::parse("22:00", "07:00").unwrap();
        let mut outbox = Outbox::default();
        let outcome = dispatch(&mut outbox, &note(), Some(&window), at("07:00")).unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(outbox.sent, vec![note()]);
    }

    #[test]
    fn no_preference_always_delivers() {
        let mut outbox = Outbox::default();
        let outcome = dispatch(&mut outbox, &note(), None, at("03:00")).unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered);
    }

    #[test]
    fn channel_failure_is_infrastructure() {
        let mut outbox = Outbox {
            fail: true,
            ..Outbox::default()
        };
        let err = dispatch(&mut outbox, &note(), None, at("12:00")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
