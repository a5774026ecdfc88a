//! Caller-facing error classification.

use std::fmt;

use serde::Serialize;

/// The outcome class of a failed operation.
///
/// Every error type in the workspace maps onto exactly one kind, so callers can
/// render "scheduling conflict" or "already checked in" without matching on
/// crate-specific variants. Only [`ErrorKind::Infrastructure`] is opaque to end
/// users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Token unknown to the store (or not a well-formed token at all).
    InvalidToken,
    /// Token found but past its expiry instant.
    ExpiredToken,
    /// Participant is not a member of the token's group.
    NotEnrolled,
    /// Attendance record is already `present` for the key.
    AlreadyCheckedIn,
    /// Reservation overlaps an existing one on a shared resource.
    ScheduleConflict,
    /// Malformed `HH:MM` input or an empty/inverted time range.
    InvalidTimeWindow,
    /// Any other rejected input value.
    InvalidInput,
    /// Referenced entity does not exist.
    NotFound,
    /// Caller's role does not permit the operation.
    Forbidden,
    /// Storage or delivery failure; details stay in the logs.
    Infrastructure,
}

impl ErrorKind {
    /// Stable string form used in JSON output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::ExpiredToken => "expired_token",
            Self::NotEnrolled => "not_enrolled",
            Self::AlreadyCheckedIn => "already_checked_in",
            Self::ScheduleConflict => "schedule_conflict",
            Self::InvalidTimeWindow => "invalid_time_window",
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Infrastructure => "infrastructure",
        }
    }

    /// Whether the underlying message may be shown to an end user.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Infrastructure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infrastructure_is_opaque() {
        assert!(!ErrorKind::Infrastructure.is_user_facing());
        assert!(ErrorKind::ScheduleConflict.is_user_facing());
        assert!(ErrorKind::ExpiredToken.is_user_facing());
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::AlreadyCheckedIn).unwrap();
        assert_eq!(json, "\"already_checked_in\"");
        assert_eq!(ErrorKind::NotEnrolled.to_string(), "not_enrolled");
    }
}
