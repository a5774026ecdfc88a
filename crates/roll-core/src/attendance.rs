//! Attendance records and their state transitions.
//!
//! A (participant, course, date) key with no stored record is implicitly
//! absent. Token check-in moves it to `present`, which is terminal for token
//! check-ins; manual marks may set any status at any time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::token::{SessionToken, TokenBinding};
use crate::types::{CourseId, GroupId, UserId, ValidationError};

/// Attendance status of a participant for one course on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Excused => "excused",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "late" => Ok(Self::Late),
            "excused" => Ok(Self::Excused),
            _ => Err(ValidationError::InvalidStatus {
                value: s.to_string(),
            }),
        }
    }
}

/// How a record was last written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInMethod {
    Manual,
    Token,
}

impl CheckInMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Token => "token",
        }
    }
}

impl fmt::Display for CheckInMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CheckInMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "token" => Ok(Self::Token),
            _ => Err(ValidationError::InvalidMethod {
                value: s.to_string(),
            }),
        }
    }
}

/// Identity of an attendance record. At most one record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttendanceKey {
    pub participant: UserId,
    pub course: CourseId,
    pub date: NaiveDate,
}

impl fmt::Display for AttendanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.participant, self.course, self.date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(flatten)]
    pub key: AttendanceKey,
    pub status: AttendanceStatus,
    pub checked_in_at: DateTime<Utc>,
    pub method: CheckInMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SessionToken>,
    pub recorded_by: UserId,
}

impl AttendanceRecord {
    /// The record a successful token check-in leaves behind.
    ///
    /// The issuer of the token is recorded as the recorder.
    pub fn from_token_check_in(
        key: AttendanceKey,
        binding: &TokenBinding,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            status: AttendanceStatus::Present,
            checked_in_at: now,
            method: CheckInMethod::Token,
            token: Some(token.clone()),
            recorded_by: binding.issuer.clone(),
        }
    }

    /// The record a manual mark leaves behind.
    pub fn from_manual_mark(
        key: AttendanceKey,
        status: AttendanceStatus,
        recorder: &UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            status,
            checked_in_at: now,
            method: CheckInMethod::Manual,
            token: None,
            recorded_by: recorder.clone(),
        }
    }
}

/// Token check-in outcomes a participant may see.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckInError {
    #[error("{participant} is not enrolled in group {group}")]
    NotEnrolled { participant: UserId, group: GroupId },
    #[error("{} already checked in to {} on {}", .key.participant, .key.course, .key.date)]
    AlreadyCheckedIn { key: AttendanceKey },
}

impl CheckInError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotEnrolled { .. } => ErrorKind::NotEnrolled,
            Self::AlreadyCheckedIn { .. } => ErrorKind::AlreadyCheckedIn,
        }
    }
}

/// The write a token check-in should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheckIn {
    /// No record yet: insert one.
    Create,
    /// A record with a non-present status exists: overwrite it in place.
    Upgrade { from: AttendanceStatus },
}

/// Decides the token check-in transition for `key` given its current record.
pub fn plan_token_check_in(
    key: &AttendanceKey,
    existing: Option<&AttendanceRecord>,
) -> Result<TokenCheckIn, CheckInError> {
    match existing.map(|record| record.status) {
        None => Ok(TokenCheckIn::Create),
        Some(AttendanceStatus::Present) => Err(CheckInError::AlreadyCheckedIn { key: key.clone() }),
        Some(from) => Ok(TokenCheckIn::Upgrade { from }),
    }
}

/// One line of a manual marking batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkEntry {
    pub participant: UserId,
    pub course: CourseId,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

impl MarkEntry {
    pub fn key(&self) -> AttendanceKey {
        AttendanceKey {
            participant: self.participant.clone(),
            course: self.course.clone(),
            date: self.date,
        }
    }
}

/// Result of applying one [`MarkEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkOutcome {
    #[serde(flatten)]
    pub key: AttendanceKey,
    pub status: AttendanceStatus,
    /// False when an existing record was overwritten.
    pub created: bool,
}
