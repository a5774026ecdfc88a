//! Caller authorization passed explicitly into each operation.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::types::{CourseId, UserId, ValidationError};

/// What the identity provider says the caller is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Scheduling authority: manages the timetable and any course.
    Authority,
    /// Runs the courses listed in [`CallerContext::owned_courses`].
    Presenter,
    /// Attends courses; may only check themselves in.
    Participant,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Authority => "authority",
            Self::Presenter => "presenter",
            Self::Participant => "participant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authority" => Ok(Self::Authority),
            "presenter" => Ok(Self::Presenter),
            "participant" => Ok(Self::Participant),
            _ => Err(ValidationError::InvalidRole {
                value: s.to_string(),
            }),
        }
    }
}

/// The operation a caller was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{user} ({role}) may not {action}")]
pub struct Forbidden {
    pub user: UserId,
    pub role: Role,
    pub action: String,
}

impl Forbidden {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Forbidden
    }
}

/// An authenticated caller and the resources they own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub user: UserId,
    pub role: Role,
    pub owned_courses: HashSet<CourseId>,
}

impl CallerContext {
    pub fn new(user: UserId, role: Role) -> Self {
        Self {
            user,
            role,
            owned_courses: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_courses(mut self, courses: impl IntoIterator<Item = CourseId>) -> Self {
        self.owned_courses.extend(courses);
        self
    }

    fn forbid(&self, action: impl Into<String>) -> Forbidden {
        Forbidden {
            user: self.user.clone(),
            role: self.role,
            action: action.into(),
        }
    }

    fn manages(&self, course: &CourseId) -> bool {
        match self.role {
            Role::Authority => true,
            Role::Presenter => self.owned_courses.contains(course),
            Role::Participant => false,
        }
    }

    /// Minting a check-in token for `course`.
    pub fn authorize_issue(&self, course: &CourseId) -> Result<(), Forbidden> {
        if self.manages(course) {
            Ok(())
        } else {
            Err(self.forbid(format!("issue check-in tokens for {course}")))
        }
    }

    /// Manually marking attendance for `course`.
    pub fn authorize_mark(&self, course: &CourseId) -> Result<(), Forbidden> {
        if self.manages(course) {
            Ok(())
        } else {
            Err(self.forbid(format!("mark attendance for {course}")))
        }
    }

    /// Recording a token check-in for `participant`.
    ///
    /// Participants may only check themselves in. Presenters and authorities
    /// running a kiosk relay the identity of whoever presented the token.
    pub fn authorize_check_in(&self, participant: &UserId) -> Result<(), Forbidden> {
        if self.role != Role::Participant || &self.user == participant {
            Ok(())
        } else {
            Err(self.forbid(format!("check in {participant}")))
        }
    }

    /// Changing the quiet-hours preference of `participant`.
    pub fn authorize_prefs(&self, participant: &UserId) -> Result<(), Forbidden> {
        if self.role == Role::Authority || &self.user == participant {
            Ok(())
        } else {
            Err(self.forbid(format!("change notification preferences of {participant}")))
        }
    }

    /// Creating, editing or deleting reservation slots.
    pub fn authorize_schedule(&self) -> Result<(), Forbidden> {
        if self.role == Role::Authority {
            Ok(())
        } else {
            Err(self.forbid("change the timetable"))
        }
    }
}
