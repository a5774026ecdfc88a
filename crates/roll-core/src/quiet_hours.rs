//! Quiet-hours evaluation for notification delivery.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{TimeOfDay, ValidationError};

/// A daily window during which notifications are not delivered.
///
/// There is no ordering constraint between the bounds: `start > end` denotes a
/// window that crosses midnight (e.g. `22:00`-`07:00`). `start == end` is an
/// empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl QuietWindow {
    #[must_use]
    pub const fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    /// Parses a window from two `HH:MM` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(start.parse()?, end.parse()?))
    }

    /// Whether the window spans midnight.
    #[must_use]
    pub const fn wraps_midnight(&self) -> bool {
        self.start.minutes() > self.end.minutes()
    }

    /// Whether `now` falls inside this window. See [`is_quiet`].
    #[must_use]
    pub const fn contains(&self, now: TimeOfDay) -> bool {
        is_quiet(now, self)
    }
}

impl fmt::Display for QuietWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Returns true if `now` is inside `window`.
///
/// The start bound is inclusive and the end bound exclusive in both the plain
/// and the midnight-wrapping case.
#[must_use]
pub const fn is_quiet(now: TimeOfDay, window: &QuietWindow) -> bool {
    let cur = now.minutes();
    let start = window.start.minutes();
    let end = window.end.minutes();
    if start <= end {
        start <= cur && cur < end
    } else {
        cur >= start || cur < end
    }
}
