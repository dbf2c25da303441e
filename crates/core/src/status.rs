//! Assignment lifecycle status, derived from the schedule and the current time.
//!
//! Everything here is pure: callers re-evaluate on every clock tick and on
//! every data reload, and no state is carried between evaluations.

use chrono::{DateTime, Duration, Utc};

use crate::time::{ceil_days, format_countdown};

pub const UNRELEASED_LABEL: &str = "Unreleased";
pub const NOT_APPLICABLE_LABEL: &str = "N/A";

/// Lifecycle status of an assignment at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentStatus {
    Unreleased,
    InProgress,
    Late,
    Closed,
    Upcoming,
    NoSchedule,
}

impl AssignmentStatus {
    /// Short display label. `Closed` is shown as "Completed".
    #[must_use]
    pub fn badge(self) -> &'static str {
        match self {
            Self::Unreleased => "Unreleased",
            Self::InProgress => "In Progress",
            Self::Late => "Late",
            Self::Closed => "Completed",
            Self::Upcoming => "Upcoming",
            Self::NoSchedule => "No Schedule",
        }
    }

    /// True once the soft deadline has passed, whether or not the hard one has.
    #[must_use]
    pub fn is_past_due(self) -> bool {
        matches!(self, Self::Late | Self::Closed)
    }
}

/// The raw predicates the status is selected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags {
    pub is_unreleased: bool,
    pub is_in_progress: bool,
    pub is_late: bool,
    pub is_closed: bool,
}

/// Release and due timestamps of one assignment. Any of them may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Schedule {
    pub release_at: Option<DateTime<Utc>>,
    pub due_soft_at: Option<DateTime<Utc>>,
    pub due_hard_at: Option<DateTime<Utc>>,
}

/// Everything a view needs to render an assignment's status line.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusResult {
    pub status: AssignmentStatus,
    pub flags: StatusFlags,
    pub time_remaining_label: String,
    /// `None` means "do not render a progress bar", never zero.
    pub time_remaining_percent: Option<f64>,
}

impl StatusResult {
    #[must_use]
    pub fn badge(&self) -> &'static str {
        self.status.badge()
    }

    /// Closed past the hard deadline.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.flags.is_closed
    }
}

/// Derive the status, countdown label and progress fraction at `now`.
#[must_use]
pub fn derive_status(
    now: DateTime<Utc>,
    release_at: Option<DateTime<Utc>>,
    due_soft_at: Option<DateTime<Utc>>,
    due_hard_at: Option<DateTime<Utc>>,
) -> StatusResult {
    Schedule::new(release_at, due_soft_at, due_hard_at).evaluate(now)
}

impl Schedule {
    #[must_use]
    pub fn new(
        release_at: Option<DateTime<Utc>>,
        due_soft_at: Option<DateTime<Utc>>,
        due_hard_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            release_at,
            due_soft_at,
            due_hard_at,
        }
    }

    /// The soft deadline if set, otherwise the hard one.
    #[must_use]
    pub fn effective_due(&self) -> Option<DateTime<Utc>> {
        self.due_soft_at.or(self.due_hard_at)
    }

    #[must_use]
    pub fn flags(&self, now: DateTime<Utc>) -> StatusFlags {
        let is_closed = self.due_hard_at.is_some_and(|hard| now > hard);
        let is_unreleased = self.release_at.is_none_or(|release| now < release);
        let is_late = !is_closed && self.due_soft_at.is_some_and(|soft| now > soft);
        StatusFlags {
            is_unreleased,
            is_in_progress: !is_unreleased && !is_late && !is_closed,
            is_late,
            is_closed,
        }
    }

    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> AssignmentStatus {
        self.select(self.flags(now))
    }

    fn select(&self, flags: StatusFlags) -> AssignmentStatus {
        if flags.is_unreleased {
            AssignmentStatus::Unreleased
        } else if flags.is_in_progress {
            AssignmentStatus::InProgress
        } else if flags.is_closed {
            AssignmentStatus::Closed
        } else if flags.is_late {
            AssignmentStatus::Late
        } else if self.effective_due().is_some() {
            AssignmentStatus::Upcoming
        } else {
            AssignmentStatus::NoSchedule
        }
    }

    /// Countdown label: whole days, `HH:MM:SS`, or days late.
    ///
    /// Once closed, lateness is measured from the hard deadline; while late
    /// the countdown runs to the hard deadline when there is one.
    #[must_use]
    pub fn remaining_label(&self, now: DateTime<Utc>) -> String {
        self.label_for(now, self.flags(now))
    }

    fn label_for(&self, now: DateTime<Utc>, flags: StatusFlags) -> String {
        if flags.is_unreleased {
            return UNRELEASED_LABEL.to_owned();
        }

        let target = if flags.is_closed || flags.is_late {
            self.due_hard_at.or(self.effective_due())
        } else {
            self.effective_due()
        };
        let Some(target) = target else {
            return NOT_APPLICABLE_LABEL.to_owned();
        };

        if now > target {
            return format!("{}d late", ceil_days(now - target));
        }

        let remaining = target - now;
        if flags.is_late || remaining < Duration::days(1) {
            format_countdown(remaining)
        } else {
            format!("{}d", ceil_days(remaining))
        }
    }

    /// Percentage of the release-to-soft-deadline window that has elapsed.
    ///
    /// Only defined when both ends exist and the window is non-empty.
    #[must_use]
    pub fn remaining_percent(&self, now: DateTime<Utc>) -> Option<f64> {
        let release = self.release_at?;
        let soft = self.due_soft_at?;
        if soft <= release {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let fraction = (now - release).num_milliseconds() as f64
            / (soft - release).num_milliseconds() as f64;
        Some((fraction * 100.0).clamp(0.0, 100.0))
    }

    #[must_use]
    pub fn evaluate(&self, now: DateTime<Utc>) -> StatusResult {
        let flags = self.flags(now);
        StatusResult {
            status: self.select(flags),
            flags,
            time_remaining_label: self.label_for(now, flags),
            time_remaining_percent: self.remaining_percent(now),
        }
    }
}
