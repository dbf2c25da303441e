use chrono::{DateTime, Utc};

use crate::model::{AssignmentId, CourseId, QuestionId, UserId};
use crate::status::{Schedule, StatusResult};

/// An assignment as published by the course backend. Read-only to this crate.
///
/// The schedule is expected to satisfy `release <= soft <= hard` but that is
/// not enforced; status derivation stays defined when it does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    id: AssignmentId,
    course_id: Option<CourseId>,
    instructor_id: Option<UserId>,
    title: String,
    schedule: Schedule,
    late_policy_id: Option<String>,
    question_ids: Vec<QuestionId>,
}

impl Assignment {
    #[must_use]
    pub fn new(id: AssignmentId, title: impl Into<String>) -> Self {
        Self {
            id,
            course_id: None,
            instructor_id: None,
            title: title.into(),
            schedule: Schedule::default(),
            late_policy_id: None,
            question_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_course(mut self, course_id: CourseId) -> Self {
        self.course_id = Some(course_id);
        self
    }

    /// Owner of the assignment; viewing as this user is an instructor preview.
    #[must_use]
    pub fn with_instructor(mut self, instructor_id: UserId) -> Self {
        self.instructor_id = Some(instructor_id);
        self
    }

    #[must_use]
    pub fn with_schedule(
        mut self,
        release_at: Option<DateTime<Utc>>,
        due_soft_at: Option<DateTime<Utc>>,
        due_hard_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.schedule = Schedule::new(release_at, due_soft_at, due_hard_at);
        self
    }

    #[must_use]
    pub fn with_late_policy(mut self, late_policy_id: Option<String>) -> Self {
        self.late_policy_id = late_policy_id.filter(|id| !id.trim().is_empty());
        self
    }

    /// Question order is meaningful and preserved as given.
    #[must_use]
    pub fn with_questions(mut self, question_ids: Vec<QuestionId>) -> Self {
        self.question_ids = question_ids;
        self
    }

    /// Mark the assignment released at `at`, keeping the deadlines.
    pub fn release(&mut self, at: DateTime<Utc>) {
        self.schedule.release_at = Some(at);
    }

    #[must_use]
    pub fn id(&self) -> AssignmentId {
        self.id
    }

    #[must_use]
    pub fn course_id(&self) -> Option<CourseId> {
        self.course_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    #[must_use]
    pub fn release_at(&self) -> Option<DateTime<Utc>> {
        self.schedule.release_at
    }

    #[must_use]
    pub fn due_soft_at(&self) -> Option<DateTime<Utc>> {
        self.schedule.due_soft_at
    }

    #[must_use]
    pub fn due_hard_at(&self) -> Option<DateTime<Utc>> {
        self.schedule.due_hard_at
    }

    #[must_use]
    pub fn instructor_id(&self) -> Option<&UserId> {
        self.instructor_id.as_ref()
    }

    /// Opaque policy reference, display only.
    #[must_use]
    pub fn late_policy_id(&self) -> Option<&str> {
        self.late_policy_id.as_deref()
    }

    #[must_use]
    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_ids
    }

    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> StatusResult {
        self.schedule.evaluate(now)
    }
}
