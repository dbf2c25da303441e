use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{AssignmentId, QuestionId, UserId};

/// Answers keyed by question. Only touched questions have an entry; the value
/// is free text or the selected choice.
pub type Answers = BTreeMap<QuestionId, String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("invalid current question index: {raw}")]
    InvalidIndex { raw: i64 },
}

/// Durable progress of one student on one assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub assignment_id: AssignmentId,
    pub student_id: UserId,
    pub answers: Answers,
    pub current_question_index: usize,
    pub submitted: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// The record a student has before touching the assignment.
    #[must_use]
    pub fn empty(assignment_id: AssignmentId, student_id: UserId) -> Self {
        Self {
            assignment_id,
            student_id,
            answers: Answers::new(),
            current_question_index: 0,
            submitted: false,
            submitted_at: None,
            updated_at: None,
        }
    }

    /// Validate a question index read back from storage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidIndex` for negative values.
    pub fn index_from_persisted(raw: i64) -> Result<usize, ProgressError> {
        usize::try_from(raw).map_err(|_| ProgressError::InvalidIndex { raw })
    }

    /// Apply a save request with upsert semantics.
    ///
    /// Answers and index are replaced. `submitted: None` leaves the flag and
    /// its timestamp untouched; `Some(true)` stamps `submitted_at = now` on
    /// every call, so a resubmission gets a fresh timestamp; `Some(false)`
    /// reopens and clears the timestamp.
    pub fn apply(&mut self, update: &ProgressUpdate, now: DateTime<Utc>) {
        self.answers.clone_from(&update.answers);
        self.current_question_index = update.current_question_index;
        match update.submitted {
            None => {}
            Some(true) => {
                self.submitted = true;
                self.submitted_at = Some(now);
            }
            Some(false) => {
                self.submitted = false;
                self.submitted_at = None;
            }
        }
        self.updated_at = Some(now);
    }
}

/// Payload of a progress save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub answers: Answers,
    pub current_question_index: usize,
    pub submitted: Option<bool>,
}

impl ProgressUpdate {
    /// Non-terminal save. Never touches the submitted flag.
    #[must_use]
    pub fn autosave(answers: Answers, current_question_index: usize) -> Self {
        Self {
            answers,
            current_question_index,
            submitted: None,
        }
    }

    /// Terminal save marking the record submitted.
    #[must_use]
    pub fn submit(answers: Answers, current_question_index: usize) -> Self {
        Self {
            answers,
            current_question_index,
            submitted: Some(true),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.submitted == Some(true)
    }
}

/// Clamp `index` into `[0, question_count - 1]`; zero when there are no questions.
#[must_use]
pub fn clamp_question_index(index: usize, question_count: usize) -> usize {
    index.min(question_count.saturating_sub(1))
}
