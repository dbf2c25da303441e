//! JSON shapes of the course backend, and their mapping onto domain types.

use std::collections::{BTreeMap, HashMap};

use course_core::model::{
    Answers, Assignment, AssignmentId, CourseId, ProgressRecord, ProgressUpdate, Question,
    QuestionId, UserId,
};
use course_core::time::parse_optional_instant;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

#[derive(Debug, Deserialize)]
pub(super) struct AssignmentWire {
    id: u64,
    #[serde(default)]
    course_id: Option<u64>,
    #[serde(default)]
    instructor_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    due_date_soft: Option<String>,
    #[serde(default)]
    due_date_hard: Option<String>,
    #[serde(default)]
    late_policy_id: Option<String>,
    #[serde(default)]
    assignment_questions: Vec<u64>,
}

impl AssignmentWire {
    pub(super) fn into_assignment(self) -> Result<Assignment, StorageError> {
        let mut assignment = Assignment::new(AssignmentId::new(self.id), self.title.unwrap_or_default())
            .with_schedule(
                parse_optional_instant(self.release_date.as_deref()).map_err(ser)?,
                parse_optional_instant(self.due_date_soft.as_deref()).map_err(ser)?,
                parse_optional_instant(self.due_date_hard.as_deref()).map_err(ser)?,
            )
            .with_late_policy(self.late_policy_id)
            .with_questions(self.assignment_questions.into_iter().map(QuestionId::new).collect());
        if let Some(course_id) = self.course_id {
            assignment = assignment.with_course(CourseId::new(course_id));
        }
        // The backend defaults the column to an empty string.
        if let Some(instructor_id) = self.instructor_id.and_then(|raw| raw.parse::<UserId>().ok()) {
            assignment = assignment.with_instructor(instructor_id);
        }
        Ok(assignment)
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ProgressWire {
    assignment_id: u64,
    #[serde(default)]
    student_id: Option<String>,
    #[serde(default)]
    answers: BTreeMap<String, Value>,
    #[serde(default)]
    current_question_index: i64,
    #[serde(default)]
    submitted: bool,
    #[serde(default)]
    submitted_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

/// Choice answers may arrive as bare numbers; everything is kept as text.
fn answer_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

impl ProgressWire {
    pub(super) fn into_record(self, fallback_student: &UserId) -> Result<ProgressRecord, StorageError> {
        let answers = self
            .answers
            .into_iter()
            .map(|(key, value)| Ok((key.parse::<QuestionId>().map_err(ser)?, answer_text(value))))
            .collect::<Result<Answers, StorageError>>()?;

        Ok(ProgressRecord {
            assignment_id: AssignmentId::new(self.assignment_id),
            student_id: self
                .student_id
                .map_or_else(|| fallback_student.clone(), UserId::new),
            answers,
            current_question_index: ProgressRecord::index_from_persisted(self.current_question_index)
                .map_err(ser)?,
            submitted: self.submitted,
            submitted_at: parse_optional_instant(self.submitted_at.as_deref()).map_err(ser)?,
            updated_at: parse_optional_instant(self.updated_at.as_deref()).map_err(ser)?,
        })
    }
}

#[derive(Debug, Serialize)]
pub(super) struct ProgressUpdateWire<'a> {
    answers: BTreeMap<String, &'a str>,
    current_question_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    submitted: Option<bool>,
}

impl<'a> ProgressUpdateWire<'a> {
    pub(super) fn from_update(update: &'a ProgressUpdate) -> Self {
        Self {
            answers: update
                .answers
                .iter()
                .map(|(id, value)| (id.to_string(), value.as_str()))
                .collect(),
            current_question_index: update.current_question_index,
            submitted: update.submitted,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct QuestionWire {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct QuestionListWire {
    questions: Vec<QuestionWire>,
}

impl QuestionListWire {
    /// Reorder to match the request; the backend returns rows in storage order.
    pub(super) fn into_ordered(self, ids: &[QuestionId]) -> Vec<Question> {
        let mut by_id: HashMap<u64, QuestionWire> =
            self.questions.into_iter().map(|q| (q.id, q)).collect();
        ids.iter()
            .filter_map(|id| by_id.remove(&id.value()))
            .map(|q| Question::new(QuestionId::new(q.id), q.title, q.text))
            .collect()
    }
}
