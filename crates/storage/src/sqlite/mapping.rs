use std::collections::BTreeMap;

use course_core::model::{Answers, AssignmentId, CourseId, ProgressRecord, QuestionId};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn db(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn assignment_id_from_i64(v: i64) -> Result<AssignmentId, StorageError> {
    Ok(AssignmentId::new(i64_to_u64("assignment_id", v)?))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    Ok(QuestionId::new(i64_to_u64("question_id", v)?))
}

pub(crate) fn course_id_from_i64(v: i64) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64("course_id", v)?))
}

pub(crate) fn index_to_i64(index: usize) -> Result<i64, StorageError> {
    i64::try_from(index)
        .map_err(|_| StorageError::Serialization("current_question_index overflow".into()))
}

pub(crate) fn index_from_i64(v: i64) -> Result<usize, StorageError> {
    ProgressRecord::index_from_persisted(v).map_err(ser)
}

/// Answers are stored as a JSON object keyed by the question id's decimal form.
pub(crate) fn answers_to_json(answers: &Answers) -> Result<String, StorageError> {
    let keyed: BTreeMap<String, &str> = answers
        .iter()
        .map(|(id, value)| (id.to_string(), value.as_str()))
        .collect();
    serde_json::to_string(&keyed).map_err(ser)
}

pub(crate) fn answers_from_json(raw: &str) -> Result<Answers, StorageError> {
    if raw.trim().is_empty() {
        return Ok(Answers::new());
    }
    let keyed: BTreeMap<String, String> = serde_json::from_str(raw).map_err(ser)?;
    keyed
        .into_iter()
        .map(|(key, value)| Ok((key.parse::<QuestionId>().map_err(ser)?, value)))
        .collect()
}
