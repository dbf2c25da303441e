use course_core::model::{AssignmentId, ProgressRecord, ProgressUpdate, UserId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    answers_from_json, answers_to_json, assignment_id_from_i64, db, id_i64, index_from_i64,
    index_to_i64, ser,
};
use crate::repository::{ProgressRepository, StorageError};

fn map_progress_row(row: &SqliteRow) -> Result<ProgressRecord, StorageError> {
    Ok(ProgressRecord {
        assignment_id: assignment_id_from_i64(row.try_get::<i64, _>("assignment_id").map_err(ser)?)?,
        student_id: UserId::new(row.try_get::<String, _>("student_id").map_err(ser)?),
        answers: answers_from_json(&row.try_get::<String, _>("answers").map_err(ser)?)?,
        current_question_index: index_from_i64(
            row.try_get::<i64, _>("current_question_index").map_err(ser)?,
        )?,
        submitted: row.try_get("submitted").map_err(ser)?,
        submitted_at: row.try_get("submitted_at").map_err(ser)?,
        updated_at: Some(row.try_get("updated_at").map_err(ser)?),
    })
}

impl SqliteRepository {
    async fn select_progress(
        &self,
        assignment_id: i64,
        student_id: &UserId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT assignment_id, student_id, answers, current_question_index,
                   submitted, submitted_at, updated_at
            FROM assignment_progress
            WHERE assignment_id = ?1 AND student_id = ?2
            ",
        )
        .bind(assignment_id)
        .bind(student_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        row.as_ref().map(map_progress_row).transpose()
    }
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn fetch_progress(
        &self,
        assignment_id: AssignmentId,
        student_id: &UserId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        self.select_progress(id_i64("assignment_id", assignment_id.value())?, student_id)
            .await
    }

    async fn save_progress(
        &self,
        assignment_id: AssignmentId,
        student_id: &UserId,
        update: &ProgressUpdate,
    ) -> Result<ProgressRecord, StorageError> {
        let id = id_i64("assignment_id", assignment_id.value())?;

        // ?5 is the optional submitted flag: NULL keeps the stored flag and timestamp.
        sqlx::query(
            r"
            INSERT INTO assignment_progress (
                assignment_id, student_id, answers, current_question_index,
                submitted, submitted_at, created_at, updated_at
            )
            VALUES (
                ?1, ?2, ?3, ?4,
                COALESCE(?5, 0), CASE WHEN ?5 = 1 THEN ?6 ELSE NULL END, ?6, ?6
            )
            ON CONFLICT(assignment_id, student_id) DO UPDATE SET
                answers = excluded.answers,
                current_question_index = excluded.current_question_index,
                submitted = COALESCE(?5, assignment_progress.submitted),
                submitted_at = CASE
                    WHEN ?5 = 1 THEN ?6
                    WHEN ?5 = 0 THEN NULL
                    ELSE assignment_progress.submitted_at
                END,
                updated_at = ?6
            ",
        )
        .bind(id)
        .bind(student_id.as_str())
        .bind(answers_to_json(&update.answers)?)
        .bind(index_to_i64(update.current_question_index)?)
        .bind(update.submitted)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        self.select_progress(id, student_id)
            .await?
            .ok_or(StorageError::NotFound)
    }
}
