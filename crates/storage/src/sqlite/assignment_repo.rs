use course_core::model::{Assignment, AssignmentId, Question, QuestionId, UserId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    assignment_id_from_i64, course_id_from_i64, db, id_i64, question_id_from_i64, ser,
};
use crate::repository::{AssignmentRepository, QuestionRepository, StorageError};

fn map_assignment_row(
    row: &SqliteRow,
    question_ids: Vec<QuestionId>,
) -> Result<Assignment, StorageError> {
    let id = assignment_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?;
    let title: String = row.try_get("title").map_err(ser)?;
    let course_id = row
        .try_get::<Option<i64>, _>("course_id")
        .map_err(ser)?
        .map(course_id_from_i64)
        .transpose()?;
    let late_policy_id: Option<String> = row.try_get("late_policy_id").map_err(ser)?;
    let instructor_id: Option<String> = row.try_get("instructor_id").map_err(ser)?;

    let mut assignment = Assignment::new(id, title)
        .with_schedule(
            row.try_get("release_at").map_err(ser)?,
            row.try_get("due_soft_at").map_err(ser)?,
            row.try_get("due_hard_at").map_err(ser)?,
        )
        .with_late_policy(late_policy_id)
        .with_questions(question_ids);
    if let Some(course_id) = course_id {
        assignment = assignment.with_course(course_id);
    }
    if let Some(instructor_id) = instructor_id.and_then(|raw| raw.parse::<UserId>().ok()) {
        assignment = assignment.with_instructor(instructor_id);
    }
    Ok(assignment)
}

impl SqliteRepository {
    /// Persist or replace an assignment together with its ordered question list.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    pub async fn upsert_assignment(&self, assignment: &Assignment) -> Result<(), StorageError> {
        let id = id_i64("assignment_id", assignment.id().value())?;
        let course_id = assignment
            .course_id()
            .map(|c| id_i64("course_id", c.value()))
            .transpose()?;

        let mut tx = self.pool.begin().await.map_err(db)?;

        sqlx::query(
            r"
            INSERT INTO assignments (
                id, course_id, title, release_at, due_soft_at, due_hard_at, late_policy_id,
                instructor_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                course_id = excluded.course_id,
                instructor_id = excluded.instructor_id,
                title = excluded.title,
                release_at = excluded.release_at,
                due_soft_at = excluded.due_soft_at,
                due_hard_at = excluded.due_hard_at,
                late_policy_id = excluded.late_policy_id
            ",
        )
        .bind(id)
        .bind(course_id)
        .bind(assignment.title())
        .bind(assignment.release_at())
        .bind(assignment.due_soft_at())
        .bind(assignment.due_hard_at())
        .bind(assignment.late_policy_id())
        .bind(assignment.instructor_id().map(UserId::as_str))
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        sqlx::query("DELETE FROM assignment_questions WHERE assignment_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        for (position, question_id) in assignment.question_ids().iter().enumerate() {
            let position = i64::try_from(position).map_err(ser)?;
            sqlx::query(
                r"
                INSERT INTO assignment_questions (assignment_id, position, question_id)
                VALUES (?1, ?2, ?3)
                ",
            )
            .bind(id)
            .bind(position)
            .bind(id_i64("question_id", question_id.value())?)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        Ok(())
    }

    /// Persist or replace a question.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    pub async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO questions (id, title, text)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                text = excluded.text
            ",
        )
        .bind(id_i64("question_id", question.id().value())?)
        .bind(question.title())
        .bind(question.text())
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn question_ids_for(&self, id: i64) -> Result<Vec<QuestionId>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT question_id
            FROM assignment_questions
            WHERE assignment_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter()
            .map(|row| question_id_from_i64(row.try_get::<i64, _>("question_id").map_err(ser)?))
            .collect()
    }
}

#[async_trait::async_trait]
impl AssignmentRepository for SqliteRepository {
    async fn fetch_assignment(&self, id: AssignmentId) -> Result<Assignment, StorageError> {
        let id = id_i64("assignment_id", id.value())?;
        let row = sqlx::query(
            r"
            SELECT id, course_id, instructor_id, title, release_at, due_soft_at, due_hard_at,
                   late_policy_id
            FROM assignments
            WHERE id = ?1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?
        .ok_or(StorageError::NotFound)?;

        let question_ids = self.question_ids_for(id).await?;
        map_assignment_row(&row, question_ids)
    }

    async fn release_now(&self, id: AssignmentId) -> Result<Assignment, StorageError> {
        let res = sqlx::query("UPDATE assignments SET release_at = ?1 WHERE id = ?2")
            .bind(self.clock.now())
            .bind(id_i64("assignment_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        self.fetch_assignment(id).await
    }
}

#[async_trait::async_trait]
impl QuestionRepository for SqliteRepository {
    async fn fetch_questions_batch(
        &self,
        ids: &[QuestionId],
    ) -> Result<Vec<Question>, StorageError> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query("SELECT id, title, text FROM questions WHERE id = ?1")
                .bind(id_i64("question_id", id.value())?)
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;
            if let Some(row) = row {
                found.push(Question::new(
                    question_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
                    row.try_get("title").map_err(ser)?,
                    row.try_get::<String, _>("text").map_err(ser)?,
                ));
            }
        }
        Ok(found)
    }
}
