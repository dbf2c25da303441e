use std::sync::Arc;

use course_core::model::{Assignment, AssignmentId, ProgressRecord, UserId};
use storage::repository::{
    AssignmentRepository, ProgressRepository, QuestionRepository, Storage,
};
use tokio::runtime::Handle;

use super::session::ProgressSession;
use crate::config::SessionConfig;
use crate::error::SessionError;

/// Opens progress sessions against the configured repositories.
#[derive(Clone)]
pub struct ProgressSessionService {
    config: SessionConfig,
    assignments: Arc<dyn AssignmentRepository>,
    progress: Arc<dyn ProgressRepository>,
    questions: Arc<dyn QuestionRepository>,
}

impl ProgressSessionService {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        assignments: Arc<dyn AssignmentRepository>,
        progress: Arc<dyn ProgressRepository>,
        questions: Arc<dyn QuestionRepository>,
    ) -> Self {
        Self {
            config,
            assignments,
            progress,
            questions,
        }
    }

    #[must_use]
    pub fn from_storage(config: SessionConfig, storage: &Storage) -> Self {
        Self::new(
            config,
            Arc::clone(&storage.assignments),
            Arc::clone(&storage.progress),
            Arc::clone(&storage.questions),
        )
    }

    #[must_use]
    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Load an assignment and the viewer's progress into a live session.
    ///
    /// The viewer is in instructor preview when `viewer_id == instructor_id`;
    /// no progress is fetched and nothing will ever be saved. Otherwise the
    /// stored record (or an empty one) seeds the edit buffer, and a finished
    /// submission opens read-only unless `resubmit_requested`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Load` if the assignment or the progress record
    /// cannot be fetched. Question lookup failures are not fatal.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub async fn open_session(
        &self,
        assignment_id: AssignmentId,
        viewer_id: &UserId,
        instructor_id: &UserId,
        resubmit_requested: bool,
    ) -> Result<ProgressSession, SessionError> {
        let assignment = self.fetch_assignment(assignment_id).await?;
        self.open_loaded(assignment, viewer_id, Some(instructor_id), resubmit_requested)
            .await
    }

    /// Like [`open_session`](Self::open_session), with the instructor taken
    /// from the assignment itself. An assignment without a recorded
    /// instructor is never previewed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Load` if the assignment or the progress record
    /// cannot be fetched.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub async fn open_for_viewer(
        &self,
        assignment_id: AssignmentId,
        viewer_id: &UserId,
        resubmit_requested: bool,
    ) -> Result<ProgressSession, SessionError> {
        let assignment = self.fetch_assignment(assignment_id).await?;
        let instructor_id = assignment.instructor_id().cloned();
        self.open_loaded(assignment, viewer_id, instructor_id.as_ref(), resubmit_requested)
            .await
    }

    async fn fetch_assignment(&self, assignment_id: AssignmentId) -> Result<Assignment, SessionError> {
        self.assignments
            .fetch_assignment(assignment_id)
            .await
            .map_err(SessionError::Load)
    }

    async fn open_loaded(
        &self,
        assignment: Assignment,
        viewer_id: &UserId,
        instructor_id: Option<&UserId>,
        resubmit_requested: bool,
    ) -> Result<ProgressSession, SessionError> {
        let runtime = Handle::current();
        let assignment_id = assignment.id();
        let is_instructor_preview = instructor_id == Some(viewer_id);
        let record = if is_instructor_preview {
            ProgressRecord::empty(assignment_id, viewer_id.clone())
        } else {
            self.progress
                .fetch_progress(assignment_id, viewer_id)
                .await
                .map_err(SessionError::Load)?
                .unwrap_or_else(|| ProgressRecord::empty(assignment_id, viewer_id.clone()))
        };

        let question_count = self.question_count(&assignment).await;
        tracing::info!(
            %assignment_id,
            student = %viewer_id,
            preview = is_instructor_preview,
            submitted = record.submitted,
            resubmit_requested,
            question_count,
            "progress session opened"
        );

        Ok(ProgressSession::new(
            self.config,
            assignment,
            viewer_id.clone(),
            question_count,
            record,
            resubmit_requested,
            is_instructor_preview,
            Arc::clone(&self.progress),
            runtime,
        ))
    }

    async fn question_count(&self, assignment: &Assignment) -> usize {
        let ids = assignment.question_ids();
        if ids.is_empty() {
            return 0;
        }
        match self.questions.fetch_questions_batch(ids).await {
            Ok(found) => found.len(),
            Err(err) => {
                tracing::warn!(
                    assignment_id = %assignment.id(),
                    error = %err,
                    "question lookup failed, using assignment question list"
                );
                ids.len()
            }
        }
    }
}
