use std::sync::Arc;

use course_core::model::{Assignment, AssignmentId};
use course_core::status::StatusResult;
use storage::repository::AssignmentRepository;

use crate::Clock;
use crate::error::AssignmentStatusError;

/// Loads assignments and evaluates their status against the service clock.
#[derive(Clone)]
pub struct AssignmentStatusService {
    clock: Clock,
    assignments: Arc<dyn AssignmentRepository>,
}

impl AssignmentStatusService {
    #[must_use]
    pub fn new(clock: Clock, assignments: Arc<dyn AssignmentRepository>) -> Self {
        Self { clock, assignments }
    }

    /// Evaluate an already-loaded assignment at the clock's current time.
    #[must_use]
    pub fn status_of(&self, assignment: &Assignment) -> StatusResult {
        assignment.status_at(self.clock.now())
    }

    /// Fetch an assignment and evaluate its status.
    ///
    /// # Errors
    ///
    /// Returns `AssignmentStatusError::Storage` if the assignment cannot be loaded.
    pub async fn load(
        &self,
        id: AssignmentId,
    ) -> Result<(Assignment, StatusResult), AssignmentStatusError> {
        let assignment = self.assignments.fetch_assignment(id).await?;
        let status = self.status_of(&assignment);
        Ok((assignment, status))
    }

    /// Release an assignment immediately and return its new status.
    ///
    /// # Errors
    ///
    /// Returns `AssignmentStatusError::Storage` if the backend rejects the release.
    pub async fn release_now(
        &self,
        id: AssignmentId,
    ) -> Result<(Assignment, StatusResult), AssignmentStatusError> {
        let assignment = self.assignments.release_now(id).await?;
        tracing::info!(assignment_id = %id, "assignment released");
        let status = self.status_of(&assignment);
        Ok((assignment, status))
    }
}
