use async_trait::async_trait;
use course_core::Clock;
use course_core::model::{
    Assignment, AssignmentId, ProgressRecord, ProgressUpdate, Question, QuestionId, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("forbidden")]
    Forbidden,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("request failed with status {0}")]
    HttpStatus(u16),
}

/// Read access to assignments, plus the instructor "release now" action.
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Fetch an assignment by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn fetch_assignment(&self, id: AssignmentId) -> Result<Assignment, StorageError>;

    /// Set the release timestamp to the backend's current time.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn release_now(&self, id: AssignmentId) -> Result<Assignment, StorageError>;
}

/// One progress record per assignment x student.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the student's progress. A student who never saved has `None`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be read.
    async fn fetch_progress(
        &self,
        assignment_id: AssignmentId,
        student_id: &UserId,
    ) -> Result<Option<ProgressRecord>, StorageError>;

    /// Upsert the student's progress and return the stored record.
    ///
    /// See [`ProgressRecord::apply`] for how `submitted` is merged.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be written.
    async fn save_progress(
        &self,
        assignment_id: AssignmentId,
        student_id: &UserId,
        update: &ProgressUpdate,
    ) -> Result<ProgressRecord, StorageError>;
}

#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Fetch questions in the order of `ids`. Unknown IDs are skipped.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the batch cannot be read.
    async fn fetch_questions_batch(&self, ids: &[QuestionId])
    -> Result<Vec<Question>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    clock: Clock,
    assignments: Arc<Mutex<HashMap<AssignmentId, Assignment>>>,
    progress: Arc<Mutex<HashMap<(AssignmentId, UserId), ProgressRecord>>>,
    questions: Arc<Mutex<HashMap<QuestionId, Question>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Persist or replace an assignment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn upsert_assignment(&self, assignment: &Assignment) -> Result<(), StorageError> {
        let mut guard = self
            .assignments
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(assignment.id(), assignment.clone());
        Ok(())
    }

    /// Persist or replace a question.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let mut guard = self
            .questions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(question.id(), question.clone());
        Ok(())
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryRepository {
    async fn fetch_assignment(&self, id: AssignmentId) -> Result<Assignment, StorageError> {
        let guard = self
            .assignments
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn release_now(&self, id: AssignmentId) -> Result<Assignment, StorageError> {
        let mut guard = self
            .assignments
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let assignment = guard.get_mut(&id).ok_or(StorageError::NotFound)?;
        assignment.release(self.clock.now());
        Ok(assignment.clone())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn fetch_progress(
        &self,
        assignment_id: AssignmentId,
        student_id: &UserId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(assignment_id, student_id.clone())).cloned())
    }

    async fn save_progress(
        &self,
        assignment_id: AssignmentId,
        student_id: &UserId,
        update: &ProgressUpdate,
    ) -> Result<ProgressRecord, StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let record = guard
            .entry((assignment_id, student_id.clone()))
            .or_insert_with(|| ProgressRecord::empty(assignment_id, student_id.clone()));
        record.apply(update, self.clock.now());
        Ok(record.clone())
    }
}

#[async_trait]
impl QuestionRepository for InMemoryRepository {
    async fn fetch_questions_batch(
        &self,
        ids: &[QuestionId],
    ) -> Result<Vec<Question>, StorageError> {
        let guard = self
            .questions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub assignments: Arc<dyn AssignmentRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub questions: Arc<dyn QuestionRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(InMemoryRepository::new())
    }

    #[must_use]
    pub fn from_in_memory(repo: InMemoryRepository) -> Self {
        let assignments: Arc<dyn AssignmentRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let questions: Arc<dyn QuestionRepository> = Arc::new(repo);
        Self {
            assignments,
            progress,
            questions,
        }
    }
}
