use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use course_core::model::{
    Answers, Assignment, AssignmentId, ProgressRecord, ProgressUpdate, QuestionId, UserId,
    clamp_question_index,
};
use storage::repository::ProgressRepository;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::autosave::{AutosaveJob, Autosaver};
use crate::config::SessionConfig;
use crate::error::SessionError;

//
// ─── LIFECYCLE ─────────────────────────────────────────────────────────────────
//

/// What ended the visit. Every trigger leads to the same single terminal save.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseTrigger {
    ExplicitClose,
    TabHide,
    TabClose,
    Teardown,
}

/// Observable session state. Loading is the `open_session` future itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Exiting,
    Submitted,
    Abandoned,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One student's visit to one assignment.
///
/// Owns the live edit buffer, the autosave debouncer, and the one-shot exit
/// guard. Dropping an open session acts as [`CloseTrigger::Teardown`].
pub struct ProgressSession {
    assignment: Assignment,
    student_id: UserId,
    question_count: usize,
    live_answers: Answers,
    live_question_index: usize,
    initial_submitted: bool,
    resubmit_requested: bool,
    is_instructor_preview: bool,
    state: SessionState,
    exit_guard: Arc<AtomicBool>,
    autosave: Autosaver,
    progress: Arc<dyn ProgressRepository>,
    runtime: Handle,
}

impl ProgressSession {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        config: SessionConfig,
        assignment: Assignment,
        student_id: UserId,
        question_count: usize,
        record: ProgressRecord,
        resubmit_requested: bool,
        is_instructor_preview: bool,
        progress: Arc<dyn ProgressRepository>,
        runtime: Handle,
    ) -> Self {
        Self {
            assignment,
            student_id,
            question_count,
            live_question_index: clamp_question_index(record.current_question_index, question_count),
            live_answers: record.answers,
            initial_submitted: record.submitted && !resubmit_requested,
            resubmit_requested,
            is_instructor_preview,
            state: SessionState::Active,
            exit_guard: Arc::new(AtomicBool::new(false)),
            autosave: Autosaver::new(config.autosave_delay),
            progress,
            runtime,
        }
    }

    #[must_use]
    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    #[must_use]
    pub fn student_id(&self) -> &UserId {
        &self.student_id
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.question_count
    }

    #[must_use]
    pub fn live_answers(&self) -> &Answers {
        &self.live_answers
    }

    #[must_use]
    pub fn live_question_index(&self) -> usize {
        self.live_question_index
    }

    /// True when the visit opened on a finished submission without a resubmit request.
    #[must_use]
    pub fn initial_submitted(&self) -> bool {
        self.initial_submitted
    }

    #[must_use]
    pub fn resubmit_requested(&self) -> bool {
        self.resubmit_requested
    }

    #[must_use]
    pub fn is_instructor_preview(&self) -> bool {
        self.is_instructor_preview
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.initial_submitted
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn persists(&self) -> bool {
        !self.is_instructor_preview && !self.is_read_only()
    }

    /// Replace the edit buffer and (re)arm the autosave timer.
    ///
    /// The buffer updates immediately; the index is clamped to the question
    /// range. Edits after the session has started exiting are ignored.
    pub fn record_edit(&mut self, answers: Answers, question_index: usize) {
        if self.state != SessionState::Active {
            tracing::debug!(state = ?self.state, "edit ignored, session closed");
            return;
        }

        self.live_answers = answers;
        self.live_question_index = clamp_question_index(question_index, self.question_count);
        if !self.persists() {
            return;
        }

        self.autosave.schedule(
            &self.runtime,
            AutosaveJob {
                progress: Arc::clone(&self.progress),
                assignment_id: self.assignment.id(),
                student_id: self.student_id.clone(),
                update: ProgressUpdate::autosave(
                    self.live_answers.clone(),
                    self.live_question_index,
                ),
                exit_guard: Arc::clone(&self.exit_guard),
            },
        );
    }

    /// Set one answer, keeping the current question index.
    pub fn set_answer(&mut self, question_id: QuestionId, value: impl Into<String>) {
        let mut answers = self.live_answers.clone();
        answers.insert(question_id, value.into());
        self.record_edit(answers, self.live_question_index);
    }

    /// Move to another question, keeping the answers.
    pub fn go_to_question(&mut self, question_index: usize) {
        let answers = self.live_answers.clone();
        self.record_edit(answers, question_index);
    }

    /// End the visit with a single terminal save of the live buffer.
    ///
    /// Returns `None` without writing when the session already exited, is an
    /// instructor preview, or opened read-only. A failed save is logged and
    /// also yields `None`; it is not retried. The save runs as its own task,
    /// so it still completes if this future is dropped mid-flight.
    pub async fn close_session(&mut self, trigger: CloseTrigger) -> Option<ProgressRecord> {
        let handle = self.begin_exit(trigger)?;
        match handle.await {
            Ok(Some(record)) => {
                self.state = SessionState::Submitted;
                Some(record)
            }
            Ok(None) => {
                self.state = SessionState::Abandoned;
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "final submit task did not complete");
                self.state = SessionState::Abandoned;
                None
            }
        }
    }

    /// Latch the exit guard and dispatch the terminal save, if one is due.
    fn begin_exit(&mut self, trigger: CloseTrigger) -> Option<JoinHandle<Option<ProgressRecord>>> {
        if self.exit_guard.swap(true, Ordering::AcqRel) {
            tracing::debug!(?trigger, "exit already handled");
            return None;
        }
        self.autosave.cancel_all();

        if !self.persists() {
            tracing::debug!(
                ?trigger,
                preview = self.is_instructor_preview,
                read_only = self.is_read_only(),
                "close without submit"
            );
            self.state = SessionState::Abandoned;
            return None;
        }

        self.state = SessionState::Exiting;
        let update = ProgressUpdate::submit(self.live_answers.clone(), self.live_question_index);
        Some(self.runtime.spawn(terminal_save(
            Arc::clone(&self.progress),
            self.assignment.id(),
            self.student_id.clone(),
            update,
            trigger,
            self.resubmit_requested,
        )))
    }
}

async fn terminal_save(
    progress: Arc<dyn ProgressRepository>,
    assignment_id: AssignmentId,
    student_id: UserId,
    update: ProgressUpdate,
    trigger: CloseTrigger,
    resubmission: bool,
) -> Option<ProgressRecord> {
    match progress
        .save_progress(assignment_id, &student_id, &update)
        .await
        .map_err(SessionError::ExitSave)
    {
        Ok(record) => {
            tracing::info!(
                %assignment_id,
                ?trigger,
                resubmission,
                submitted_at = ?record.submitted_at,
                "assignment submitted"
            );
            Some(record)
        }
        Err(err) => {
            tracing::warn!(%assignment_id, ?trigger, error = %err, "final submit lost");
            None
        }
    }
}

impl Drop for ProgressSession {
    fn drop(&mut self) {
        // The handle is detached; the save finishes on the runtime if it can.
        let _ = self.begin_exit(CloseTrigger::Teardown);
    }
}

impl fmt::Debug for ProgressSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSession")
            .field("assignment_id", &self.assignment.id())
            .field("student_id", &self.student_id)
            .field("question_count", &self.question_count)
            .field("answers_len", &self.live_answers.len())
            .field("live_question_index", &self.live_question_index)
            .field("initial_submitted", &self.initial_submitted)
            .field("is_instructor_preview", &self.is_instructor_preview)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
