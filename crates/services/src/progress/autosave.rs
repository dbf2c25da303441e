use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use course_core::model::{AssignmentId, ProgressUpdate, UserId};
use storage::repository::ProgressRepository;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::SessionError;

/// One debounced, non-terminal save of the edit buffer.
pub(super) struct AutosaveJob {
    pub(super) progress: Arc<dyn ProgressRepository>,
    pub(super) assignment_id: AssignmentId,
    pub(super) student_id: UserId,
    pub(super) update: ProgressUpdate,
    pub(super) exit_guard: Arc<AtomicBool>,
}

struct PendingSave {
    handle: JoinHandle<()>,
    dispatched: Arc<AtomicBool>,
}

/// Last-write-wins debouncer for autosaves.
///
/// A new edit aborts a save still waiting on its timer. A save whose request
/// is already on the wire is left to finish, and the write lane keeps it
/// ahead of the next one. Everything is aborted when the session exits.
pub(super) struct Autosaver {
    delay: Duration,
    pending: Option<PendingSave>,
    in_flight: Vec<JoinHandle<()>>,
    lane: Arc<Mutex<()>>,
}

impl Autosaver {
    pub(super) fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            in_flight: Vec::new(),
            lane: Arc::new(Mutex::new(())),
        }
    }

    /// Replace any pending save with `job`, fired after the debounce delay.
    pub(super) fn schedule(&mut self, runtime: &Handle, job: AutosaveJob) {
        self.in_flight.retain(|handle| !handle.is_finished());
        if let Some(previous) = self.pending.take() {
            if previous.dispatched.load(Ordering::Acquire) {
                self.in_flight.push(previous.handle);
            } else {
                previous.handle.abort();
            }
        }

        let dispatched = Arc::new(AtomicBool::new(false));
        let handle = runtime.spawn(job.run(
            self.delay,
            Arc::clone(&self.lane),
            Arc::clone(&dispatched),
        ));
        self.pending = Some(PendingSave { handle, dispatched });
    }

    /// Abort the pending timer and every request still in flight.
    pub(super) fn cancel_all(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
        }
        for handle in self.in_flight.drain(..) {
            handle.abort();
        }
    }
}

impl AutosaveJob {
    async fn run(self, delay: Duration, lane: Arc<Mutex<()>>, dispatched: Arc<AtomicBool>) {
        tokio::time::sleep(delay).await;
        let _turn = lane.lock().await;
        if self.exit_guard.load(Ordering::Acquire) {
            tracing::debug!(assignment_id = %self.assignment_id, "autosave skipped, session exiting");
            return;
        }

        dispatched.store(true, Ordering::Release);
        let result = self
            .progress
            .save_progress(self.assignment_id, &self.student_id, &self.update)
            .await;

        match result {
            Ok(_) if self.exit_guard.load(Ordering::Acquire) => {
                tracing::debug!(
                    assignment_id = %self.assignment_id,
                    "autosave response arrived after exit, discarded"
                );
            }
            Ok(record) => {
                tracing::debug!(
                    assignment_id = %self.assignment_id,
                    answers = record.answers.len(),
                    index = record.current_question_index,
                    "progress autosaved"
                );
            }
            Err(err) => {
                let err = SessionError::Autosave(err);
                tracing::warn!(assignment_id = %self.assignment_id, error = %err, "autosave dropped");
            }
        }
    }
}
