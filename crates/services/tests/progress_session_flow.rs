use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use course_core::model::{
    Answers, Assignment, AssignmentId, ProgressRecord, ProgressUpdate, Question, QuestionId,
    UserId,
};
use course_core::time::fixed_now;
use services::{
    Clock, CloseTrigger, ProgressSessionService, SessionConfig, SessionError, SessionState,
};
use storage::repository::{
    InMemoryRepository, ProgressRepository, QuestionRepository, StorageError,
};

const ASSIGNMENT: u64 = 1;

fn student() -> UserId {
    UserId::new("student-1")
}

fn instructor() -> UserId {
    UserId::new("instructor-1")
}

fn answers(pairs: &[(u64, &str)]) -> Answers {
    pairs
        .iter()
        .map(|(id, text)| (QuestionId::new(*id), (*text).to_owned()))
        .collect()
}

/// Progress store that records every completed save and can be slowed down or broken.
struct RecordingProgress {
    inner: InMemoryRepository,
    calls: AtomicUsize,
    saves: Mutex<Vec<ProgressUpdate>>,
    latency: Duration,
    fail_fetch: AtomicBool,
    fail_autosave: AtomicBool,
    fail_submit: AtomicBool,
}

impl RecordingProgress {
    fn new(inner: InMemoryRepository) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            saves: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            fail_fetch: AtomicBool::new(false),
            fail_autosave: AtomicBool::new(false),
            fail_submit: AtomicBool::new(false),
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn saves(&self) -> Vec<ProgressUpdate> {
        self.saves.lock().unwrap().clone()
    }

    fn terminal_saves(&self) -> usize {
        self.saves().iter().filter(|u| u.is_terminal()).count()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressRepository for RecordingProgress {
    async fn fetch_progress(
        &self,
        assignment_id: AssignmentId,
        student_id: &UserId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("backend unavailable".into()));
        }
        self.inner.fetch_progress(assignment_id, student_id).await
    }

    async fn save_progress(
        &self,
        assignment_id: AssignmentId,
        student_id: &UserId,
        update: &ProgressUpdate,
    ) -> Result<ProgressRecord, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failing = if update.is_terminal() {
            &self.fail_submit
        } else {
            &self.fail_autosave
        };
        if failing.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("backend unavailable".into()));
        }
        let record = self
            .inner
            .save_progress(assignment_id, student_id, update)
            .await?;
        self.saves.lock().unwrap().push(update.clone());
        Ok(record)
    }
}

/// Question store whose batch endpoint is down.
struct UnavailableQuestions;

#[async_trait]
impl QuestionRepository for UnavailableQuestions {
    async fn fetch_questions_batch(
        &self,
        _ids: &[QuestionId],
    ) -> Result<Vec<Question>, StorageError> {
        Err(StorageError::HttpStatus(503))
    }
}

fn seeded_repo() -> InMemoryRepository {
    let repo = InMemoryRepository::new().with_clock(Clock::fixed(fixed_now()));
    for id in 1..=3 {
        repo.upsert_question(&Question::new(QuestionId::new(id), None, format!("Q{id}")))
            .unwrap();
    }
    let now = fixed_now();
    let assignment = Assignment::new(AssignmentId::new(ASSIGNMENT), "Week 1 quiz")
        .with_instructor(instructor())
        .with_schedule(
            Some(now - chrono::Duration::days(1)),
            Some(now + chrono::Duration::days(2)),
            Some(now + chrono::Duration::days(4)),
        )
        .with_questions((1..=3).map(QuestionId::new).collect());
    repo.upsert_assignment(&assignment).unwrap();
    repo
}

fn service_for(repo: &InMemoryRepository, progress: Arc<RecordingProgress>) -> ProgressSessionService {
    ProgressSessionService::new(
        SessionConfig::default(),
        Arc::new(repo.clone()),
        progress,
        Arc::new(repo.clone()),
    )
}

async fn submit_directly(repo: &InMemoryRepository, submitted: Answers) -> ProgressRecord {
    repo.save_progress(
        AssignmentId::new(ASSIGNMENT),
        &student(),
        &ProgressUpdate::submit(submitted, 0),
    )
    .await
    .unwrap()
}

/// Let every timer and spawned save run to completion under paused time.
async fn settle() {
    tokio::time::sleep(Duration::from_secs(10)).await;
}

#[tokio::test(start_paused = true)]
async fn open_without_record_starts_empty_and_editable() {
    let repo = seeded_repo();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));

    let session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap();

    assert!(session.live_answers().is_empty());
    assert_eq!(session.live_question_index(), 0);
    assert_eq!(session.question_count(), 3);
    assert!(!session.initial_submitted());
    assert!(!session.is_instructor_preview());
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.assignment().title(), "Week 1 quiz");
}

#[tokio::test(start_paused = true)]
async fn missing_assignment_fails_to_load() {
    let repo = seeded_repo();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));

    let err = service
        .open_session(AssignmentId::new(404), &student(), &instructor(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Load(StorageError::NotFound)));
}

#[tokio::test(start_paused = true)]
async fn failed_progress_fetch_fails_to_load() {
    let repo = seeded_repo();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    progress.fail_fetch.store(true, Ordering::SeqCst);
    let service = service_for(&repo, Arc::clone(&progress));

    let err = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Load(StorageError::Connection(_))));
    assert_eq!(progress.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn question_lookup_failure_falls_back_to_assignment_list() {
    let repo = seeded_repo();
    repo.save_progress(
        AssignmentId::new(ASSIGNMENT),
        &student(),
        &ProgressUpdate::autosave(Answers::new(), 9),
    )
    .await
    .unwrap();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = ProgressSessionService::new(
        SessionConfig::default(),
        Arc::new(repo.clone()),
        progress,
        Arc::new(UnavailableQuestions),
    );

    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap();
    assert_eq!(session.question_count(), 3);
    assert_eq!(session.live_question_index(), 2);
    session.go_to_question(42);
    assert_eq!(session.live_question_index(), 2);
}

#[tokio::test(start_paused = true)]
async fn stored_instructor_decides_preview() {
    let repo = seeded_repo();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));

    let mut owner = service
        .open_for_viewer(AssignmentId::new(ASSIGNMENT), &instructor(), false)
        .await
        .unwrap();
    assert!(owner.is_instructor_preview());
    owner.set_answer(QuestionId::new(1), "preview");
    assert!(owner.close_session(CloseTrigger::ExplicitClose).await.is_none());
    assert_eq!(progress.calls(), 0);

    let mut student_session = service
        .open_for_viewer(AssignmentId::new(ASSIGNMENT), &student(), false)
        .await
        .unwrap();
    assert!(!student_session.is_instructor_preview());
    student_session.set_answer(QuestionId::new(1), "answer");
    assert!(
        student_session
            .close_session(CloseTrigger::ExplicitClose)
            .await
            .is_some()
    );
    assert_eq!(progress.terminal_saves(), 1);
}

#[tokio::test(start_paused = true)]
async fn assignment_without_instructor_is_never_previewed() {
    let repo = seeded_repo();
    repo.upsert_assignment(&Assignment::new(AssignmentId::new(2), "Unowned"))
        .unwrap();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));

    let session = service
        .open_for_viewer(AssignmentId::new(2), &instructor(), false)
        .await
        .unwrap();
    assert!(!session.is_instructor_preview());
    assert_eq!(session.question_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_coalesce_into_one_autosave() {
    let repo = seeded_repo();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));
    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap();

    session.set_answer(QuestionId::new(1), "a");
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.set_answer(QuestionId::new(1), "ab");
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.record_edit(answers(&[(1, "abc"), (2, "x")]), 1);
    assert_eq!(session.live_answers(), &answers(&[(1, "abc"), (2, "x")]));
    settle().await;

    let saves = progress.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].answers, answers(&[(1, "abc"), (2, "x")]));
    assert_eq!(saves[0].current_question_index, 1);
    assert_eq!(saves[0].submitted, None);
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test(start_paused = true)]
async fn autosave_after_reopen_keeps_prior_submission() {
    let repo = seeded_repo();
    let first = submit_directly(&repo, answers(&[(1, "old")])).await;
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));

    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), true)
        .await
        .unwrap();
    assert!(!session.initial_submitted());
    assert_eq!(session.live_answers(), &answers(&[(1, "old")]));

    session.set_answer(QuestionId::new(1), "new");
    settle().await;

    let stored = repo
        .fetch_progress(AssignmentId::new(ASSIGNMENT), &student())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.submitted);
    assert_eq!(stored.submitted_at, first.submitted_at);
    assert_eq!(stored.answers, answers(&[(1, "new")]));
    drop(session);
}

#[tokio::test(start_paused = true)]
async fn every_exit_trigger_after_the_first_is_a_no_op() {
    let repo = seeded_repo();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));
    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap();

    session.set_answer(QuestionId::new(2), "42");
    let record = session
        .close_session(CloseTrigger::ExplicitClose)
        .await
        .expect("terminal save");
    assert!(record.submitted);
    assert_eq!(record.submitted_at, Some(fixed_now()));
    assert_eq!(session.state(), SessionState::Submitted);

    assert!(session.close_session(CloseTrigger::TabHide).await.is_none());
    assert!(session.close_session(CloseTrigger::TabClose).await.is_none());
    drop(session);
    settle().await;

    assert_eq!(progress.terminal_saves(), 1);
    assert_eq!(progress.saves().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn instructor_preview_never_saves() {
    let repo = seeded_repo();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));
    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &instructor(), &instructor(), false)
        .await
        .unwrap();
    assert!(session.is_instructor_preview());

    session.set_answer(QuestionId::new(1), "trying it out");
    session.go_to_question(2);
    settle().await;
    assert!(session.close_session(CloseTrigger::TabClose).await.is_none());
    assert_eq!(session.state(), SessionState::Abandoned);
    drop(session);
    settle().await;

    assert_eq!(progress.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn finished_submission_opens_read_only() {
    let repo = seeded_repo();
    submit_directly(&repo, answers(&[(1, "final")])).await;
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));

    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap();
    assert!(session.initial_submitted());
    assert!(session.is_read_only());

    session.set_answer(QuestionId::new(1), "changed my mind");
    settle().await;
    assert!(session.close_session(CloseTrigger::ExplicitClose).await.is_none());
    drop(session);
    settle().await;

    assert_eq!(progress.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn resubmission_writes_a_fresh_submitted_at() {
    let repo = seeded_repo();
    let first = submit_directly(&repo, answers(&[(1, "v1")])).await;

    let later = fixed_now() + chrono::Duration::hours(3);
    let later_repo = repo.clone().with_clock(Clock::fixed(later));
    let progress = Arc::new(RecordingProgress::new(later_repo));
    let service = service_for(&repo, Arc::clone(&progress));

    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), true)
        .await
        .unwrap();
    assert!(session.resubmit_requested());
    session.set_answer(QuestionId::new(1), "v2");

    let record = session
        .close_session(CloseTrigger::ExplicitClose)
        .await
        .expect("resubmitted");
    assert_eq!(first.submitted_at, Some(fixed_now()));
    assert_eq!(record.submitted_at, Some(later));
    assert_eq!(record.answers, answers(&[(1, "v2")]));
}

#[tokio::test(start_paused = true)]
async fn close_aborts_autosave_in_flight() {
    let repo = seeded_repo();
    let progress =
        Arc::new(RecordingProgress::new(repo.clone()).with_latency(Duration::from_secs(2)));
    let service = service_for(&repo, Arc::clone(&progress));
    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap();

    session.set_answer(QuestionId::new(1), "draft");
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(progress.calls(), 1);

    session.set_answer(QuestionId::new(1), "final");
    let record = session
        .close_session(CloseTrigger::TabClose)
        .await
        .expect("terminal save");
    settle().await;

    assert_eq!(record.answers, answers(&[(1, "final")]));
    let saves = progress.saves();
    assert_eq!(saves.len(), 1);
    assert!(saves[0].is_terminal());

    let stored = repo
        .fetch_progress(AssignmentId::new(ASSIGNMENT), &student())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.answers, answers(&[(1, "final")]));
}

#[tokio::test(start_paused = true)]
async fn dropping_an_open_session_submits_once() {
    let repo = seeded_repo();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));
    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap();

    session.record_edit(answers(&[(3, "c")]), 2);
    drop(session);
    settle().await;

    let saves = progress.saves();
    assert_eq!(saves.len(), 1);
    assert!(saves[0].is_terminal());
    assert_eq!(saves[0].answers, answers(&[(3, "c")]));
    assert_eq!(saves[0].current_question_index, 2);
}

#[tokio::test(start_paused = true)]
async fn autosave_failure_is_swallowed() {
    let repo = seeded_repo();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    progress.fail_autosave.store(true, Ordering::SeqCst);
    let service = service_for(&repo, Arc::clone(&progress));
    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap();

    session.set_answer(QuestionId::new(1), "a");
    settle().await;
    assert_eq!(progress.calls(), 1);
    assert_eq!(session.state(), SessionState::Active);

    let record = session.close_session(CloseTrigger::ExplicitClose).await;
    assert!(record.is_some());
    assert_eq!(progress.terminal_saves(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_final_submit_is_not_retried() {
    let repo = seeded_repo();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    progress.fail_submit.store(true, Ordering::SeqCst);
    let service = service_for(&repo, Arc::clone(&progress));
    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap();

    session.set_answer(QuestionId::new(1), "a");
    assert!(session.close_session(CloseTrigger::ExplicitClose).await.is_none());
    assert_eq!(session.state(), SessionState::Abandoned);
    assert!(session.close_session(CloseTrigger::TabClose).await.is_none());
    drop(session);
    settle().await;

    assert_eq!(progress.calls(), 1);
    assert!(progress.saves().is_empty());
}

#[tokio::test(start_paused = true)]
async fn question_index_is_clamped_on_load_and_edit() {
    let repo = seeded_repo();
    repo.save_progress(
        AssignmentId::new(ASSIGNMENT),
        &student(),
        &ProgressUpdate::autosave(Answers::new(), 7),
    )
    .await
    .unwrap();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));

    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap();
    assert_eq!(session.live_question_index(), 2);

    session.go_to_question(0);
    assert_eq!(session.live_question_index(), 0);
    session.go_to_question(99);
    assert_eq!(session.live_question_index(), 2);
}

#[tokio::test(start_paused = true)]
async fn edits_after_close_are_ignored() {
    let repo = seeded_repo();
    let progress = Arc::new(RecordingProgress::new(repo.clone()));
    let service = service_for(&repo, Arc::clone(&progress));
    let mut session = service
        .open_session(AssignmentId::new(ASSIGNMENT), &student(), &instructor(), false)
        .await
        .unwrap();

    session.set_answer(QuestionId::new(1), "kept");
    session.close_session(CloseTrigger::ExplicitClose).await;
    session.set_answer(QuestionId::new(1), "ignored");
    settle().await;

    assert_eq!(session.live_answers(), &answers(&[(1, "kept")]));
    assert_eq!(progress.saves().len(), 1);
}
