use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use time::Duration as TimeDuration;
use tracing::{info, warn};

use crate::core::time::primitive_now_utc;
use crate::db::models::{Exam, ExamAttempt};
use crate::engine::monitor::{IntegrityMonitor, IntegritySignal};
use crate::engine::navigator::{NavError, Navigator, Phase, QuestionKey, SubmitDecision};
use crate::engine::timer::CountdownTimer;
use crate::store::{AnswerSelection, QuestionBundle, ScoreSheet, StoreError, Stores};


#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error(transparent)]
    Nav(#[from] NavError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinalizeTrigger {
    ManualSubmit,
    Deadline,
}

impl FinalizeTrigger {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::ManualSubmit => "manual_submit",
            Self::Deadline => "deadline",
        }
    }
}

/// Guards finalization. `InFlight` and `Done` swallow repeat triggers;
/// a transient store failure returns the latch to `Idle` so the student
/// can submit again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalizeLatch {
    Idle,
    InFlight,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionOutcome {
    Scored { sheet: ScoreSheet, trigger: FinalizeTrigger },
    Annulled(IntegritySignal),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum NavAction {
    Previous,
    Next,
    Jump(usize),
    Summary,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SubmitOutcome {
    IncompleteWarning { unanswered: usize },
    Finalized,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SignalOutcome {
    Annulled,
    Ignored,
}

#[derive(Debug, Clone)]
pub(crate) struct SessionSnapshot {
    pub(crate) phase: Phase,
    pub(crate) question_count: usize,
    pub(crate) answered: BTreeSet<String>,
    pub(crate) remaining_seconds: Option<i64>,
    pub(crate) outcome: Option<SessionOutcome>,
}

struct SessionInner {
    nav: Navigator,
    latch: FinalizeLatch,
    /// Answer batch frozen when finalization first proceeds. A retry after a
    /// transient failure resubmits this batch, so selections changed after the
    /// row was closed never reach the store.
    pending_answers: Option<Vec<AnswerSelection>>,
    outcome: Option<SessionOutcome>,
}

/// One live exam attempt held in memory. All interaction goes through the
/// inner mutex, which is held across the finalize writes so that a deadline
/// expiry, a manual submit and an integrity signal serialize against each
/// other instead of racing.
pub(crate) struct ExamSession {
    attempt: ExamAttempt,
    exam: Exam,
    questions: Vec<QuestionBundle>,
    stores: Stores,
    monitor: IntegrityMonitor,
    timer: Mutex<Option<CountdownTimer>>,
    auto_advance_delay: Duration,
    /// Mirrors `latch == Done` for lock-free reads by the registry and reaper.
    settled: AtomicBool,
    inner: tokio::sync::Mutex<SessionInner>,
}

impl ExamSession {
    /// A session only exists after consent, so the navigator is moved past
    /// `AwaitingConsent` right away.
    pub(crate) fn new(
        attempt: ExamAttempt,
        exam: Exam,
        questions: Vec<QuestionBundle>,
        stores: Stores,
        auto_advance_delay: Duration,
    ) -> Arc<Self> {
        let keys = questions
            .iter()
            .map(|bundle| QuestionKey {
                id: bundle.question.id.clone(),
                kind: bundle.question.kind,
                option_ids: bundle.options.iter().map(|option| option.id.clone()).collect(),
            })
            .collect();
        let mut nav = Navigator::new(keys);
        nav.accept_policy();

        Arc::new(Self {
            attempt,
            exam,
            questions,
            stores,
            monitor: IntegrityMonitor::new(),
            timer: Mutex::new(None),
            auto_advance_delay,
            settled: AtomicBool::new(false),
            inner: tokio::sync::Mutex::new(SessionInner {
                nav,
                latch: FinalizeLatch::Idle,
                pending_answers: None,
                outcome: None,
            }),
        })
    }

    pub(crate) fn attempt_id(&self) -> &str {
        &self.attempt.id
    }

    pub(crate) fn student_id(&self) -> &str {
        &self.attempt.student_id
    }

    pub(crate) fn attempt(&self) -> &ExamAttempt {
        &self.attempt
    }

    pub(crate) fn exam(&self) -> &Exam {
        &self.exam
    }

    pub(crate) fn questions(&self) -> &[QuestionBundle] {
        &self.questions
    }

    /// Remaining budget for the attempt measured from `started_at`, so a
    /// resumed attempt keeps its original deadline. `None` for untimed exams.
    pub(crate) fn remaining_budget_seconds(&self) -> Option<i64> {
        if self.exam.time_limit_minutes == 0 {
            return None;
        }
        let deadline =
            self.attempt.started_at + TimeDuration::minutes(self.exam.time_limit_minutes as i64);
        let left = (deadline - primitive_now_utc()).whole_seconds();
        Some(left.max(0))
    }

    /// Starts the countdown. Must be called after the attempt row exists;
    /// untimed exams get no timer.
    pub(crate) fn start_clock(self: &Arc<Self>) {
        let Some(total) = self.remaining_budget_seconds() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let timer = CountdownTimer::start(total, move || async move {
            if let Some(session) = weak.upgrade() {
                session.finalize_on_deadline().await;
            }
        });
        *self.timer.lock().expect("timer lock") = Some(timer);
    }

    /// Stops the countdown but keeps it around so snapshots report the
    /// frozen remainder.
    fn stop_clock(&self) {
        if let Some(timer) = self.timer.lock().expect("timer lock").as_ref() {
            timer.stop();
        }
    }

    fn remaining_seconds(&self) -> Option<i64> {
        if self.exam.time_limit_minutes == 0 {
            return None;
        }
        match self.timer.lock().expect("timer lock").as_ref() {
            Some(timer) => Some(timer.remaining_seconds()),
            None => self.remaining_budget_seconds(),
        }
    }

    pub(crate) async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            phase: inner.nav.phase(),
            question_count: inner.nav.question_count(),
            answered: inner.nav.answered_question_ids(),
            remaining_seconds: self.remaining_seconds(),
            outcome: inner.outcome.clone(),
        }
    }

    /// True once the session has reached a terminal outcome and no longer
    /// owns its attempt row.
    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    pub(crate) async fn select_option(
        self: &Arc<Self>,
        question_id: &str,
        option_id: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        let auto_advance_from = {
            let mut inner = self.inner.lock().await;
            let outcome = inner.nav.select_option(question_id, option_id)?;
            outcome.auto_advance_to.map(|target| target - 1)
        };

        if let Some(from_index) = auto_advance_from {
            let weak = Arc::downgrade(self);
            let delay = self.auto_advance_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(session) = weak.upgrade() {
                    let mut inner = session.inner.lock().await;
                    inner.nav.auto_advance(from_index);
                }
            });
        }

        Ok(self.snapshot().await)
    }

    pub(crate) async fn navigate(&self, action: NavAction) -> Result<SessionSnapshot, SessionError> {
        {
            let mut inner = self.inner.lock().await;
            match action {
                NavAction::Previous => inner.nav.previous()?,
                NavAction::Next => inner.nav.next()?,
                NavAction::Jump(index) => inner.nav.jump(index)?,
                NavAction::Summary => inner.nav.to_summary()?,
            }
        }
        Ok(self.snapshot().await)
    }

    /// Manual submission. The first call with unanswered questions only arms
    /// the warning; the next one finalizes.
    pub(crate) async fn submit(&self) -> Result<SubmitOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        match inner.nav.request_submit()? {
            SubmitDecision::WarnIncomplete { unanswered } => {
                Ok(SubmitOutcome::IncompleteWarning { unanswered })
            }
            SubmitDecision::Proceed => {
                self.finalize_locked(&mut inner, FinalizeTrigger::ManualSubmit).await?;
                Ok(SubmitOutcome::Finalized)
            }
        }
    }

    async fn finalize_on_deadline(&self) {
        let mut inner = self.inner.lock().await;
        if inner.latch != FinalizeLatch::Idle || !inner.nav.begin_timeout() {
            return;
        }
        info!(attempt_id = %self.attempt.id, "attempt deadline reached, auto-submitting");
        if let Err(err) = self.finalize_locked(&mut inner, FinalizeTrigger::Deadline).await {
            warn!(
                attempt_id = %self.attempt.id,
                error = %err,
                "deadline auto-submit failed, leaving attempt for the reaper"
            );
        }
    }

    /// Persist answers, close the row, then score. The caller holds the inner
    /// lock, so nothing else can touch the session while this runs.
    async fn finalize_locked(
        &self,
        inner: &mut SessionInner,
        trigger: FinalizeTrigger,
    ) -> Result<(), SessionError> {
        if inner.latch != FinalizeLatch::Idle {
            return Ok(());
        }
        inner.latch = FinalizeLatch::InFlight;
        self.stop_clock();

        // Freeze the batch on the first pass so a retry after a transient
        // failure submits what the student had when they asked to finish.
        let answers = match &inner.pending_answers {
            Some(batch) => batch.clone(),
            None => {
                let batch = inner.nav.selections_for_submit();
                inner.pending_answers = Some(batch.clone());
                batch
            }
        };
        let auto = trigger == FinalizeTrigger::Deadline;
        let written: Result<ScoreSheet, StoreError> = async {
            if !answers.is_empty() {
                self.stores.attempts.save_answers(&self.attempt.id, &answers).await?;
            }
            self.stores
                .attempts
                .mark_submitted(&self.attempt.id, primitive_now_utc(), auto)
                .await?;
            self.stores.scorer.compute_score(&self.attempt.id).await
        }
        .await;

        match written {
            Ok(sheet) => {
                inner.latch = FinalizeLatch::Done;
                self.settled.store(true, Ordering::SeqCst);
                inner.nav.complete();
                inner.outcome = Some(SessionOutcome::Scored { sheet, trigger });
                self.monitor.disarm();
                metrics::counter!("attempts_finalized_total", "trigger" => trigger.as_str())
                    .increment(1);
                info!(
                    attempt_id = %self.attempt.id,
                    trigger = trigger.as_str(),
                    passed = sheet.passed,
                    "attempt finalized"
                );
                Ok(())
            }
            Err(err) => {
                inner.latch = FinalizeLatch::Idle;
                inner.nav.finalize_failed();
                warn!(attempt_id = %self.attempt.id, error = %err, "finalization failed");
                Err(err.into())
            }
        }
    }

    /// First integrity signal annuls the attempt. The in-memory verdict is
    /// authoritative even if the store write fails; the reaper closes the row
    /// later in that case.
    pub(crate) async fn report_signal(
        &self,
        signal: IntegritySignal,
    ) -> Result<SignalOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.latch == FinalizeLatch::Done || !self.monitor.trip() {
            return Ok(SignalOutcome::Ignored);
        }

        inner.nav.invalidate();
        inner.latch = FinalizeLatch::Done;
        self.settled.store(true, Ordering::SeqCst);
        inner.outcome = Some(SessionOutcome::Annulled(signal));
        self.stop_clock();
        metrics::counter!("attempts_annulled_total", "signal" => signal.as_str()).increment(1);
        info!(
            attempt_id = %self.attempt.id,
            signal = signal.as_str(),
            "integrity signal received, attempt annulled"
        );

        if let Err(err) = self
            .stores
            .attempts
            .annul_attempt(&self.attempt.id, signal.description(), primitive_now_utc())
            .await
        {
            warn!(
                attempt_id = %self.attempt.id,
                error = %err,
                "annulment write failed, attempt row stays open until reaped"
            );
        }

        Ok(SignalOutcome::Annulled)
    }

    /// Detaches timer and monitor without touching the attempt row.
    pub(crate) fn teardown(&self) {
        self.stop_clock();
        self.monitor.disarm();
    }
}
