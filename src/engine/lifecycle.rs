use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::core::time::primitive_now_utc;
use crate::db::models::ExamAttempt;
use crate::db::types::ExamStatus;
use crate::engine::registry::SessionRegistry;
use crate::engine::session::ExamSession;
use crate::store::{NewAttempt, StoreError, Stores};

/// Why a student may not enter an exam. Checked in this order, first failure
/// wins.
#[derive(Debug, Error)]
pub(crate) enum EligibilityError {
    #[error("the integrity policy must be accepted to start the exam")]
    ConsentDeclined,
    #[error("Exam not found")]
    ExamNotFound,
    #[error("you are not enrolled in the course for this exam")]
    NotEnrolled,
    #[error("Exam is not available")]
    ExamUnavailable,
    #[error("this exam has already been passed")]
    AlreadyPassed,
    #[error("Maximum attempts reached")]
    AttemptsExhausted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub(crate) struct EnteredSession {
    pub(crate) session: Arc<ExamSession>,
    pub(crate) resumed: bool,
}

impl std::fmt::Debug for EnteredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnteredSession")
            .field("attempt_id", &self.session.attempt_id())
            .field("resumed", &self.resumed)
            .finish()
    }
}

/// Consent gate, eligibility checks and attempt creation, in the order the
/// policy requires. Declining consent has no side effects at all; nothing is
/// written before every check has passed.
pub(crate) async fn enter_exam(
    stores: &Stores,
    registry: &SessionRegistry,
    exam_id: &str,
    student_id: &str,
    policy_accepted: bool,
    auto_advance_delay: Duration,
) -> Result<EnteredSession, EligibilityError> {
    if !policy_accepted {
        return Err(EligibilityError::ConsentDeclined);
    }

    let exam = stores
        .exams
        .get_exam(exam_id)
        .await?
        .ok_or(EligibilityError::ExamNotFound)?;
    if !stores.enrollment.is_enrolled(&exam.course_id, student_id).await? {
        return Err(EligibilityError::NotEnrolled);
    }
    if exam.status != ExamStatus::Published {
        return Err(EligibilityError::ExamUnavailable);
    }

    let mut attempts = stores.attempts.list_attempts(exam_id, student_id).await?;

    // An abandoned open attempt is resumed with its original deadline rather
    // than burning another slot. If that deadline already passed, the attempt
    // is closed here and eligibility is re-checked over the updated history.
    if let Some(open) = attempts.iter().find(|attempt| attempt.is_open()).cloned() {
        let expired = deadline_passed(&open, exam.time_limit_minutes);
        if !expired {
            let questions = stores.exams.get_questions(exam_id).await?;
            let session = ExamSession::new(
                open,
                exam,
                questions,
                stores.clone(),
                auto_advance_delay,
            );
            let session = registry.activate(session);
            info!(attempt_id = %session.attempt_id(), %student_id, "resumed open attempt");
            return Ok(EnteredSession { session, resumed: true });
        }

        registry.remove(&open.id);
        force_close_expired(stores, &open.id).await?;
        attempts = stores.attempts.list_attempts(exam_id, student_id).await?;
    }

    if attempts.iter().any(|attempt| attempt.passed == Some(true)) {
        return Err(EligibilityError::AlreadyPassed);
    }
    if exam.attempts_allowed > 0 && attempts.len() as i32 >= exam.attempts_allowed {
        return Err(EligibilityError::AttemptsExhausted);
    }

    let attempt_number = attempts.first().map_or(1, |latest| latest.attempt_number + 1);
    let attempt_id = uuid::Uuid::new_v4().to_string();
    let attempt = stores
        .attempts
        .create_attempt(NewAttempt {
            id: &attempt_id,
            exam_id,
            student_id,
            attempt_number,
            started_at: primitive_now_utc(),
        })
        .await?;

    metrics::counter!("attempts_started_total").increment(1);
    info!(%attempt_id, %student_id, attempt_number, "attempt started");

    let questions = stores.exams.get_questions(exam_id).await?;
    let session = ExamSession::new(attempt, exam, questions, stores.clone(), auto_advance_delay);
    let session = registry.activate(session);
    Ok(EnteredSession { session, resumed: false })
}

pub(crate) fn deadline_passed(attempt: &ExamAttempt, time_limit_minutes: i32) -> bool {
    if time_limit_minutes == 0 {
        return false;
    }
    attempt.started_at + time::Duration::minutes(time_limit_minutes as i64)
        <= primitive_now_utc()
}

/// Store-side close for an attempt whose deadline passed with no live
/// session. Whatever answers were persisted (normally none) are scored as-is.
pub(crate) async fn force_close_expired(
    stores: &Stores,
    attempt_id: &str,
) -> Result<(), StoreError> {
    stores.attempts.mark_submitted(attempt_id, primitive_now_utc(), true).await?;
    stores.scorer.compute_score(attempt_id).await?;
    metrics::counter!("attempts_finalized_total", "trigger" => "deadline").increment(1);
    info!(%attempt_id, "expired attempt closed");
    Ok(())
}
