pub(crate) mod postgres;

#[cfg(test)]
pub(crate) mod memory;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{Exam, ExamAttempt, Question, QuestionOption};

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// A question together with its options, pre-sorted by order index.
#[derive(Debug, Clone)]
pub(crate) struct QuestionBundle {
    pub(crate) question: Question,
    pub(crate) options: Vec<QuestionOption>,
}

/// The selection set for one question, captured at submission time.
#[derive(Debug, Clone)]
pub(crate) struct AnswerSelection {
    pub(crate) question_id: String,
    pub(crate) option_ids: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct NewAttempt<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) student_id: &'a str,
    pub(crate) attempt_number: i32,
    pub(crate) started_at: PrimitiveDateTime,
}

/// Score fields as written by the remote scorer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ScoreSheet {
    pub(crate) score_numeric: f64,
    pub(crate) score_percent: f64,
    pub(crate) passed: bool,
}

#[async_trait]
pub(crate) trait EnrollmentGate: Send + Sync {
    async fn is_enrolled(&self, course_id: &str, student_id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub(crate) trait ExamSource: Send + Sync {
    async fn get_exam(&self, exam_id: &str) -> Result<Option<Exam>, StoreError>;

    /// Questions ordered by order index, each with its options ordered likewise.
    async fn get_questions(&self, exam_id: &str) -> Result<Vec<QuestionBundle>, StoreError>;
}

#[async_trait]
pub(crate) trait AttemptStore: Send + Sync {
    /// Prior attempts for (student, exam), newest first.
    async fn list_attempts(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Vec<ExamAttempt>, StoreError>;

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<ExamAttempt>, StoreError>;

    async fn create_attempt(&self, attempt: NewAttempt<'_>) -> Result<ExamAttempt, StoreError>;

    /// Persists the whole answer batch for an attempt. Selections are only
    /// written once; a retry after a transient failure replaces the batch.
    async fn save_answers(
        &self,
        attempt_id: &str,
        answers: &[AnswerSelection],
    ) -> Result<(), StoreError>;

    /// Closes an open attempt. A no-op when the attempt is already closed,
    /// so a stale caller cannot clobber a finalized or annulled row.
    /// `auto_submitted` records that the system closed the attempt on the
    /// student's behalf.
    async fn mark_submitted(
        &self,
        attempt_id: &str,
        submitted_at: PrimitiveDateTime,
        auto_submitted: bool,
    ) -> Result<(), StoreError>;

    /// Forced termination with zero score. Only applies to open attempts.
    async fn annul_attempt(
        &self,
        attempt_id: &str,
        reason: &str,
        submitted_at: PrimitiveDateTime,
    ) -> Result<(), StoreError>;

    /// Open attempts on timed exams whose deadline has already passed.
    async fn list_open_expired(
        &self,
        now: PrimitiveDateTime,
    ) -> Result<Vec<ExamAttempt>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Opaque scoring procedure. Called exactly once per finalized attempt,
/// after its answers are persisted; the engine never derives a score itself.
#[async_trait]
pub(crate) trait RemoteScorer: Send + Sync {
    async fn compute_score(&self, attempt_id: &str) -> Result<ScoreSheet, StoreError>;
}

#[derive(Clone)]
pub(crate) struct Stores {
    pub(crate) enrollment: Arc<dyn EnrollmentGate>,
    pub(crate) exams: Arc<dyn ExamSource>,
    pub(crate) attempts: Arc<dyn AttemptStore>,
    pub(crate) scorer: Arc<dyn RemoteScorer>,
}
