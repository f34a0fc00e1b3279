use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::core::time::primitive_now_utc;
use crate::db::models::{Exam, ExamAttempt};
use crate::repositories;
use crate::store::{
    AnswerSelection, AttemptStore, EnrollmentGate, ExamSource, NewAttempt, QuestionBundle,
    RemoteScorer, ScoreSheet, StoreError, Stores,
};

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub(crate) struct PgExamStore {
    pool: PgPool,
}

impl PgExamStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn stores(pool: PgPool) -> Stores {
        let store = Arc::new(Self::new(pool));
        Stores {
            enrollment: store.clone(),
            exams: store.clone(),
            attempts: store.clone(),
            scorer: store,
        }
    }
}

#[async_trait]
impl EnrollmentGate for PgExamStore {
    async fn is_enrolled(&self, course_id: &str, student_id: &str) -> Result<bool, StoreError> {
        Ok(repositories::enrollments::is_enrolled(&self.pool, course_id, student_id).await?)
    }
}

#[async_trait]
impl ExamSource for PgExamStore {
    async fn get_exam(&self, exam_id: &str) -> Result<Option<Exam>, StoreError> {
        Ok(repositories::exams::find_by_id(&self.pool, exam_id).await?)
    }

    async fn get_questions(&self, exam_id: &str) -> Result<Vec<QuestionBundle>, StoreError> {
        let questions = repositories::exams::list_questions(&self.pool, exam_id).await?;
        let mut options = repositories::exams::list_options_for_exam(&self.pool, exam_id).await?;

        let mut bundles: Vec<QuestionBundle> = questions
            .into_iter()
            .map(|question| QuestionBundle { question, options: Vec::new() })
            .collect();

        // Both lists arrive ordered; drain options into their questions.
        for option in options.drain(..) {
            if let Some(bundle) =
                bundles.iter_mut().find(|bundle| bundle.question.id == option.question_id)
            {
                bundle.options.push(option);
            }
        }

        Ok(bundles)
    }
}

#[async_trait]
impl AttemptStore for PgExamStore {
    async fn list_attempts(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Vec<ExamAttempt>, StoreError> {
        Ok(repositories::attempts::list_for_student(&self.pool, exam_id, student_id).await?)
    }

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<ExamAttempt>, StoreError> {
        Ok(repositories::attempts::find_by_id(&self.pool, attempt_id).await?)
    }

    async fn create_attempt(&self, attempt: NewAttempt<'_>) -> Result<ExamAttempt, StoreError> {
        Ok(repositories::attempts::create(&self.pool, attempt, primitive_now_utc()).await?)
    }

    async fn save_answers(
        &self,
        attempt_id: &str,
        answers: &[AnswerSelection],
    ) -> Result<(), StoreError> {
        Ok(repositories::answers::replace_batch(
            &self.pool,
            attempt_id,
            answers,
            primitive_now_utc(),
        )
        .await?)
    }

    async fn mark_submitted(
        &self,
        attempt_id: &str,
        submitted_at: PrimitiveDateTime,
        auto_submitted: bool,
    ) -> Result<(), StoreError> {
        repositories::attempts::mark_submitted(
            &self.pool,
            attempt_id,
            submitted_at,
            auto_submitted,
            primitive_now_utc(),
        )
        .await?;
        Ok(())
    }

    async fn annul_attempt(
        &self,
        attempt_id: &str,
        reason: &str,
        submitted_at: PrimitiveDateTime,
    ) -> Result<(), StoreError> {
        repositories::attempts::annul(
            &self.pool,
            attempt_id,
            reason,
            submitted_at,
            primitive_now_utc(),
        )
        .await?;
        Ok(())
    }

    async fn list_open_expired(
        &self,
        now: PrimitiveDateTime,
    ) -> Result<Vec<ExamAttempt>, StoreError> {
        Ok(repositories::attempts::list_open_expired(&self.pool, now).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteScorer for PgExamStore {
    async fn compute_score(&self, attempt_id: &str) -> Result<ScoreSheet, StoreError> {
        Ok(repositories::scoring::compute_score(&self.pool, attempt_id, primitive_now_utc())
            .await?)
    }
}
