use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{ExamStatus, QuestionKind};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Exam {
    pub(crate) id: String,
    pub(crate) course_id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) passing_score: f64,
    pub(crate) max_score: f64,
    /// 0 means untimed.
    pub(crate) time_limit_minutes: i32,
    /// 0 means unlimited attempts.
    pub(crate) attempts_allowed: i32,
    pub(crate) status: ExamStatus,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) published_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) order_index: i32,
    pub(crate) prompt: String,
    pub(crate) kind: QuestionKind,
    pub(crate) points: f64,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct QuestionOption {
    pub(crate) id: String,
    pub(crate) question_id: String,
    pub(crate) text: String,
    pub(crate) order_index: i32,
    pub(crate) is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamAttempt {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) score_numeric: Option<f64>,
    pub(crate) score_percent: Option<f64>,
    pub(crate) passed: Option<bool>,
    pub(crate) auto_submitted: bool,
    pub(crate) annulled: bool,
    pub(crate) annulment_reason: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl ExamAttempt {
    pub(crate) fn is_open(&self) -> bool {
        self.submitted_at.is_none()
    }
}
