use serde::{Deserialize, Serialize};

use crate::core::time::format_primitive;
use crate::db::models::ExamAttempt;
use crate::db::types::QuestionKind;
use crate::engine::monitor::IntegritySignal;
use crate::engine::navigator::Phase;
use crate::engine::session::{FinalizeTrigger, SessionOutcome, SessionSnapshot};
use crate::store::QuestionBundle;

#[derive(Debug, Deserialize)]
pub(crate) struct EnterExamPayload {
    #[serde(default)]
    pub(crate) policy_accepted: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SelectAnswerPayload {
    pub(crate) question_id: String,
    pub(crate) option_id: String,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum NavigateAction {
    Previous,
    Next,
    Jump(usize),
    Summary,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NavigatePayload {
    pub(crate) action: NavigateAction,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SignalPayload {
    pub(crate) signal: IntegritySignal,
}

/// A question as shown to the student. Correctness flags never leave the
/// server.
#[derive(Debug, Serialize)]
pub(crate) struct QuestionView {
    pub(crate) id: String,
    pub(crate) order_index: i32,
    pub(crate) prompt: String,
    pub(crate) kind: QuestionKind,
    pub(crate) points: f64,
    pub(crate) options: Vec<OptionView>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OptionView {
    pub(crate) id: String,
    pub(crate) order_index: i32,
    pub(crate) text: String,
}

impl QuestionView {
    pub(crate) fn from_bundle(bundle: &QuestionBundle) -> Self {
        Self {
            id: bundle.question.id.clone(),
            order_index: bundle.question.order_index,
            prompt: bundle.question.prompt.clone(),
            kind: bundle.question.kind,
            points: bundle.question.points,
            options: bundle
                .options
                .iter()
                .map(|option| OptionView {
                    id: option.id.clone(),
                    order_index: option.order_index,
                    text: option.text.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct EnterExamResponse {
    pub(crate) attempt_id: String,
    pub(crate) exam_id: String,
    pub(crate) exam_title: String,
    pub(crate) attempt_number: i32,
    pub(crate) resumed: bool,
    pub(crate) remaining_seconds: Option<i64>,
    pub(crate) questions: Vec<QuestionView>,
}

/// How a closed attempt ended, distinguishing a deadline auto-submit from a
/// manual one.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum OutcomeView {
    Scored {
        score_numeric: f64,
        score_percent: f64,
        passed: bool,
        auto_submitted: bool,
    },
    Annulled {
        reason: String,
    },
}

impl OutcomeView {
    pub(crate) fn from_outcome(outcome: &SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Scored { sheet, trigger } => Self::Scored {
                score_numeric: sheet.score_numeric,
                score_percent: sheet.score_percent,
                passed: sheet.passed,
                auto_submitted: *trigger == FinalizeTrigger::Deadline,
            },
            SessionOutcome::Annulled(signal) => {
                Self::Annulled { reason: signal.description().to_string() }
            }
        }
    }

    /// Rebuilds the outcome from a closed attempt row once the live session
    /// is gone.
    pub(crate) fn from_closed_attempt(attempt: &ExamAttempt) -> Option<Self> {
        if attempt.is_open() {
            return None;
        }
        if attempt.annulled {
            return Some(Self::Annulled {
                reason: attempt.annulment_reason.clone().unwrap_or_default(),
            });
        }
        Some(Self::Scored {
            score_numeric: attempt.score_numeric.unwrap_or(0.0),
            score_percent: attempt.score_percent.unwrap_or(0.0),
            passed: attempt.passed.unwrap_or(false),
            auto_submitted: attempt.auto_submitted,
        })
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptStateResponse {
    pub(crate) attempt_id: String,
    pub(crate) phase: String,
    /// Set only while a question is on screen.
    pub(crate) current_index: Option<usize>,
    pub(crate) question_count: usize,
    pub(crate) answered_question_ids: Vec<String>,
    pub(crate) unanswered_count: usize,
    pub(crate) remaining_seconds: Option<i64>,
    pub(crate) incomplete_warning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) outcome: Option<OutcomeView>,
}

impl AttemptStateResponse {
    pub(crate) fn from_snapshot(attempt_id: &str, snapshot: &SessionSnapshot) -> Self {
        let (phase, current_index, warned) = match snapshot.phase {
            Phase::AwaitingConsent => ("awaiting_consent", None, false),
            Phase::InProgress(index) => ("in_progress", Some(index), false),
            Phase::Summary { warned } => ("summary", None, warned),
            Phase::Finalizing => ("finalizing", None, false),
            Phase::Completed => ("completed", None, false),
            Phase::Invalidated => ("invalidated", None, false),
        };
        let answered: Vec<String> = snapshot.answered.iter().cloned().collect();
        Self {
            attempt_id: attempt_id.to_string(),
            phase: phase.to_string(),
            current_index,
            question_count: snapshot.question_count,
            unanswered_count: snapshot.question_count - answered.len(),
            answered_question_ids: answered,
            remaining_seconds: snapshot.remaining_seconds,
            incomplete_warning: warned,
            outcome: snapshot.outcome.as_ref().map(OutcomeView::from_outcome),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    pub(crate) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) unanswered: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SignalResponse {
    pub(crate) status: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResultResponse {
    pub(crate) attempt_id: String,
    pub(crate) exam_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) started_at: String,
    pub(crate) submitted_at: Option<String>,
    pub(crate) score_numeric: Option<f64>,
    pub(crate) score_percent: Option<f64>,
    pub(crate) passed: Option<bool>,
    pub(crate) auto_submitted: bool,
    pub(crate) annulled: bool,
    pub(crate) annulment_reason: Option<String>,
}

impl AttemptResultResponse {
    pub(crate) fn from_attempt(attempt: &ExamAttempt) -> Self {
        Self {
            attempt_id: attempt.id.clone(),
            exam_id: attempt.exam_id.clone(),
            attempt_number: attempt.attempt_number,
            started_at: format_primitive(attempt.started_at),
            submitted_at: attempt.submitted_at.map(format_primitive),
            score_numeric: attempt.score_numeric,
            score_percent: attempt.score_percent,
            passed: attempt.passed,
            auto_submitted: attempt.auto_submitted,
            annulled: attempt.annulled,
            annulment_reason: attempt.annulment_reason.clone(),
        }
    }
}
