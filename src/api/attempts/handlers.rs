use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentStudent;
use crate::core::state::AppState;
use crate::engine::lifecycle::{self, EligibilityError};
use crate::engine::navigator::NavError;
use crate::engine::session::{ExamSession, NavAction, SessionError, SignalOutcome, SubmitOutcome};
use crate::schemas::attempt::{
    AttemptResultResponse, AttemptStateResponse, EnterExamPayload, EnterExamResponse,
    NavigateAction, NavigatePayload, OutcomeView, QuestionView, SelectAnswerPayload,
    SignalPayload, SignalResponse, SubmitResponse,
};

pub(crate) async fn enter_exam(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    CurrentStudent(student_id): CurrentStudent,
    Json(payload): Json<EnterExamPayload>,
) -> Result<Json<EnterExamResponse>, ApiError> {
    let delay = Duration::from_millis(state.settings().exam().auto_advance_delay_ms);
    let entered = lifecycle::enter_exam(
        state.stores(),
        state.registry(),
        &exam_id,
        &student_id,
        payload.policy_accepted,
        delay,
    )
    .await
    .map_err(eligibility_error)?;

    let session = &entered.session;
    let questions = session.questions().iter().map(QuestionView::from_bundle).collect();

    Ok(Json(EnterExamResponse {
        attempt_id: session.attempt_id().to_string(),
        exam_id: session.exam().id.clone(),
        exam_title: session.exam().title.clone(),
        attempt_number: session.attempt().attempt_number,
        resumed: entered.resumed,
        remaining_seconds: session.remaining_budget_seconds(),
        questions,
    }))
}

pub(crate) async fn get_attempt_state(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    CurrentStudent(student_id): CurrentStudent,
) -> Result<Json<AttemptStateResponse>, ApiError> {
    if let Some(session) = owned_session(&state, &attempt_id, &student_id)? {
        let snapshot = session.snapshot().await;
        return Ok(Json(AttemptStateResponse::from_snapshot(&attempt_id, &snapshot)));
    }

    // No live session. A closed attempt still has a terminal phase to report;
    // an open one requires re-entering the exam to resume.
    let attempt = find_owned_attempt(&state, &attempt_id, &student_id).await?;
    if attempt.is_open() {
        return Err(ApiError::NotFound("Attempt session not found".to_string()));
    }

    let questions = state
        .stores()
        .exams
        .get_questions(&attempt.exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load exam questions"))?;

    let phase = if attempt.annulled { "invalidated" } else { "completed" };
    Ok(Json(AttemptStateResponse {
        attempt_id,
        phase: phase.to_string(),
        current_index: None,
        question_count: questions.len(),
        answered_question_ids: Vec::new(),
        unanswered_count: 0,
        remaining_seconds: None,
        incomplete_warning: false,
        outcome: OutcomeView::from_closed_attempt(&attempt),
    }))
}

pub(crate) async fn select_answer(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    CurrentStudent(student_id): CurrentStudent,
    Json(payload): Json<SelectAnswerPayload>,
) -> Result<Json<AttemptStateResponse>, ApiError> {
    let session = require_session(&state, &attempt_id, &student_id)?;
    let snapshot = session
        .select_option(&payload.question_id, &payload.option_id)
        .await
        .map_err(session_error)?;
    Ok(Json(AttemptStateResponse::from_snapshot(&attempt_id, &snapshot)))
}

pub(crate) async fn navigate(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    CurrentStudent(student_id): CurrentStudent,
    Json(payload): Json<NavigatePayload>,
) -> Result<Json<AttemptStateResponse>, ApiError> {
    let session = require_session(&state, &attempt_id, &student_id)?;
    let action = match payload.action {
        NavigateAction::Previous => NavAction::Previous,
        NavigateAction::Next => NavAction::Next,
        NavigateAction::Jump(index) => NavAction::Jump(index),
        NavigateAction::Summary => NavAction::Summary,
    };
    let snapshot = session.navigate(action).await.map_err(session_error)?;
    Ok(Json(AttemptStateResponse::from_snapshot(&attempt_id, &snapshot)))
}

pub(crate) async fn submit(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    CurrentStudent(student_id): CurrentStudent,
) -> Result<Json<SubmitResponse>, ApiError> {
    let session = require_session(&state, &attempt_id, &student_id)?;
    match session.submit().await.map_err(session_error)? {
        SubmitOutcome::IncompleteWarning { unanswered } => Ok(Json(SubmitResponse {
            status: "incomplete_warning".to_string(),
            unanswered: Some(unanswered),
        })),
        SubmitOutcome::Finalized => {
            Ok(Json(SubmitResponse { status: "finalized".to_string(), unanswered: None }))
        }
    }
}

pub(crate) async fn report_signal(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    CurrentStudent(student_id): CurrentStudent,
    Json(payload): Json<SignalPayload>,
) -> Result<Json<SignalResponse>, ApiError> {
    let Some(session) = owned_session(&state, &attempt_id, &student_id)? else {
        // Signals arriving after the session is gone are ignored, but only
        // for attempts that actually belong to the caller.
        find_owned_attempt(&state, &attempt_id, &student_id).await?;
        return Ok(Json(SignalResponse { status: "ignored".to_string() }));
    };

    let outcome = session.report_signal(payload.signal).await.map_err(session_error)?;
    let status = match outcome {
        SignalOutcome::Annulled => "annulled",
        SignalOutcome::Ignored => "ignored",
    };
    Ok(Json(SignalResponse { status: status.to_string() }))
}

pub(crate) async fn get_result(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    CurrentStudent(student_id): CurrentStudent,
) -> Result<Json<AttemptResultResponse>, ApiError> {
    let attempt = find_owned_attempt(&state, &attempt_id, &student_id).await?;
    if attempt.is_open() {
        return Err(ApiError::Conflict("The attempt is not finalized yet".to_string()));
    }
    Ok(Json(AttemptResultResponse::from_attempt(&attempt)))
}

fn owned_session(
    state: &AppState,
    attempt_id: &str,
    student_id: &str,
) -> Result<Option<Arc<ExamSession>>, ApiError> {
    match state.registry().get(attempt_id) {
        Some(session) if session.student_id() == student_id => Ok(Some(session)),
        Some(_) => Err(ApiError::NotFound("Attempt not found".to_string())),
        None => Ok(None),
    }
}

fn require_session(
    state: &AppState,
    attempt_id: &str,
    student_id: &str,
) -> Result<Arc<ExamSession>, ApiError> {
    owned_session(state, attempt_id, student_id)?
        .ok_or_else(|| ApiError::NotFound("Attempt session not found".to_string()))
}

async fn find_owned_attempt(
    state: &AppState,
    attempt_id: &str,
    student_id: &str,
) -> Result<crate::db::models::ExamAttempt, ApiError> {
    let attempt = state
        .stores()
        .attempts
        .find_attempt(attempt_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load attempt"))?;

    match attempt {
        Some(attempt) if attempt.student_id == student_id => Ok(attempt),
        _ => Err(ApiError::NotFound("Attempt not found".to_string())),
    }
}

fn eligibility_error(err: EligibilityError) -> ApiError {
    match err {
        EligibilityError::ConsentDeclined => {
            ApiError::BadRequest("The integrity policy must be accepted to start the exam".into())
        }
        EligibilityError::ExamNotFound => ApiError::NotFound("Exam not found".to_string()),
        EligibilityError::NotEnrolled => {
            ApiError::Forbidden("Enrollment required for this exam")
        }
        EligibilityError::ExamUnavailable => {
            ApiError::BadRequest("Exam is not available".to_string())
        }
        EligibilityError::AlreadyPassed => {
            ApiError::Conflict("This exam has already been passed".to_string())
        }
        EligibilityError::AttemptsExhausted => {
            ApiError::BadRequest("Maximum attempts reached".to_string())
        }
        EligibilityError::Store(err) => ApiError::internal(err, "Failed to enter the exam"),
    }
}

fn session_error(err: SessionError) -> ApiError {
    match err {
        SessionError::Nav(NavError::NotInteractive) => {
            ApiError::Conflict("The attempt is no longer accepting input".to_string())
        }
        SessionError::Nav(nav) => ApiError::BadRequest(nav.to_string()),
        SessionError::Store(err) => ApiError::internal(err, "Failed to update the attempt"),
    }
}
