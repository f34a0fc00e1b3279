mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

/// Routes nested under `/exams`.
pub(crate) fn exam_router() -> Router<AppState> {
    Router::new().route("/:exam_id/attempts", post(handlers::enter_exam))
}

/// Routes nested under `/attempts`.
pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:attempt_id", get(handlers::get_attempt_state))
        .route("/:attempt_id/answers", post(handlers::select_answer))
        .route("/:attempt_id/navigate", post(handlers::navigate))
        .route("/:attempt_id/submit", post(handlers::submit))
        .route("/:attempt_id/signals", post(handlers::report_signal))
        .route("/:attempt_id/result", get(handlers::get_result))
}
