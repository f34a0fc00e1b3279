use std::sync::{Arc, OnceLock};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::api;
use crate::core::{config::Settings, security, state::AppState, time::primitive_now_utc};
use crate::db::models::Exam;
use crate::db::types::{ExamStatus, QuestionKind};
use crate::store::memory::MemoryExamStore;

const TEST_SECRET_KEY: &str = "test-secret";

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) store: Arc<MemoryExamStore>,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("EXAMGUARD_ENV", "test");
    std::env::set_var("EXAMGUARD_STRICT_CONFIG", "0");
    std::env::set_var("SECRET_KEY", TEST_SECRET_KEY);
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::set_var("AUTO_ADVANCE_DELAY_MS", "400");
    std::env::set_var("REAPER_INTERVAL_SECONDS", "60");
}

pub(crate) async fn setup_test_context() -> TestContext {
    setup_test_context_with(|| {}).await
}

pub(crate) async fn setup_test_context_with(adjust: impl FnOnce()) -> TestContext {
    let guard = env_lock().await;
    set_test_env();
    adjust();

    let settings = Settings::load().expect("settings");
    let store = Arc::new(MemoryExamStore::default());
    let state = AppState::new(settings, Arc::clone(&store).stores());
    let app = api::router::router(state.clone());

    TestContext { state, app, store, _guard: guard }
}

/// A published, timed exam. `attempts_allowed = 0` means unlimited.
pub(crate) fn published_exam(
    course_id: &str,
    time_limit_minutes: i32,
    attempts_allowed: i32,
    passing_score: f64,
    max_score: f64,
) -> Exam {
    let now = primitive_now_utc();
    Exam {
        id: Uuid::new_v4().to_string(),
        course_id: course_id.to_string(),
        title: "Intercultural Communication Final".to_string(),
        description: None,
        passing_score,
        max_score,
        time_limit_minutes,
        attempts_allowed,
        status: ExamStatus::Published,
        created_at: now,
        updated_at: now,
        published_at: Some(now),
    }
}

/// Seeds a published exam with one single-choice and one multiple-choice
/// question (2.0 points each) and enrolls the student. Returns the exam id
/// with the seeded question and option ids.
pub(crate) fn seed_standard_exam(
    store: &MemoryExamStore,
    student_id: &str,
) -> (String, (String, Vec<String>), (String, Vec<String>)) {
    let exam = published_exam("course-1", 30, 3, 2.0, 4.0);
    let exam_id = exam.id.clone();
    store.seed_exam(exam);
    store.enroll("course-1", student_id);

    let single = store.seed_question(
        &exam_id,
        QuestionKind::SingleChoice,
        2.0,
        &[("Lisbon", false), ("Porto", true)],
    );
    let multi = store.seed_question(
        &exam_id,
        QuestionKind::MultipleChoice,
        2.0,
        &[("Spring", true), ("Summer", false), ("Autumn", true)],
    );

    (exam_id, single, multi)
}

pub(crate) fn bearer_token(student_id: &str, settings: &Settings) -> String {
    security::create_access_token(student_id, settings, None).expect("token")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
