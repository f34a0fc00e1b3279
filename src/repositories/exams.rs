use sqlx::PgPool;

use crate::db::models::{Exam, Question, QuestionOption};

pub(crate) const COLUMNS: &str = "\
    id, course_id, title, description, passing_score, max_score, \
    time_limit_minutes, attempts_allowed, status, created_at, updated_at, published_at";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_questions(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(
        "SELECT id, exam_id, order_index, prompt, kind, points, created_at \
         FROM questions WHERE exam_id = $1 ORDER BY order_index",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_options_for_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<QuestionOption>, sqlx::Error> {
    sqlx::query_as::<_, QuestionOption>(
        "SELECT o.id, o.question_id, o.text, o.order_index, o.is_correct \
         FROM question_options o \
         JOIN questions q ON q.id = o.question_id \
         WHERE q.exam_id = $1 \
         ORDER BY q.order_index, o.order_index",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await
}
