use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::ExamAttempt;
use crate::store::NewAttempt;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, student_id, attempt_number, started_at, submitted_at, \
    score_numeric, score_percent, passed, auto_submitted, annulled, annulment_reason, \
    created_at, updated_at";

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<ExamAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!("SELECT {COLUMNS} FROM exam_attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_for_student(
    pool: &PgPool,
    exam_id: &str,
    student_id: &str,
) -> Result<Vec<ExamAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!(
        "SELECT {COLUMNS} FROM exam_attempts \
         WHERE exam_id = $1 AND student_id = $2 \
         ORDER BY attempt_number DESC"
    ))
    .bind(exam_id)
    .bind(student_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn create(
    pool: &PgPool,
    attempt: NewAttempt<'_>,
    now: PrimitiveDateTime,
) -> Result<ExamAttempt, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(&format!(
        "INSERT INTO exam_attempts (
            id, exam_id, student_id, attempt_number, started_at, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $6)
        RETURNING {COLUMNS}"
    ))
    .bind(attempt.id)
    .bind(attempt.exam_id)
    .bind(attempt.student_id)
    .bind(attempt.attempt_number)
    .bind(attempt.started_at)
    .bind(now)
    .fetch_one(pool)
    .await
}

/// Closes an open attempt; rows already submitted or annulled are untouched.
pub(crate) async fn mark_submitted(
    pool: &PgPool,
    id: &str,
    submitted_at: PrimitiveDateTime,
    auto_submitted: bool,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_attempts SET submitted_at = $1, auto_submitted = $2, updated_at = $3 \
         WHERE id = $4 AND submitted_at IS NULL AND annulled = FALSE",
    )
    .bind(submitted_at)
    .bind(auto_submitted)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn annul(
    pool: &PgPool,
    id: &str,
    reason: &str,
    submitted_at: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_attempts SET \
            submitted_at = $1, score_numeric = 0, score_percent = 0, passed = FALSE, \
            annulled = TRUE, annulment_reason = $2, updated_at = $3 \
         WHERE id = $4 AND submitted_at IS NULL",
    )
    .bind(submitted_at)
    .bind(reason)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list_open_expired(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Vec<ExamAttempt>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttempt>(
        "SELECT a.id, a.exam_id, a.student_id, a.attempt_number, a.started_at, a.submitted_at, \
                a.score_numeric, a.score_percent, a.passed, a.auto_submitted, a.annulled, \
                a.annulment_reason, \
                a.created_at, a.updated_at \
         FROM exam_attempts a \
         JOIN exams e ON e.id = a.exam_id \
         WHERE a.submitted_at IS NULL \
           AND e.time_limit_minutes > 0 \
           AND a.started_at + make_interval(mins => e.time_limit_minutes) <= $1",
    )
    .bind(now)
    .fetch_all(pool)
    .await
}
