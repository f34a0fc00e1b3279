use sqlx::PgPool;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::store::AnswerSelection;

/// Writes the whole answer batch for an attempt. A retry after a partial
/// failure replaces whatever made it in on the previous try.
pub(crate) async fn replace_batch(
    pool: &PgPool,
    attempt_id: &str,
    answers: &[AnswerSelection],
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM attempt_answers WHERE attempt_id = $1")
        .bind(attempt_id)
        .execute(&mut *tx)
        .await?;

    for answer in answers {
        let option_ids: Vec<&str> = answer.option_ids.iter().map(String::as_str).collect();
        sqlx::query(
            "INSERT INTO attempt_answers (id, attempt_id, question_id, selected_option_ids, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(attempt_id)
        .bind(&answer.question_id)
        .bind(serde_json::to_value(&option_ids).unwrap_or_else(|_| serde_json::json!([])))
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}
