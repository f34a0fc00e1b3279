use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::store::ScoreSheet;

#[derive(Debug, sqlx::FromRow)]
struct ScoreRow {
    score_numeric: f64,
    score_percent: f64,
    passed: bool,
}

/// Computes and writes the score for a submitted attempt, entirely in the
/// database. A question earns its points only when the selected option set
/// equals the correct option set. The score fields are written at most once;
/// a repeated call returns the already-stored values.
pub(crate) async fn compute_score(
    pool: &PgPool,
    attempt_id: &str,
    now: PrimitiveDateTime,
) -> Result<ScoreSheet, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE exam_attempts a SET \
            score_numeric = scored.points, \
            score_percent = CASE WHEN e.max_score > 0 \
                THEN scored.points / e.max_score * 100 ELSE 0 END, \
            passed = scored.points >= e.passing_score, \
            updated_at = $2 \
         FROM exams e, LATERAL ( \
            SELECT COALESCE(SUM(q.points), 0) AS points \
            FROM questions q \
            WHERE q.exam_id = e.id AND EXISTS ( \
                SELECT 1 FROM attempt_answers aa \
                WHERE aa.attempt_id = a.id AND aa.question_id = q.id \
                  AND (SELECT COALESCE(jsonb_agg(to_jsonb(sel.value) ORDER BY to_jsonb(sel.value)), '[]'::jsonb) \
                       FROM jsonb_array_elements_text(aa.selected_option_ids) AS sel(value)) \
                    = (SELECT COALESCE(jsonb_agg(to_jsonb(o.id) ORDER BY to_jsonb(o.id)), '[]'::jsonb) \
                       FROM question_options o \
                       WHERE o.question_id = q.id AND o.is_correct) \
            ) \
         ) scored \
         WHERE a.id = $1 AND e.id = a.exam_id \
           AND a.submitted_at IS NOT NULL AND a.annulled = FALSE \
           AND a.score_numeric IS NULL",
    )
    .bind(attempt_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query_as::<_, ScoreRow>(
        "SELECT score_numeric, score_percent, passed \
         FROM exam_attempts \
         WHERE id = $1 AND score_numeric IS NOT NULL",
    )
    .bind(attempt_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ScoreSheet {
        score_numeric: row.score_numeric,
        score_percent: row.score_percent,
        passed: row.passed,
    })
}
