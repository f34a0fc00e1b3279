use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::{Duration, PrimitiveDateTime};
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::models::{Exam, ExamAttempt, Question, QuestionOption};
use crate::db::types::{ExamStatus, QuestionKind};
use crate::store::{
    AnswerSelection, AttemptStore, EnrollmentGate, ExamSource, NewAttempt, QuestionBundle,
    RemoteScorer, ScoreSheet, StoreError, Stores,
};

#[derive(Default)]
struct MemoryInner {
    exams: HashMap<String, Exam>,
    questions: HashMap<String, Vec<QuestionBundle>>,
    enrollments: HashSet<(String, String)>,
    attempts: HashMap<String, ExamAttempt>,
    answers: HashMap<String, Vec<AnswerSelection>>,
}

/// In-memory implementation of the store traits for tests, with a few
/// fault-injection switches for the transient-failure paths.
#[derive(Default)]
pub(crate) struct MemoryExamStore {
    inner: Mutex<MemoryInner>,
    pub(crate) fail_save_answers: AtomicBool,
    pub(crate) fail_scoring: AtomicBool,
    pub(crate) fail_annul: AtomicBool,
    pub(crate) submit_calls: AtomicUsize,
    pub(crate) score_calls: AtomicUsize,
}

impl MemoryExamStore {
    pub(crate) fn stores(self: Arc<Self>) -> Stores {
        Stores {
            enrollment: self.clone(),
            exams: self.clone(),
            attempts: self.clone(),
            scorer: self,
        }
    }

    pub(crate) fn seed_exam(&self, exam: Exam) {
        let mut inner = self.inner.lock().expect("memory store lock");
        inner.questions.entry(exam.id.clone()).or_default();
        inner.exams.insert(exam.id.clone(), exam);
    }

    pub(crate) fn seed_question(
        &self,
        exam_id: &str,
        kind: QuestionKind,
        points: f64,
        options: &[(&str, bool)],
    ) -> (String, Vec<String>) {
        let mut inner = self.inner.lock().expect("memory store lock");
        let bundles = inner.questions.entry(exam_id.to_string()).or_default();
        let order_index = bundles.len() as i32;
        let question_id = Uuid::new_v4().to_string();
        let now = primitive_now_utc();

        let options: Vec<QuestionOption> = options
            .iter()
            .enumerate()
            .map(|(index, (text, is_correct))| QuestionOption {
                id: Uuid::new_v4().to_string(),
                question_id: question_id.clone(),
                text: (*text).to_string(),
                order_index: index as i32,
                is_correct: *is_correct,
            })
            .collect();
        let option_ids = options.iter().map(|option| option.id.clone()).collect();

        bundles.push(QuestionBundle {
            question: Question {
                id: question_id.clone(),
                exam_id: exam_id.to_string(),
                order_index,
                prompt: format!("Question {}", order_index + 1),
                kind,
                points,
                created_at: now,
            },
            options,
        });

        (question_id, option_ids)
    }

    pub(crate) fn enroll(&self, course_id: &str, student_id: &str) {
        let mut inner = self.inner.lock().expect("memory store lock");
        inner.enrollments.insert((course_id.to_string(), student_id.to_string()));
    }

    pub(crate) fn attempt(&self, attempt_id: &str) -> Option<ExamAttempt> {
        self.inner.lock().expect("memory store lock").attempts.get(attempt_id).cloned()
    }

    pub(crate) fn saved_answers(&self, attempt_id: &str) -> Vec<AnswerSelection> {
        self.inner
            .lock()
            .expect("memory store lock")
            .answers
            .get(attempt_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn open_attempts(&self, exam_id: &str, student_id: &str) -> usize {
        self.inner
            .lock()
            .expect("memory store lock")
            .attempts
            .values()
            .filter(|attempt| {
                attempt.exam_id == exam_id
                    && attempt.student_id == student_id
                    && attempt.is_open()
            })
            .count()
    }
}

#[async_trait]
impl EnrollmentGate for MemoryExamStore {
    async fn is_enrolled(&self, course_id: &str, student_id: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().expect("memory store lock");
        Ok(inner.enrollments.contains(&(course_id.to_string(), student_id.to_string())))
    }
}

#[async_trait]
impl ExamSource for MemoryExamStore {
    async fn get_exam(&self, exam_id: &str) -> Result<Option<Exam>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock");
        Ok(inner.exams.get(exam_id).cloned())
    }

    async fn get_questions(&self, exam_id: &str) -> Result<Vec<QuestionBundle>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock");
        Ok(inner.questions.get(exam_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl AttemptStore for MemoryExamStore {
    async fn list_attempts(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Vec<ExamAttempt>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock");
        let mut attempts: Vec<ExamAttempt> = inner
            .attempts
            .values()
            .filter(|attempt| attempt.exam_id == exam_id && attempt.student_id == student_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.attempt_number.cmp(&a.attempt_number));
        Ok(attempts)
    }

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<ExamAttempt>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock");
        Ok(inner.attempts.get(attempt_id).cloned())
    }

    async fn create_attempt(&self, attempt: NewAttempt<'_>) -> Result<ExamAttempt, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        let open_exists = inner.attempts.values().any(|existing| {
            existing.exam_id == attempt.exam_id
                && existing.student_id == attempt.student_id
                && existing.is_open()
        });
        if open_exists {
            return Err(StoreError::Backend(
                "an open attempt already exists for this exam".to_string(),
            ));
        }

        let now = primitive_now_utc();
        let created = ExamAttempt {
            id: attempt.id.to_string(),
            exam_id: attempt.exam_id.to_string(),
            student_id: attempt.student_id.to_string(),
            attempt_number: attempt.attempt_number,
            started_at: attempt.started_at,
            submitted_at: None,
            score_numeric: None,
            score_percent: None,
            passed: None,
            auto_submitted: false,
            annulled: false,
            annulment_reason: None,
            created_at: now,
            updated_at: now,
        };
        inner.attempts.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn save_answers(
        &self,
        attempt_id: &str,
        answers: &[AnswerSelection],
    ) -> Result<(), StoreError> {
        if self.fail_save_answers.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("answer save failed".to_string()));
        }
        let mut inner = self.inner.lock().expect("memory store lock");
        inner.answers.insert(attempt_id.to_string(), answers.to_vec());
        Ok(())
    }

    async fn mark_submitted(
        &self,
        attempt_id: &str,
        submitted_at: PrimitiveDateTime,
        auto_submitted: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        if let Some(attempt) = inner.attempts.get_mut(attempt_id) {
            if attempt.is_open() && !attempt.annulled {
                attempt.submitted_at = Some(submitted_at);
                attempt.auto_submitted = auto_submitted;
                attempt.updated_at = primitive_now_utc();
                self.submit_calls.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn annul_attempt(
        &self,
        attempt_id: &str,
        reason: &str,
        submitted_at: PrimitiveDateTime,
    ) -> Result<(), StoreError> {
        if self.fail_annul.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("annulment write failed".to_string()));
        }
        let mut inner = self.inner.lock().expect("memory store lock");
        if let Some(attempt) = inner.attempts.get_mut(attempt_id) {
            if attempt.is_open() {
                attempt.submitted_at = Some(submitted_at);
                attempt.score_numeric = Some(0.0);
                attempt.score_percent = Some(0.0);
                attempt.passed = Some(false);
                attempt.annulled = true;
                attempt.annulment_reason = Some(reason.to_string());
                attempt.updated_at = primitive_now_utc();
            }
        }
        Ok(())
    }

    async fn list_open_expired(
        &self,
        now: PrimitiveDateTime,
    ) -> Result<Vec<ExamAttempt>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock");
        Ok(inner
            .attempts
            .values()
            .filter(|attempt| {
                if !attempt.is_open() {
                    return false;
                }
                let Some(exam) = inner.exams.get(&attempt.exam_id) else {
                    return false;
                };
                exam.time_limit_minutes > 0
                    && attempt.started_at + Duration::minutes(exam.time_limit_minutes as i64)
                        <= now
            })
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl RemoteScorer for MemoryExamStore {
    async fn compute_score(&self, attempt_id: &str) -> Result<ScoreSheet, StoreError> {
        if self.fail_scoring.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("scoring procedure failed".to_string()));
        }
        self.score_calls.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.inner.lock().expect("memory store lock");

        let (exam_id, already_scored) = {
            let attempt = inner
                .attempts
                .get(attempt_id)
                .ok_or_else(|| StoreError::Backend("attempt not found".to_string()))?;
            if attempt.is_open() || attempt.annulled {
                return Err(StoreError::Backend(
                    "attempt is not ready for scoring".to_string(),
                ));
            }
            (attempt.exam_id.clone(), attempt.score_numeric.is_some())
        };

        if already_scored {
            let attempt = &inner.attempts[attempt_id];
            return Ok(ScoreSheet {
                score_numeric: attempt.score_numeric.unwrap_or(0.0),
                score_percent: attempt.score_percent.unwrap_or(0.0),
                passed: attempt.passed.unwrap_or(false),
            });
        }

        let exam = inner.exams.get(&exam_id).cloned().expect("exam for attempt");
        let bundles = inner.questions.get(&exam_id).cloned().unwrap_or_default();
        let answers = inner.answers.get(attempt_id).cloned().unwrap_or_default();

        // Same rule as the SQL scorer: exact match of selected and correct sets.
        let mut score = 0.0;
        for bundle in &bundles {
            let correct: BTreeSet<String> = bundle
                .options
                .iter()
                .filter(|option| option.is_correct)
                .map(|option| option.id.clone())
                .collect();
            let selected = answers
                .iter()
                .find(|answer| answer.question_id == bundle.question.id)
                .map(|answer| answer.option_ids.clone())
                .unwrap_or_default();
            if !selected.is_empty() && selected == correct {
                score += bundle.question.points;
            }
        }

        let percent = if exam.max_score > 0.0 { score / exam.max_score * 100.0 } else { 0.0 };
        let passed = score >= exam.passing_score;

        let attempt = inner.attempts.get_mut(attempt_id).expect("attempt");
        attempt.score_numeric = Some(score);
        attempt.score_percent = Some(percent);
        attempt.passed = Some(passed);

        Ok(ScoreSheet { score_numeric: score, score_percent: percent, passed })
    }
}
