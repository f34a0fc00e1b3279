use std::collections::{BTreeSet, HashMap};

use crate::db::types::QuestionKind;
use crate::store::AnswerSelection;

/// What the student sees, modeled as a state machine over the attempt.
///
/// `Invalidated` is absorbing: once an integrity signal lands, no transition
/// leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingConsent,
    InProgress(usize),
    Summary { warned: bool },
    Finalizing,
    Completed,
    Invalidated,
}

/// The slice of a question the navigator needs for validation.
#[derive(Debug, Clone)]
pub struct QuestionKey {
    pub id: String,
    pub kind: QuestionKind,
    pub option_ids: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NavError {
    #[error("the attempt is not accepting input")]
    NotInteractive,
    #[error("the question is not the one currently shown")]
    QuestionNotCurrent,
    #[error("the option does not belong to the current question")]
    UnknownOption,
    #[error("the question index is out of range")]
    OutOfRange,
}

/// Result of recording a selection. `auto_advance_to` is set for single-choice
/// questions that are not the last one; the caller schedules the delayed move.
#[derive(Debug, PartialEq, Eq)]
pub struct SelectionOutcome {
    pub auto_advance_to: Option<usize>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SubmitDecision {
    /// Unanswered questions remain and the student has not been warned yet.
    WarnIncomplete { unanswered: usize },
    /// Finalization may begin.
    Proceed,
}

pub struct Navigator {
    questions: Vec<QuestionKey>,
    selections: HashMap<String, BTreeSet<String>>,
    phase: Phase,
}

impl Navigator {
    pub fn new(questions: Vec<QuestionKey>) -> Self {
        Self { questions, selections: HashMap::new(), phase: Phase::AwaitingConsent }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self.phase, Phase::InProgress(_) | Phase::Summary { .. })
    }

    pub fn answered_question_ids(&self) -> BTreeSet<String> {
        self.selections
            .iter()
            .filter(|(_, options)| !options.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn unanswered_count(&self) -> usize {
        self.questions
            .iter()
            .filter(|question| {
                self.selections.get(&question.id).map_or(true, BTreeSet::is_empty)
            })
            .count()
    }

    /// Consent moves the machine onto the first question. The caller creates
    /// the attempt row first; a declined policy never reaches this point.
    pub fn accept_policy(&mut self) {
        if self.phase == Phase::AwaitingConsent {
            self.phase = Phase::InProgress(0);
        }
    }

    pub fn select_option(
        &mut self,
        question_id: &str,
        option_id: &str,
    ) -> Result<SelectionOutcome, NavError> {
        let Phase::InProgress(index) = self.phase else {
            return Err(NavError::NotInteractive);
        };
        let question = self.questions.get(index).ok_or(NavError::QuestionNotCurrent)?;
        if question.id != question_id {
            return Err(NavError::QuestionNotCurrent);
        }
        if !question.option_ids.iter().any(|id| id == option_id) {
            return Err(NavError::UnknownOption);
        }

        let selection = self.selections.entry(question_id.to_string()).or_default();
        match question.kind {
            QuestionKind::SingleChoice => {
                selection.clear();
                selection.insert(option_id.to_string());
                let last = index + 1 == self.questions.len();
                Ok(SelectionOutcome {
                    auto_advance_to: if last { None } else { Some(index + 1) },
                })
            }
            QuestionKind::MultipleChoice => {
                if !selection.remove(option_id) {
                    selection.insert(option_id.to_string());
                }
                Ok(SelectionOutcome { auto_advance_to: None })
            }
        }
    }

    /// Applies a delayed auto-advance. Dropped silently when the student has
    /// already navigated away or the attempt left `InProgress`.
    pub fn auto_advance(&mut self, from_index: usize) -> bool {
        if self.phase == Phase::InProgress(from_index) && from_index + 1 < self.questions.len() {
            self.phase = Phase::InProgress(from_index + 1);
            true
        } else {
            false
        }
    }

    pub fn next(&mut self) -> Result<(), NavError> {
        match self.phase {
            Phase::InProgress(index) if index + 1 < self.questions.len() => {
                self.phase = Phase::InProgress(index + 1);
                Ok(())
            }
            Phase::InProgress(_) => {
                self.phase = Phase::Summary { warned: false };
                Ok(())
            }
            _ => Err(NavError::NotInteractive),
        }
    }

    pub fn previous(&mut self) -> Result<(), NavError> {
        match self.phase {
            Phase::InProgress(index) => {
                if index > 0 {
                    self.phase = Phase::InProgress(index - 1);
                }
                Ok(())
            }
            _ => Err(NavError::NotInteractive),
        }
    }

    /// Jumping is allowed from any question and from the summary; coming back
    /// from the summary clears a pending incomplete warning.
    pub fn jump(&mut self, index: usize) -> Result<(), NavError> {
        if !self.is_interactive() {
            return Err(NavError::NotInteractive);
        }
        if index >= self.questions.len() {
            return Err(NavError::OutOfRange);
        }
        self.phase = Phase::InProgress(index);
        Ok(())
    }

    pub fn to_summary(&mut self) -> Result<(), NavError> {
        match self.phase {
            Phase::InProgress(_) | Phase::Summary { .. } => {
                self.phase = Phase::Summary { warned: false };
                Ok(())
            }
            _ => Err(NavError::NotInteractive),
        }
    }

    /// Manual submission from the summary. The first request with unanswered
    /// questions arms a warning; the immediately following request proceeds.
    pub fn request_submit(&mut self) -> Result<SubmitDecision, NavError> {
        let Phase::Summary { warned } = self.phase else {
            return Err(NavError::NotInteractive);
        };
        let unanswered = self.unanswered_count();
        if unanswered > 0 && !warned {
            self.phase = Phase::Summary { warned: true };
            return Ok(SubmitDecision::WarnIncomplete { unanswered });
        }
        self.phase = Phase::Finalizing;
        Ok(SubmitDecision::Proceed)
    }

    /// Deadline expiry submits from wherever the student is, skipping the
    /// incomplete warning.
    pub fn begin_timeout(&mut self) -> bool {
        if self.is_interactive() {
            self.phase = Phase::Finalizing;
            true
        } else {
            false
        }
    }

    pub fn complete(&mut self) {
        if self.phase == Phase::Finalizing {
            self.phase = Phase::Completed;
        }
    }

    /// A transient finalization failure puts the student back on the summary
    /// with the warning already spent, so the retry submits directly.
    pub fn finalize_failed(&mut self) {
        if self.phase == Phase::Finalizing {
            self.phase = Phase::Summary { warned: true };
        }
    }

    pub fn invalidate(&mut self) {
        if self.phase != Phase::Completed {
            self.phase = Phase::Invalidated;
        }
    }

    pub fn selections_for_submit(&self) -> Vec<AnswerSelection> {
        self.questions
            .iter()
            .filter_map(|question| {
                let option_ids = self.selections.get(&question.id)?;
                if option_ids.is_empty() {
                    return None;
                }
                Some(AnswerSelection {
                    question_id: question.id.clone(),
                    option_ids: option_ids.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str, kind: QuestionKind, options: &[&str]) -> QuestionKey {
        QuestionKey {
            id: id.to_string(),
            kind,
            option_ids: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    fn three_questions() -> Navigator {
        let mut nav = Navigator::new(vec![
            key("q1", QuestionKind::SingleChoice, &["a", "b"]),
            key("q2", QuestionKind::MultipleChoice, &["c", "d", "e"]),
            key("q3", QuestionKind::SingleChoice, &["f", "g"]),
        ]);
        nav.accept_policy();
        nav
    }

    #[test]
    fn starts_awaiting_consent() {
        let nav = Navigator::new(vec![key("q1", QuestionKind::SingleChoice, &["a"])]);
        assert_eq!(nav.phase(), Phase::AwaitingConsent);
        assert!(!nav.is_interactive());
    }

    #[test]
    fn single_choice_replaces_and_requests_auto_advance() {
        let mut nav = three_questions();
        let outcome = nav.select_option("q1", "a").unwrap();
        assert_eq!(outcome.auto_advance_to, Some(1));

        let outcome = nav.select_option("q1", "b").unwrap();
        assert_eq!(outcome.auto_advance_to, Some(1));
        assert_eq!(
            nav.selections_for_submit()[0].option_ids,
            BTreeSet::from(["b".to_string()])
        );
    }

    #[test]
    fn single_choice_on_last_question_does_not_auto_advance() {
        let mut nav = three_questions();
        nav.jump(2).unwrap();
        let outcome = nav.select_option("q3", "f").unwrap();
        assert_eq!(outcome.auto_advance_to, None);
    }

    #[test]
    fn multiple_choice_toggles_without_auto_advance() {
        let mut nav = three_questions();
        nav.next().unwrap();
        assert_eq!(nav.select_option("q2", "c").unwrap().auto_advance_to, None);
        nav.select_option("q2", "d").unwrap();
        nav.select_option("q2", "c").unwrap();

        let selections = nav.selections_for_submit();
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].option_ids, BTreeSet::from(["d".to_string()]));
    }

    #[test]
    fn stale_auto_advance_is_dropped_after_manual_navigation() {
        let mut nav = three_questions();
        nav.select_option("q1", "a").unwrap();
        nav.jump(2).unwrap();
        assert!(!nav.auto_advance(0));
        assert_eq!(nav.phase(), Phase::InProgress(2));
    }

    #[test]
    fn selecting_a_non_current_question_is_rejected() {
        let mut nav = three_questions();
        assert_eq!(nav.select_option("q2", "c"), Err(NavError::QuestionNotCurrent));
        assert_eq!(nav.select_option("q1", "zzz"), Err(NavError::UnknownOption));
    }

    #[test]
    fn next_on_last_question_reaches_summary() {
        let mut nav = three_questions();
        nav.next().unwrap();
        nav.next().unwrap();
        nav.next().unwrap();
        assert_eq!(nav.phase(), Phase::Summary { warned: false });
    }

    #[test]
    fn previous_on_first_question_stays_put() {
        let mut nav = three_questions();
        nav.previous().unwrap();
        assert_eq!(nav.phase(), Phase::InProgress(0));
    }

    #[test]
    fn incomplete_submit_warns_once_then_proceeds() {
        let mut nav = three_questions();
        nav.select_option("q1", "a").unwrap();
        nav.to_summary().unwrap();

        assert_eq!(
            nav.request_submit().unwrap(),
            SubmitDecision::WarnIncomplete { unanswered: 2 }
        );
        assert_eq!(nav.request_submit().unwrap(), SubmitDecision::Proceed);
        assert_eq!(nav.phase(), Phase::Finalizing);
    }

    #[test]
    fn leaving_summary_resets_the_incomplete_warning() {
        let mut nav = three_questions();
        nav.to_summary().unwrap();
        nav.request_submit().unwrap();
        nav.jump(1).unwrap();
        nav.to_summary().unwrap();

        assert_eq!(
            nav.request_submit().unwrap(),
            SubmitDecision::WarnIncomplete { unanswered: 3 }
        );
    }

    #[test]
    fn complete_submit_proceeds_without_warning() {
        let mut nav = three_questions();
        nav.select_option("q1", "a").unwrap();
        nav.next().unwrap();
        nav.select_option("q2", "c").unwrap();
        nav.next().unwrap();
        nav.select_option("q3", "f").unwrap();
        nav.next().unwrap();

        assert_eq!(nav.request_submit().unwrap(), SubmitDecision::Proceed);
    }

    #[test]
    fn timeout_submits_from_any_interactive_phase() {
        let mut nav = three_questions();
        assert!(nav.begin_timeout());
        assert_eq!(nav.phase(), Phase::Finalizing);
        assert!(!nav.begin_timeout());
    }

    #[test]
    fn failed_finalization_returns_to_summary_with_warning_spent() {
        let mut nav = three_questions();
        nav.begin_timeout();
        nav.finalize_failed();
        assert_eq!(nav.phase(), Phase::Summary { warned: true });
        assert_eq!(nav.request_submit().unwrap(), SubmitDecision::Proceed);
    }

    #[test]
    fn invalidation_is_absorbing() {
        let mut nav = three_questions();
        nav.invalidate();
        assert_eq!(nav.phase(), Phase::Invalidated);
        assert_eq!(nav.next(), Err(NavError::NotInteractive));
        assert_eq!(nav.select_option("q1", "a"), Err(NavError::NotInteractive));
        nav.complete();
        assert_eq!(nav.phase(), Phase::Invalidated);
    }

    #[test]
    fn completed_attempt_ignores_invalidation() {
        let mut nav = three_questions();
        nav.begin_timeout();
        nav.complete();
        nav.invalidate();
        assert_eq!(nav.phase(), Phase::Completed);
    }

    #[test]
    fn empty_selections_are_omitted_from_submission() {
        let mut nav = three_questions();
        nav.next().unwrap();
        nav.select_option("q2", "c").unwrap();
        nav.select_option("q2", "c").unwrap();
        assert!(nav.selections_for_submit().is_empty());
        assert_eq!(nav.unanswered_count(), 3);
    }
}
