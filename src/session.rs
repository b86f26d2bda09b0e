//! Quiz-taking state machine.
//!
//! A session walks `Question -> LeadCapture -> Results`. Answering schedules a
//! transition instead of applying it: the caller waits `after` and then calls
//! [`QuizSession::commit_transition`]. Any input that arrives while a
//! transition is pending is rejected.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{AnswerValue, Question, QuestionType, Quiz, ThankYouPage, ValidationIssue};
use crate::scoring::{compute_score, resolve_outcome};
use crate::submission::{lead_from_form, ResponseSubmission, SubmissionReceipt};
use crate::tracking::{InteractionType, TrackingEvent};

pub const TRANSITION_DELAY: Duration = Duration::from_millis(300);

/// Recorded for informational questions submitted without a selection.
pub const CONTINUE_VALUE: &str = "continue";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("quiz has no active questions")]
    NotReady,
    #[error("operation requires the {expected} step, session is at {actual}")]
    WrongStep {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("a step transition is still pending")]
    TransitionPending,
    #[error("no step transition is pending")]
    NothingPending,
    #[error("answer is for question {got}, current question is {expected}")]
    QuestionMismatch { expected: String, got: String },
    #[error("option {0} does not belong to the current question")]
    UnknownOption(String),
    #[error("{0} questions do not take this input")]
    UnsupportedInput(&'static str),
    #[error("an answer is required before continuing")]
    InputRequired,
    #[error("question cannot be skipped")]
    SkipNotAllowed,
    #[error("going back is not allowed here")]
    BackNotAllowed,
    #[error("lead form is invalid")]
    InvalidLeadForm(Vec<ValidationIssue>),
    #[error("submission failed: {0}")]
    Submission(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub score: i64,
    pub outcome: String,
    pub thank_you_page: Option<ThankYouPage>,
    pub response_id: Uuid,
    pub lead_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Question { index: usize },
    LeadCapture,
    Results(Box<QuizResult>),
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Question { .. } => "question",
            Step::LeadCapture => "lead_capture",
            Step::Results(_) => "results",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionTarget {
    Question(usize),
    LeadCapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTransition {
    pub after: Duration,
    pub target: TransitionTarget,
}

/// Everything needed to persist a finished session, computed before the
/// store is called so a failed write can be retried with identical state.
#[derive(Debug, Clone)]
pub struct PreparedSubmission {
    pub submission: ResponseSubmission,
    pub score: i64,
    pub outcome: String,
    pub thank_you_page: Option<ThankYouPage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: Uuid,
    pub quiz_id: Uuid,
    pub step: &'static str,
    pub index: Option<usize>,
    pub total_questions: usize,
    pub progress: f64,
    pub show_progress_bar: bool,
    pub question: Option<Question>,
    pub selected: Vec<String>,
    pub text: String,
    pub next_disabled: bool,
    pub can_skip: bool,
    pub can_go_back: bool,
    pub result: Option<QuizResult>,
}

pub struct QuizSession {
    quiz: Arc<Quiz>,
    questions: Vec<Question>,
    step: Step,
    answers: BTreeMap<String, AnswerValue>,
    selections: HashMap<String, Vec<String>>,
    text_buffer: String,
    session_id: Uuid,
    started_at: DateTime<Utc>,
    delay: Duration,
    pending: Option<TransitionTarget>,
    started: bool,
    outbox: Vec<TrackingEvent>,
}

fn dedup_preserving_order(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

impl QuizSession {
    pub fn new(quiz: Arc<Quiz>, delay: Duration) -> Result<Self, EngineError> {
        Self::with_clock(quiz, delay, Utc::now())
    }

    pub fn with_clock(
        quiz: Arc<Quiz>,
        delay: Duration,
        started_at: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let questions = quiz.runnable_questions();
        if questions.is_empty() {
            return Err(EngineError::NotReady);
        }
        let mut session = Self {
            quiz,
            questions,
            step: Step::Question { index: 0 },
            answers: BTreeMap::new(),
            selections: HashMap::new(),
            text_buffer: String::new(),
            session_id: Uuid::new_v4(),
            started_at,
            delay,
            pending: None,
            started: false,
            outbox: Vec::new(),
        };
        session.emit(InteractionType::View, None);
        Ok(session)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn quiz(&self) -> &Arc<Quiz> {
        &self.quiz
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn answers(&self) -> &BTreeMap<String, AnswerValue> {
        &self.answers
    }

    pub fn text(&self) -> &str {
        &self.text_buffer
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn current_question(&self) -> Option<&Question> {
        match self.step {
            Step::Question { index } => self.questions.get(index),
            _ => None,
        }
    }

    pub fn selection(&self, question_id: &str) -> &[String] {
        self.selections
            .get(question_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn result(&self) -> Option<&QuizResult> {
        match &self.step {
            Step::Results(result) => Some(result),
            _ => None,
        }
    }

    /// Pending lifecycle events, oldest first.
    pub fn take_events(&mut self) -> Vec<TrackingEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn emit(&mut self, kind: InteractionType, metadata: Option<Value>) {
        self.outbox.push(TrackingEvent {
            quiz_id: self.quiz.id,
            session_id: self.session_id.to_string(),
            kind,
            metadata,
        });
    }

    /// Index of the question accepting input right now.
    fn question_index(&self) -> Result<usize, EngineError> {
        match self.step {
            Step::Question { .. } if self.pending.is_some() => Err(EngineError::TransitionPending),
            Step::Question { index } => Ok(index),
            ref other => Err(EngineError::WrongStep {
                expected: "question",
                actual: other.name(),
            }),
        }
    }

    fn check_question(&self, index: usize, question_id: &str) -> Result<(), EngineError> {
        let current = &self.questions[index];
        if current.id != question_id {
            return Err(EngineError::QuestionMismatch {
                expected: current.id.clone(),
                got: question_id.to_string(),
            });
        }
        Ok(())
    }

    /// Records the answer for the current question and schedules the move to
    /// the next question, or to lead capture after the last one.
    pub fn advance(
        &mut self,
        question_id: &str,
        value: AnswerValue,
    ) -> Result<ScheduledTransition, EngineError> {
        let index = self.question_index()?;
        self.check_question(index, question_id)?;

        let value = match value {
            AnswerValue::Multiple(values) => AnswerValue::Multiple(dedup_preserving_order(values)),
            single => single,
        };

        if !self.started {
            self.started = true;
            self.emit(InteractionType::Start, None);
        }
        self.emit(
            InteractionType::Answer,
            Some(json!({ "questionId": question_id, "value": value })),
        );
        self.answers.insert(question_id.to_string(), value);
        self.text_buffer.clear();

        let target = if index + 1 < self.questions.len() {
            TransitionTarget::Question(index + 1)
        } else {
            TransitionTarget::LeadCapture
        };
        self.pending = Some(target);
        Ok(ScheduledTransition {
            after: self.delay,
            target,
        })
    }

    pub fn commit_transition(&mut self) -> Result<&Step, EngineError> {
        let target = self.pending.take().ok_or(EngineError::NothingPending)?;
        self.step = match target {
            TransitionTarget::Question(index) => Step::Question { index },
            TransitionTarget::LeadCapture => Step::LeadCapture,
        };
        Ok(&self.step)
    }

    /// Replaces the transient selection of the current question. Never records
    /// an answer.
    pub fn selection_change(
        &mut self,
        question_id: &str,
        selected: Vec<String>,
    ) -> Result<(), EngineError> {
        let index = self.question_index()?;
        self.check_question(index, question_id)?;
        self.selections
            .insert(question_id.to_string(), dedup_preserving_order(selected));
        Ok(())
    }

    /// Whether an option click only changes the selection, leaving the answer
    /// to an explicit submit.
    fn click_selects_only(&self, question: &Question) -> bool {
        question.q_type.always_requires_submit()
            || question.has_button()
            || !self.quiz.settings.general.auto_advance
    }

    /// An option click on `question_id`. Advances immediately unless the
    /// question needs an explicit submit, in which case only the selection
    /// changes.
    pub fn select_option(
        &mut self,
        question_id: &str,
        value: &str,
    ) -> Result<Option<ScheduledTransition>, EngineError> {
        let index = self.question_index()?;
        self.check_question(index, question_id)?;
        let question = &self.questions[index];
        if question.option(value).is_none() {
            return Err(EngineError::UnknownOption(value.to_string()));
        }
        let is_multi = question.q_type == QuestionType::MultiSelect;
        let selects_only = self.click_selects_only(question);

        if is_multi {
            let mut selected = self.selection(question_id).to_vec();
            if let Some(pos) = selected.iter().position(|v| v == value) {
                selected.remove(pos);
            } else {
                selected.push(value.to_string());
            }
            self.selection_change(question_id, selected)?;
            return Ok(None);
        }
        if selects_only {
            self.selection_change(question_id, vec![value.to_string()])?;
            return Ok(None);
        }
        self.advance(question_id, AnswerValue::Single(value.to_string()))
            .map(Some)
    }

    pub fn set_text(&mut self, text: &str) -> Result<(), EngineError> {
        let index = self.question_index()?;
        if self.questions[index].q_type != QuestionType::Text {
            return Err(EngineError::UnsupportedInput("non-text"));
        }
        self.text_buffer = text.to_string();
        Ok(())
    }

    /// Whether the explicit submit action is blocked for the current input.
    pub fn is_next_disabled(&self) -> bool {
        let Some(question) = self.current_question() else {
            return true;
        };
        match question.q_type {
            QuestionType::Text => self.text_buffer.trim().is_empty(),
            t if t.is_informational() => false,
            _ if self.click_selects_only(question) => self.selection(&question.id).is_empty(),
            _ => false,
        }
    }

    pub fn can_skip(&self) -> bool {
        self.pending.is_none()
            && self
                .current_question()
                .map(|q| !q.is_required && self.is_next_disabled())
                .unwrap_or(false)
    }

    pub fn can_go_back(&self) -> bool {
        match self.step {
            Step::Question { index } => {
                self.pending.is_none() && index > 0 && self.questions[index].allow_back
            }
            _ => false,
        }
    }

    /// The explicit submit button of `question_id`.
    pub fn submit(&mut self, question_id: &str) -> Result<ScheduledTransition, EngineError> {
        let index = self.question_index()?;
        self.check_question(index, question_id)?;
        if self.is_next_disabled() {
            return Err(EngineError::InputRequired);
        }
        let question = &self.questions[index];
        let selected = self.selection(&question.id).to_vec();
        let value = match question.q_type {
            QuestionType::Text => AnswerValue::Single(self.text_buffer.clone()),
            QuestionType::MultiSelect => AnswerValue::Multiple(selected),
            t if t.is_informational() => AnswerValue::Single(
                selected
                    .first()
                    .cloned()
                    .unwrap_or_else(|| CONTINUE_VALUE.to_string()),
            ),
            _ => AnswerValue::Single(selected.first().cloned().ok_or(EngineError::InputRequired)?),
        };
        self.advance(question_id, value)
    }

    /// Records an empty answer for an optional question and advances.
    pub fn skip(&mut self, question_id: &str) -> Result<ScheduledTransition, EngineError> {
        let index = self.question_index()?;
        self.check_question(index, question_id)?;
        if !self.can_skip() {
            return Err(EngineError::SkipNotAllowed);
        }
        let value = if self.questions[index].q_type == QuestionType::MultiSelect {
            AnswerValue::Multiple(Vec::new())
        } else {
            AnswerValue::Single(String::new())
        };
        self.selections.remove(question_id);
        self.advance(question_id, value)
    }

    /// Steps back from `question_id` to the previous question. Recorded
    /// answers are kept.
    pub fn go_back(&mut self, question_id: &str) -> Result<(), EngineError> {
        let index = self.question_index()?;
        self.check_question(index, question_id)?;
        if !self.can_go_back() {
            return Err(EngineError::BackNotAllowed);
        }
        self.step = Step::Question { index: index - 1 };
        self.text_buffer.clear();
        Ok(())
    }

    /// Scores the answers, resolves the outcome, and builds the submission.
    /// Does not change the session.
    pub fn prepare_submission(
        &self,
        form: &Map<String, Value>,
        hidden_data: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<PreparedSubmission, EngineError> {
        if self.step != Step::LeadCapture {
            return Err(EngineError::WrongStep {
                expected: "lead_capture",
                actual: self.step.name(),
            });
        }
        let score = compute_score(&self.questions, &self.answers);
        let outcome = resolve_outcome(score, &self.quiz.thank_you_pages);
        let capture = &self.quiz.settings.lead_capture;
        let lead = if capture.enabled {
            lead_from_form(capture, form, hidden_data, score, &outcome.label)
                .map_err(EngineError::InvalidLeadForm)?
        } else {
            None
        };

        let elapsed_ms = (now - self.started_at).num_milliseconds().max(0);
        let time_taken = (elapsed_ms as f64 / 1000.0).round() as u32;

        Ok(PreparedSubmission {
            submission: ResponseSubmission {
                quiz_id: self.quiz.id,
                answers: self.answers.clone(),
                time_taken: Some(time_taken),
                lead,
            },
            score,
            outcome: outcome.label,
            thank_you_page: outcome.page.cloned(),
        })
    }

    /// Moves to results once the submission has been stored.
    pub fn finish(
        &mut self,
        prepared: PreparedSubmission,
        receipt: SubmissionReceipt,
    ) -> Result<QuizResult, EngineError> {
        if self.step != Step::LeadCapture {
            return Err(EngineError::WrongStep {
                expected: "lead_capture",
                actual: self.step.name(),
            });
        }
        self.emit(
            InteractionType::Complete,
            Some(json!({
                "score": prepared.score,
                "outcome": prepared.outcome,
                "leadId": receipt.lead_id,
            })),
        );
        let result = QuizResult {
            score: prepared.score,
            outcome: prepared.outcome,
            thank_you_page: prepared.thank_you_page,
            response_id: receipt.response_id,
            lead_id: receipt.lead_id,
        };
        self.step = Step::Results(Box::new(result.clone()));
        Ok(result)
    }

    pub fn view(&self) -> SessionView {
        let total = self.questions.len();
        let index = match self.step {
            Step::Question { index } => Some(index),
            _ => None,
        };
        let progress = match &self.step {
            Step::Question { index } => ((index + 1) as f64 / total as f64) * 100.0,
            _ => 100.0,
        };
        let question = self.current_question().cloned();
        let selected = question
            .as_ref()
            .map(|q| self.selection(&q.id).to_vec())
            .unwrap_or_default();
        SessionView {
            session_id: self.session_id,
            quiz_id: self.quiz.id,
            step: self.step.name(),
            index,
            total_questions: total,
            progress,
            show_progress_bar: self.quiz.settings.general.show_progress_bar,
            question,
            selected,
            text: self.text_buffer.clone(),
            next_disabled: self.is_next_disabled(),
            can_skip: self.can_skip(),
            can_go_back: self.can_go_back(),
            result: self.result().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::models::{LeadField, LeadFieldType};

    fn session(quiz: Quiz) -> QuizSession {
        QuizSession::new(Arc::new(quiz), Duration::ZERO).unwrap()
    }

    fn text_quiz() -> Quiz {
        quiz(
            vec![
                question("name", QuestionType::Text, 0, vec![]),
                question("end", QuestionType::Content, 1, vec![]),
            ],
            vec![],
        )
    }

    fn receipt() -> SubmissionReceipt {
        SubmissionReceipt {
            response_id: Uuid::new_v4(),
            lead_id: None,
            lead_created: false,
        }
    }

    fn email_form(email: &str) -> Map<String, Value> {
        let mut form = Map::new();
        form.insert("email".into(), json!(email));
        form
    }

    #[test]
    fn zero_questions_is_not_ready() {
        let err = QuizSession::new(Arc::new(quiz(vec![], vec![])), Duration::ZERO).err();
        assert!(matches!(err, Some(EngineError::NotReady)));
    }

    #[test]
    fn inactive_questions_are_skipped_and_order_respected() {
        let mut q = scored_quiz();
        q.questions.swap(0, 1);
        let mut hidden = question("hidden", QuestionType::YesNo, 0, vec![option("yes", None)]);
        hidden.is_active = false;
        q.questions.push(hidden);
        let s = session(q);
        assert_eq!(s.current_question().unwrap().id, "q1");
        assert_eq!(s.view().total_questions, 2);
    }

    #[test]
    fn click_advances_immediately_and_last_question_leads_to_capture() {
        let mut s = session(scored_quiz());
        let t = s.select_option("q1", "a").unwrap().unwrap();
        assert_eq!(t.target, TransitionTarget::Question(1));
        assert_eq!(s.step(), &Step::Question { index: 0 });
        s.commit_transition().unwrap();
        assert_eq!(s.current_question().unwrap().id, "q2");

        let t = s.select_option("q2", "d").unwrap().unwrap();
        assert_eq!(t.target, TransitionTarget::LeadCapture);
        s.commit_transition().unwrap();
        assert_eq!(s.step(), &Step::LeadCapture);
        assert_eq!(s.answers().len(), 2);
    }

    #[test]
    fn pending_transition_rejects_rapid_second_input() {
        let mut s = session(scored_quiz());
        s.select_option("q1", "a").unwrap();
        assert!(matches!(s.select_option("q1", "b"), Err(EngineError::TransitionPending)));
        assert!(matches!(s.go_back("q1"), Err(EngineError::TransitionPending)));
        assert_eq!(s.answers()["q1"], AnswerValue::Single("a".into()));
        s.commit_transition().unwrap();
        assert!(matches!(s.commit_transition(), Err(EngineError::NothingPending)));
    }

    #[test]
    fn advance_rejects_stale_question_id() {
        let mut s = session(scored_quiz());
        let err = s.advance("q2", AnswerValue::Single("c".into())).err().unwrap();
        assert!(matches!(err, EngineError::QuestionMismatch { .. }));
        assert!(s.answers().is_empty());
    }

    #[test]
    fn repeated_click_after_transition_does_not_answer_next_question() {
        let mut s = session(scored_quiz());
        s.select_option("q1", "a").unwrap();
        s.commit_transition().unwrap();
        let err = s.select_option("q1", "a").err().unwrap();
        assert!(matches!(err, EngineError::QuestionMismatch { .. }));
        assert!(matches!(s.submit("q1"), Err(EngineError::QuestionMismatch { .. })));
        assert!(matches!(s.skip("q1"), Err(EngineError::QuestionMismatch { .. })));
        assert!(!s.answers().contains_key("q2"));
        assert_eq!(s.step(), &Step::Question { index: 1 });
    }

    #[test]
    fn without_auto_advance_clicks_only_select() {
        let mut q = scored_quiz();
        q.settings.general.auto_advance = false;
        let mut s = session(q);
        assert!(s.is_next_disabled());
        assert!(s.select_option("q1", "b").unwrap().is_none());
        assert!(s.answers().is_empty());
        assert!(!s.is_next_disabled());
        s.submit("q1").unwrap();
        assert_eq!(s.answers()["q1"], AnswerValue::Single("b".into()));
    }

    #[test]
    fn blank_text_does_not_advance() {
        let mut s = session(text_quiz());
        s.set_text("   \t").unwrap();
        assert!(s.is_next_disabled());
        assert!(matches!(s.submit("name"), Err(EngineError::InputRequired)));
        assert!(s.answers().is_empty());
        assert!(!s.is_pending());
    }

    #[test]
    fn non_blank_text_advances_exactly_once() {
        let mut s = session(text_quiz());
        s.set_text("Ada").unwrap();
        s.submit("name").unwrap();
        assert!(matches!(s.submit("name"), Err(EngineError::TransitionPending)));
        s.commit_transition().unwrap();
        assert_eq!(s.step(), &Step::Question { index: 1 });
        assert_eq!(s.answers()["name"], AnswerValue::Single("Ada".into()));
        assert_eq!(s.text(), "");
    }

    #[test]
    fn content_question_submits_continue() {
        let mut s = session(text_quiz());
        s.set_text("Ada").unwrap();
        s.submit("name").unwrap();
        s.commit_transition().unwrap();
        assert!(!s.is_next_disabled());
        s.submit("end").unwrap();
        s.commit_transition().unwrap();
        assert_eq!(s.answers()["end"], AnswerValue::Single(CONTINUE_VALUE.into()));
        assert_eq!(s.step(), &Step::LeadCapture);
    }

    #[test]
    fn selection_changes_record_only_final_submission() {
        let mut q = scored_quiz();
        q.questions[0].button_text = Some("Next".into());
        let mut s = session(q);
        assert!(s.is_next_disabled());
        assert!(s.select_option("q1", "a").unwrap().is_none());
        s.selection_change("q1", vec!["b".into()]).unwrap();
        s.selection_change("q1", vec!["a".into()]).unwrap();
        assert!(s.answers().is_empty());
        s.submit("q1").unwrap();
        assert_eq!(s.answers().len(), 1);
        assert_eq!(s.answers()["q1"], AnswerValue::Single("a".into()));
    }

    #[test]
    fn multi_select_toggles_and_submits_ordered_list() {
        let q = quiz(
            vec![question(
                "m",
                QuestionType::MultiSelect,
                0,
                vec![option("x", Some(1)), option("y", Some(1)), option("z", Some(1))],
            )],
            vec![],
        );
        let mut s = session(q);
        assert!(matches!(s.submit("m"), Err(EngineError::InputRequired)));
        s.select_option("m", "z").unwrap();
        s.select_option("m", "x").unwrap();
        s.select_option("m", "y").unwrap();
        s.select_option("m", "x").unwrap();
        assert_eq!(s.selection("m"), ["z", "y"]);
        s.submit("m").unwrap();
        assert_eq!(
            s.answers()["m"],
            AnswerValue::Multiple(vec!["z".into(), "y".into()])
        );
    }

    #[test]
    fn selection_change_enforces_uniqueness() {
        let mut s = session(scored_quiz());
        s.selection_change("q1", vec!["a".into(), "b".into(), "a".into()]).unwrap();
        assert_eq!(s.selection("q1"), ["a", "b"]);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let mut s = session(scored_quiz());
        assert!(matches!(s.select_option("q1", "zzz"), Err(EngineError::UnknownOption(_))));
    }

    #[test]
    fn skip_only_for_optional_empty_input() {
        let mut q = text_quiz();
        let mut s = session(q.clone());
        assert!(!s.can_skip());
        assert!(matches!(s.skip("name"), Err(EngineError::SkipNotAllowed)));

        q.questions[0].is_required = false;
        let mut s = session(q);
        s.set_text("typed").unwrap();
        assert!(!s.can_skip());
        s.set_text("").unwrap();
        assert!(s.can_skip());
        s.skip("name").unwrap();
        assert_eq!(s.answers()["name"], AnswerValue::Single(String::new()));
    }

    #[test]
    fn skip_multi_select_records_empty_list() {
        let mut m = question("m", QuestionType::MultiSelect, 0, vec![option("x", None)]);
        m.is_required = false;
        let mut s = session(quiz(vec![m], vec![]));
        s.skip("m").unwrap();
        assert_eq!(s.answers()["m"], AnswerValue::Multiple(vec![]));
        assert_eq!(s.commit_transition().unwrap(), &Step::LeadCapture);
    }

    #[test]
    fn go_back_requires_allow_back_and_keeps_answers() {
        let mut q = scored_quiz();
        let mut s = session(q.clone());
        assert!(matches!(s.go_back("q1"), Err(EngineError::BackNotAllowed)));
        s.select_option("q1", "a").unwrap();
        s.commit_transition().unwrap();
        assert!(matches!(s.go_back("q2"), Err(EngineError::BackNotAllowed)));

        q.questions[1].allow_back = true;
        let mut s = session(q);
        s.select_option("q1", "a").unwrap();
        s.commit_transition().unwrap();
        assert!(s.can_go_back());
        s.go_back("q2").unwrap();
        assert_eq!(s.step(), &Step::Question { index: 0 });
        assert_eq!(s.answers()["q1"], AnswerValue::Single("a".into()));
    }

    #[test]
    fn lifecycle_events_in_order() {
        let mut s = session(scored_quiz());
        s.select_option("q1", "a").unwrap();
        s.commit_transition().unwrap();
        s.select_option("q2", "c").unwrap();
        s.commit_transition().unwrap();
        let kinds: Vec<_> = s.take_events().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                InteractionType::View,
                InteractionType::Start,
                InteractionType::Answer,
                InteractionType::Answer,
            ]
        );
        assert!(s.take_events().is_empty());
    }

    #[test]
    fn prepare_submission_scores_and_resolves_outcome() {
        let mut s = session(scored_quiz());
        s.select_option("q1", "a").unwrap();
        s.commit_transition().unwrap();
        s.select_option("q2", "d").unwrap();
        s.commit_transition().unwrap();

        let now = s.started_at + chrono::Duration::milliseconds(12_600);
        let prepared = s
            .prepare_submission(&email_form("jane@acme.io"), BTreeMap::new(), now)
            .unwrap();
        assert_eq!(prepared.score, 3);
        assert_eq!(prepared.outcome, "High");
        assert_eq!(prepared.submission.time_taken, Some(13));
        let lead = prepared.submission.lead.clone().unwrap();
        assert_eq!(lead.email.as_deref(), Some("jane@acme.io"));
        assert_eq!(lead.score, Some(3));
        assert_eq!(lead.outcome.as_deref(), Some("High"));

        s.take_events();
        let result = s.finish(prepared, receipt()).unwrap();
        assert_eq!(result.outcome, "High");
        assert_eq!(s.step().name(), "results");
        let events = s.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, InteractionType::Complete);
        assert_eq!(events[0].metadata.as_ref().unwrap()["score"], 3);
    }

    #[test]
    fn lead_capture_requires_the_lead_step() {
        let s = session(scored_quiz());
        let err = s
            .prepare_submission(&Map::new(), BTreeMap::new(), Utc::now())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::WrongStep { expected: "lead_capture", .. }));
    }

    #[test]
    fn invalid_lead_form_keeps_session_at_lead_capture() {
        let mut q = scored_quiz();
        q.settings.lead_capture.fields = vec![LeadField {
            id: "email".into(),
            field_type: LeadFieldType::Email,
            label: "Email".into(),
            required: true,
            placeholder: None,
        }];
        let mut s = session(q);
        s.select_option("q1", "a").unwrap();
        s.commit_transition().unwrap();
        s.select_option("q2", "c").unwrap();
        s.commit_transition().unwrap();
        let err = s
            .prepare_submission(&email_form("not-an-email"), BTreeMap::new(), Utc::now())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::InvalidLeadForm(_)));
        assert_eq!(s.step(), &Step::LeadCapture);
    }

    #[test]
    fn disabled_lead_capture_attaches_no_lead() {
        let mut q = scored_quiz();
        q.settings.lead_capture.enabled = false;
        let mut s = session(q);
        s.select_option("q1", "a").unwrap();
        s.commit_transition().unwrap();
        s.select_option("q2", "c").unwrap();
        s.commit_transition().unwrap();
        let mut hidden = BTreeMap::new();
        hidden.insert("utm_source".to_string(), "ads".to_string());
        let prepared = s
            .prepare_submission(&email_form("not-an-email"), hidden, Utc::now())
            .unwrap();
        assert!(prepared.submission.lead.is_none());
        assert_eq!(prepared.score, 8);
    }

    #[test]
    fn view_reports_progress() {
        let s = session(scored_quiz());
        let view = s.view();
        assert_eq!(view.step, "question");
        assert_eq!(view.index, Some(0));
        assert_eq!(view.progress, 50.0);
        assert!(view.show_progress_bar);
        assert!(!view.next_disabled);
    }
}
