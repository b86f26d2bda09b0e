//! Async driver around [`QuizSession`]: waits out scheduled transitions,
//! dispatches lifecycle events without blocking, and persists the result.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::hidden_fields::{self, CaptureContext};
use crate::models::{AnswerValue, Quiz};
use crate::session::{EngineError, QuizResult, QuizSession, ScheduledTransition, SessionView};
use crate::submission::SubmissionStore;
use crate::tracking::ConversionSink;

pub struct QuizRunner {
    session: QuizSession,
    sink: Arc<dyn ConversionSink>,
    store: Arc<dyn SubmissionStore>,
}

impl QuizRunner {
    pub fn start(
        quiz: Arc<Quiz>,
        delay: Duration,
        sink: Arc<dyn ConversionSink>,
        store: Arc<dyn SubmissionStore>,
    ) -> Result<Self, EngineError> {
        let session = QuizSession::new(quiz, delay)?;
        let mut runner = Self {
            session,
            sink,
            store,
        };
        runner.flush_events();
        Ok(runner)
    }

    pub fn session(&self) -> &QuizSession {
        &self.session
    }

    pub fn view(&self) -> SessionView {
        self.session.view()
    }

    fn flush_events(&mut self) {
        for event in self.session.take_events() {
            let pending = self.sink.track(&event);
            tokio::spawn(async move {
                if let Err(err) = pending.await {
                    warn!("failed to track {:?} event: {}", event.kind, err);
                }
            });
        }
    }

    async fn settle(&mut self, transition: ScheduledTransition) -> Result<(), EngineError> {
        self.flush_events();
        if !transition.after.is_zero() {
            tokio::time::sleep(transition.after).await;
        }
        self.session.commit_transition()?;
        Ok(())
    }

    pub async fn answer(&mut self, question_id: &str, value: AnswerValue) -> Result<(), EngineError> {
        let transition = self.session.advance(question_id, value)?;
        self.settle(transition).await
    }

    pub async fn select_option(&mut self, question_id: &str, value: &str) -> Result<(), EngineError> {
        match self.session.select_option(question_id, value)? {
            Some(transition) => self.settle(transition).await,
            None => Ok(()),
        }
    }

    pub fn selection_change(&mut self, question_id: &str, selected: Vec<String>) -> Result<(), EngineError> {
        self.session.selection_change(question_id, selected)
    }

    pub fn set_text(&mut self, text: &str) -> Result<(), EngineError> {
        self.session.set_text(text)
    }

    pub async fn submit(&mut self, question_id: &str) -> Result<(), EngineError> {
        let transition = self.session.submit(question_id)?;
        self.settle(transition).await
    }

    pub async fn skip(&mut self, question_id: &str) -> Result<(), EngineError> {
        let transition = self.session.skip(question_id)?;
        self.settle(transition).await
    }

    pub fn go_back(&mut self, question_id: &str) -> Result<(), EngineError> {
        self.session.go_back(question_id)
    }

    /// Validates the lead form, stores the response and moves to results.
    /// On failure the session stays at lead capture with its answers intact.
    pub async fn complete_lead_capture(
        &mut self,
        form: &Map<String, Value>,
        ctx: &CaptureContext,
    ) -> Result<QuizResult, EngineError> {
        let hidden = hidden_fields::capture(
            &self.session.quiz().settings.lead_capture.hidden_fields,
            ctx,
        );
        let prepared = self.session.prepare_submission(form, hidden, Utc::now())?;
        let receipt = self
            .store
            .submit(prepared.submission.clone())
            .await
            .map_err(|err| {
                warn!(
                    "failed to store response for quiz {}: {}",
                    self.session.quiz().id,
                    err
                );
                EngineError::Submission(err.to_string())
            })?;
        let result = self.session.finish(prepared, receipt)?;
        self.flush_events();
        info!(
            "session {} completed quiz {} with score {} ({})",
            self.session.session_id(),
            self.session.quiz().id,
            result.score,
            result.outcome
        );
        Ok(result)
    }
}
