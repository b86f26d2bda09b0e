use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::{fs, path::Path};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::hidden_fields::CaptureContext;
use crate::models::{AbTest, Integration, Lead, Quiz, ResponseRecord};
use crate::runner::QuizRunner;
use crate::splitter::RandomSource;
use crate::submission::{LeadSubmission, ResponseSubmission, SubmissionReceipt, SubmissionStore};
use crate::tracking::{ConversionSink, FacebookCapiSink, FanOutSink, Interaction, InteractionLog};

/// A quiz session driven over HTTP, plus the visitor context captured when
/// it was opened.
pub struct HostedSession {
    pub runner: QuizRunner,
    pub capture: CaptureContext,
}

pub struct InMemoryDb {
    pub quizzes: RwLock<HashMap<Uuid, Quiz>>,
    pub ab_tests: RwLock<HashMap<Uuid, AbTest>>,
    pub integrations: RwLock<HashMap<Uuid, Integration>>,
    pub leads: RwLock<HashMap<Uuid, Lead>>,
    /// `(quiz id, normalized email)` to lead id.
    pub lead_index: DashMap<(Uuid, String), Uuid>,
    pub responses: RwLock<Vec<ResponseRecord>>,
    pub interactions: DashMap<Uuid, Interaction>,
    pub sessions: DashMap<Uuid, Arc<Mutex<HostedSession>>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistentSnapshot {
    quizzes: HashMap<Uuid, Quiz>,
    #[serde(default)]
    ab_tests: HashMap<Uuid, AbTest>,
    #[serde(default)]
    integrations: HashMap<Uuid, Integration>,
    #[serde(default)]
    leads: HashMap<Uuid, Lead>,
    #[serde(default)]
    responses: Vec<ResponseRecord>,
    #[serde(default)]
    interactions: Vec<Interaction>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl InMemoryDb {
    pub fn new(snapshot_path: Option<&str>) -> Self {
        let snapshot = snapshot_path
            .and_then(|path| {
                let raw = fs::read_to_string(path).ok()?;
                match serde_json::from_str::<PersistentSnapshot>(&raw) {
                    Ok(s) => Some(s),
                    Err(err) => {
                        warn!("failed to read local snapshot {}: {}", path, err);
                        None
                    }
                }
            })
            .unwrap_or_default();

        let lead_index = DashMap::new();
        for lead in snapshot.leads.values() {
            if let Some(email) = &lead.email {
                lead_index
                    .entry((lead.quiz_id, normalize_email(email)))
                    .or_insert(lead.id);
            }
        }

        let interactions = snapshot
            .interactions
            .into_iter()
            .map(|i| (i.id, i))
            .collect();

        Self {
            quizzes: RwLock::new(snapshot.quizzes),
            ab_tests: RwLock::new(snapshot.ab_tests),
            integrations: RwLock::new(snapshot.integrations),
            leads: RwLock::new(snapshot.leads),
            lead_index,
            responses: RwLock::new(snapshot.responses),
            interactions,
            sessions: DashMap::new(),
        }
    }

    async fn snapshot(&self) -> PersistentSnapshot {
        PersistentSnapshot {
            quizzes: self.quizzes.read().await.clone(),
            ab_tests: self.ab_tests.read().await.clone(),
            integrations: self.integrations.read().await.clone(),
            leads: self.leads.read().await.clone(),
            responses: self.responses.read().await.clone(),
            interactions: self.interactions.iter().map(|e| e.value().clone()).collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("slug {0} is already in use")]
    SlugTaken(String),
    #[error("quiz {0} does not exist")]
    UnknownQuiz(Uuid),
}

/// Pushes newly created leads to a quiz's configured integrations.
pub trait IntegrationSync: Send + Sync {
    fn sync_lead(&self, lead: &Lead, integration: &Integration) -> BoxFuture<'static, anyhow::Result<()>>;
}

#[derive(Clone)]
pub struct LoggingIntegrationSync;

impl IntegrationSync for LoggingIntegrationSync {
    fn sync_lead(&self, lead: &Lead, integration: &Integration) -> BoxFuture<'static, anyhow::Result<()>> {
        let lead_id = lead.id;
        let integration_id = integration.id;
        let kind = integration.kind;
        Box::pin(async move {
            info!("synced lead {} to {:?} integration {}", lead_id, kind, integration_id);
            Ok(())
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<InMemoryDb>,
    pub config: Arc<AppConfig>,
    pub quiz_schema: Arc<serde_json::Value>,
    pub random: Arc<dyn RandomSource>,
    pub sink: Arc<dyn ConversionSink>,
    pub integration_sync: Arc<dyn IntegrationSync>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        quiz_schema: serde_json::Value,
        random: Arc<dyn RandomSource>,
        integration_sync: Arc<dyn IntegrationSync>,
    ) -> Self {
        let db = Arc::new(InMemoryDb::new(config.local_state_path.as_deref()));
        let sink = FanOutSink::new(vec![
            Arc::new(InteractionLog::new(db.clone())),
            Arc::new(FacebookCapiSink::new(
                db.clone(),
                reqwest::Client::new(),
                config.facebook_graph_url.clone(),
            )),
        ]);
        Self {
            db,
            config: Arc::new(config),
            quiz_schema: Arc::new(quiz_schema),
            random,
            sink: Arc::new(sink),
            integration_sync,
        }
    }

    pub async fn quiz(&self, id: Uuid) -> Option<Quiz> {
        self.db.quizzes.read().await.get(&id).cloned()
    }

    pub async fn quiz_by_slug(&self, slug: &str) -> Option<Quiz> {
        self.db
            .quizzes
            .read()
            .await
            .values()
            .find(|q| q.slug == slug)
            .cloned()
    }

    /// Inserts or replaces a quiz; slugs stay unique across quizzes.
    pub async fn save_quiz(&self, quiz: Quiz) -> Result<(), StoreError> {
        {
            let mut quizzes = self.db.quizzes.write().await;
            if quizzes.values().any(|q| q.slug == quiz.slug && q.id != quiz.id) {
                return Err(StoreError::SlugTaken(quiz.slug));
            }
            quizzes.insert(quiz.id, quiz);
        }
        self.persist_after("save_quiz").await;
        Ok(())
    }

    /// Removes the quiz and its integrations. Leads and responses are kept.
    pub async fn delete_quiz(&self, id: Uuid) -> bool {
        let removed = self.db.quizzes.write().await.remove(&id).is_some();
        if removed {
            self.db.integrations.write().await.retain(|_, i| i.quiz_id != id);
            self.persist_after("delete_quiz").await;
        }
        removed
    }

    pub async fn save_ab_test(&self, test: AbTest) -> Result<(), StoreError> {
        {
            let mut tests = self.db.ab_tests.write().await;
            if tests.values().any(|t| t.slug == test.slug && t.id != test.id) {
                return Err(StoreError::SlugTaken(test.slug));
            }
            tests.insert(test.id, test);
        }
        self.persist_after("save_ab_test").await;
        Ok(())
    }

    pub async fn delete_ab_test(&self, id: Uuid) -> bool {
        let removed = self.db.ab_tests.write().await.remove(&id).is_some();
        if removed {
            self.persist_after("delete_ab_test").await;
        }
        removed
    }

    pub async fn save_integration(&self, integration: Integration) {
        self.db
            .integrations
            .write()
            .await
            .insert(integration.id, integration);
        self.persist_after("save_integration").await;
    }

    pub async fn delete_integration(&self, quiz_id: Uuid, id: Uuid) -> bool {
        let removed = {
            let mut integrations = self.db.integrations.write().await;
            match integrations.get(&id) {
                Some(i) if i.quiz_id == quiz_id => integrations.remove(&id).is_some(),
                _ => false,
            }
        };
        if removed {
            self.persist_after("delete_integration").await;
        }
        removed
    }

    /// Drops hosted sessions opened more than the configured TTL before `now`.
    /// Sessions busy with a request are left for the next sweep.
    pub fn evict_stale_sessions(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.config.session_ttl).unwrap_or(chrono::Duration::MAX);
        let mut evicted = 0;
        self.db.sessions.retain(|_, session| match session.try_lock() {
            Ok(hosted) if now - hosted.runner.session().started_at() >= ttl => {
                evicted += 1;
                false
            }
            _ => true,
        });
        evicted
    }

    /// Lead id for the submission: an existing lead with the same email on
    /// the same quiz is reused, otherwise a new lead is created.
    async fn upsert_lead(&self, quiz_id: Uuid, submitted: LeadSubmission) -> (Lead, bool) {
        let claim = submitted.email.as_deref().map(|email| {
            match self.db.lead_index.entry((quiz_id, normalize_email(email))) {
                Entry::Occupied(existing) => (*existing.get(), false),
                Entry::Vacant(slot) => {
                    let id = Uuid::new_v4();
                    slot.insert(id);
                    (id, true)
                }
            }
        });
        let (id, created) = claim.unwrap_or_else(|| (Uuid::new_v4(), true));

        if !created {
            if let Some(existing) = self.db.leads.read().await.get(&id).cloned() {
                return (existing, false);
            }
        }

        let lead = Lead {
            id,
            quiz_id,
            email: submitted.email,
            name: submitted.name,
            phone: submitted.phone,
            country: None,
            metadata: submitted.metadata,
            hidden_data: submitted.hidden_data,
            score: submitted.score,
            outcome: submitted.outcome,
            created_at: Utc::now(),
        };
        if created {
            self.db.leads.write().await.insert(id, lead.clone());
        }
        (lead, created)
    }

    pub async fn submit_response(&self, submission: ResponseSubmission) -> anyhow::Result<SubmissionReceipt> {
        let quiz_id = submission.quiz_id;
        if !self.db.quizzes.read().await.contains_key(&quiz_id) {
            return Err(StoreError::UnknownQuiz(quiz_id).into());
        }

        let mut new_lead = None;
        let lead_id = match submission.lead.filter(LeadSubmission::has_contact) {
            Some(submitted) => {
                let (lead, created) = self.upsert_lead(quiz_id, submitted).await;
                let id = lead.id;
                if created {
                    new_lead = Some(lead);
                }
                Some(id)
            }
            None => None,
        };

        let record = ResponseRecord {
            id: Uuid::new_v4(),
            quiz_id,
            lead_id,
            answers: submission.answers,
            time_taken: submission.time_taken,
            completed_at: Utc::now(),
        };
        let response_id = record.id;
        self.db.responses.write().await.push(record);
        self.persist_after("submit_response").await;

        if let Some(lead) = &new_lead {
            self.sync_new_lead(lead).await;
        }

        Ok(SubmissionReceipt {
            response_id,
            lead_id,
            lead_created: new_lead.is_some(),
        })
    }

    async fn sync_new_lead(&self, lead: &Lead) {
        let targets: Vec<Integration> = self
            .db
            .integrations
            .read()
            .await
            .values()
            .filter(|i| i.quiz_id == lead.quiz_id && i.is_active)
            .cloned()
            .collect();
        for integration in &targets {
            if let Err(err) = self.integration_sync.sync_lead(lead, integration).await {
                warn!("failed to sync lead {} to integration {}: {}", lead.id, integration.id, err);
            }
        }
    }

    async fn persist_after(&self, action: &str) {
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after {}: {}", action, err);
        }
    }

    pub async fn persist_core_data(&self) -> anyhow::Result<()> {
        let Some(path) = self.config.local_state_path.as_ref() else {
            return Ok(());
        };
        let snapshot = self.db.snapshot().await;
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serialized).await?;
        Ok(())
    }
}

/// Periodically evicts stale hosted sessions and saves new interactions.
pub fn spawn_session_sweeper(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.session_sweep_interval);
        let mut persisted_interactions = state.db.interactions.len();
        loop {
            ticker.tick().await;
            let evicted = state.evict_stale_sessions(Utc::now());
            if evicted > 0 {
                debug!("evicted {} stale sessions", evicted);
            }
            let interactions = state.db.interactions.len();
            if interactions != persisted_interactions {
                state.persist_after("session_sweep").await;
                persisted_interactions = interactions;
            }
        }
    })
}

impl SubmissionStore for AppState {
    fn submit(&self, submission: ResponseSubmission) -> BoxFuture<'static, anyhow::Result<SubmissionReceipt>> {
        let state = self.clone();
        Box::pin(async move { state.submit_response(submission).await })
    }
}
