use crate::analytics::{self, FunnelStep, GlobalStats, QuizStats};
use crate::error::{AppError, ErrorDetail};
use crate::hidden_fields::CaptureContext;
use crate::models::{
    validate_ab_test, validate_quiz, AbTest, AbTestStatus, Integration, IntegrationKind, Lead,
    Question, Quiz, QuizSettings, ResponseRecord, ThankYouPage, ValidationIssue, Variant,
};
use crate::runner::QuizRunner;
use crate::scoring::ScoreBucket;
use crate::session::SessionView;
use crate::splitter::{self, AssignError};
use crate::state::{AppState, HostedSession, StoreError};
use crate::submission::{ResponseSubmission, SubmitResult};
use crate::tracking::TrackingEvent;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Redirect;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn header_text(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

fn default_true() -> bool {
    true
}

fn store_error(err: StoreError, req_id: String) -> AppError {
    match err {
        StoreError::SlugTaken(_) => AppError::new(StatusCode::CONFLICT, "SLUG_TAKEN", err.to_string(), req_id),
        StoreError::UnknownQuiz(_) => AppError::not_found("quiz", req_id),
    }
}

// ---- quizzes ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveQuizPayload {
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub design: Option<Value>,
    #[serde(default)]
    pub settings: QuizSettings,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub thank_you_pages: Vec<ThankYouPage>,
}

fn decode_quiz_payload(state: &AppState, raw: Value, req_id: &str) -> Result<SaveQuizPayload, AppError> {
    let compiled = jsonschema::draft202012::new(&state.quiz_schema).map_err(|_| {
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "schema build failed", req_id)
    })?;
    if compiled.validate(&raw).is_err() {
        let details = compiled
            .iter_errors(&raw)
            .map(|e| ErrorDetail {
                field: e.instance_path.to_string(),
                issue: e.to_string(),
            })
            .collect();
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "quiz payload does not match schema",
            req_id,
        )
        .with_details(details));
    }
    serde_json::from_value(raw).map_err(|e| {
        AppError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", format!("cannot decode quiz: {}", e), req_id)
    })
}

/// Questions and pages are replaced wholesale; question order follows the
/// payload order.
fn quiz_from_payload(id: Uuid, created_at: DateTime<Utc>, payload: SaveQuizPayload) -> Quiz {
    let questions = payload
        .questions
        .into_iter()
        .enumerate()
        .map(|(i, mut q)| {
            q.quiz_id = Some(id);
            q.order = i as u32;
            q
        })
        .collect();
    let thank_you_pages = payload
        .thank_you_pages
        .into_iter()
        .map(|mut p| {
            p.quiz_id = Some(id);
            p
        })
        .collect();
    Quiz {
        id,
        title: payload.title,
        slug: payload.slug,
        description: payload.description,
        design: payload.design,
        settings: payload.settings,
        is_active: payload.is_active,
        questions,
        thank_you_pages,
        created_at,
        updated_at: Utc::now(),
    }
}

async fn validate_and_save_quiz(state: &AppState, quiz: Quiz, req_id: &str) -> Result<Quiz, AppError> {
    if let Err(issues) = validate_quiz(&quiz) {
        return Err(AppError::validation("quiz validation failed", issues, req_id));
    }
    state
        .save_quiz(quiz.clone())
        .await
        .map_err(|e| store_error(e, req_id.to_string()))?;
    Ok(quiz)
}

pub async fn create_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(raw): Json<Value>,
) -> Result<(StatusCode, Json<Quiz>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let payload = decode_quiz_payload(&state, raw, &req_id)?;
    let quiz = quiz_from_payload(Uuid::new_v4(), Utc::now(), payload);
    let quiz = validate_and_save_quiz(&state, quiz, &req_id).await?;
    info!("created quiz {} ({})", quiz.id, quiz.slug);
    Ok((StatusCode::CREATED, Json(quiz)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummary {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub is_active: bool,
    pub question_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> ListResponse<T> {
    fn new(items: Vec<T>) -> Self {
        Self { total: items.len(), items }
    }
}

pub async fn list_quizzes(State(state): State<AppState>) -> Json<ListResponse<QuizSummary>> {
    let quizzes = state.db.quizzes.read().await;
    let mut items: Vec<QuizSummary> = quizzes
        .values()
        .map(|q| QuizSummary {
            id: q.id,
            title: q.title.clone(),
            slug: q.slug.clone(),
            is_active: q.is_active,
            question_count: q.questions.len(),
            created_at: q.created_at,
        })
        .collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(ListResponse::new(items))
}

pub async fn get_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Quiz>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let quiz = state.quiz(id).await.ok_or_else(|| AppError::not_found("quiz", req_id))?;
    Ok(Json(quiz))
}

pub async fn update_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(raw): Json<Value>,
) -> Result<Json<Quiz>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let existing = state
        .quiz(id)
        .await
        .ok_or_else(|| AppError::not_found("quiz", req_id.clone()))?;
    let payload = decode_quiz_payload(&state, raw, &req_id)?;
    let quiz = quiz_from_payload(id, existing.created_at, payload);
    let quiz = validate_and_save_quiz(&state, quiz, &req_id).await?;
    info!("updated quiz {}", quiz.id);
    Ok(Json(quiz))
}

pub async fn delete_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    if !state.delete_quiz(id).await {
        return Err(AppError::not_found("quiz", req_id));
    }
    info!("deleted quiz {}", id);
    Ok(StatusCode::NO_CONTENT)
}

// ---- a/b tests ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantPayload {
    pub quiz_id: Uuid,
    pub traffic_percentage: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAbTestPayload {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub status: AbTestStatus,
    #[serde(default)]
    pub variants: Vec<VariantPayload>,
}

async fn validate_and_save_ab_test(state: &AppState, test: AbTest, req_id: &str) -> Result<AbTest, AppError> {
    let mut issues = validate_ab_test(&test).err().unwrap_or_default();
    {
        let quizzes = state.db.quizzes.read().await;
        for (i, v) in test.variants.iter().enumerate() {
            if !quizzes.contains_key(&v.quiz_id) {
                issues.push(ValidationIssue::new(format!("variants[{i}].quizId"), "unknown quiz"));
            }
        }
    }
    if !issues.is_empty() {
        return Err(AppError::validation("a/b test validation failed", issues, req_id));
    }
    state
        .save_ab_test(test.clone())
        .await
        .map_err(|e| store_error(e, req_id.to_string()))?;
    Ok(test)
}

fn ab_test_from_payload(id: Uuid, created_at: DateTime<Utc>, payload: SaveAbTestPayload) -> AbTest {
    AbTest {
        id,
        name: payload.name,
        slug: payload.slug,
        status: payload.status,
        variants: payload
            .variants
            .into_iter()
            .map(|v| Variant {
                id: Uuid::new_v4(),
                test_id: id,
                quiz_id: v.quiz_id,
                traffic_percentage: v.traffic_percentage,
            })
            .collect(),
        created_at,
        updated_at: Utc::now(),
    }
}

pub async fn create_ab_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SaveAbTestPayload>,
) -> Result<(StatusCode, Json<AbTest>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let test = ab_test_from_payload(Uuid::new_v4(), Utc::now(), payload);
    let test = validate_and_save_ab_test(&state, test, &req_id).await?;
    info!("created a/b test {} ({})", test.id, test.slug);
    Ok((StatusCode::CREATED, Json(test)))
}

pub async fn list_ab_tests(State(state): State<AppState>) -> Json<ListResponse<AbTest>> {
    let mut items: Vec<AbTest> = state.db.ab_tests.read().await.values().cloned().collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(ListResponse::new(items))
}

pub async fn get_ab_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<AbTest>, AppError> {
    let req_id = request_id_from_headers(&headers);
    state
        .db
        .ab_tests
        .read()
        .await
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::not_found("a/b test", req_id))
}

pub async fn update_ab_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SaveAbTestPayload>,
) -> Result<Json<AbTest>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let created_at = state
        .db
        .ab_tests
        .read()
        .await
        .get(&id)
        .map(|t| t.created_at)
        .ok_or_else(|| AppError::not_found("a/b test", req_id.clone()))?;
    let test = ab_test_from_payload(id, created_at, payload);
    let test = validate_and_save_ab_test(&state, test, &req_id).await?;
    info!("updated a/b test {} status={:?}", test.id, test.status);
    Ok(Json(test))
}

pub async fn delete_ab_test(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    if !state.delete_ab_test(id).await {
        return Err(AppError::not_found("a/b test", req_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn ab_redirect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Redirect, AppError> {
    let req_id = request_id_from_headers(&headers);
    let test = state
        .db
        .ab_tests
        .read()
        .await
        .values()
        .find(|t| t.slug == slug)
        .cloned()
        .ok_or_else(|| AppError::not_found("a/b test", req_id.clone()))?;
    let variant = splitter::assign(&test, state.random.as_ref()).map_err(|err| {
        if err == AssignError::NoVariants {
            warn!("active a/b test {} has no variants", test.slug);
        }
        AppError::not_found("a/b test", req_id.clone())
    })?;
    let quiz = state
        .quiz(variant.quiz_id)
        .await
        .ok_or_else(|| AppError::not_found("quiz", req_id.clone()))?;
    info!("a/b test {} assigned variant {}", test.slug, variant.id);
    Ok(Redirect::temporary(&splitter::redirect_url(&quiz.slug, &test.slug, variant.id)))
}

// ---- integrations ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveIntegrationPayload {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: IntegrationKind,
    #[serde(default)]
    pub config: Value,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

pub async fn list_integrations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(quiz_id): Path<Uuid>,
) -> Result<Json<ListResponse<Integration>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    if state.quiz(quiz_id).await.is_none() {
        return Err(AppError::not_found("quiz", req_id));
    }
    let items: Vec<Integration> = state
        .db
        .integrations
        .read()
        .await
        .values()
        .filter(|i| i.quiz_id == quiz_id)
        .cloned()
        .collect();
    Ok(Json(ListResponse::new(items)))
}

pub async fn save_integration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(quiz_id): Path<Uuid>,
    Json(payload): Json<SaveIntegrationPayload>,
) -> Result<Json<Integration>, AppError> {
    let req_id = request_id_from_headers(&headers);
    if state.quiz(quiz_id).await.is_none() {
        return Err(AppError::not_found("quiz", req_id));
    }
    let existing = match payload.id {
        Some(id) => state
            .db
            .integrations
            .read()
            .await
            .get(&id)
            .filter(|i| i.quiz_id == quiz_id)
            .cloned(),
        None => None,
    };
    let integration = Integration {
        id: existing.as_ref().map(|i| i.id).unwrap_or_else(Uuid::new_v4),
        quiz_id,
        kind: payload.kind,
        config: payload.config,
        is_active: payload.is_active,
        created_at: existing.map(|i| i.created_at).unwrap_or_else(Utc::now),
    };
    state.save_integration(integration.clone()).await;
    info!("saved {:?} integration {} for quiz {}", integration.kind, integration.id, quiz_id);
    Ok(Json(integration))
}

pub async fn delete_integration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((quiz_id, integration_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    if !state.delete_integration(quiz_id, integration_id).await {
        return Err(AppError::not_found("integration", req_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---- analytics ----

pub async fn global_stats(State(state): State<AppState>) -> Json<GlobalStats> {
    let total_leads = state.db.leads.read().await.len();
    let total_quizzes = state.db.quizzes.read().await.len();
    let responses = state.db.responses.read().await;
    Json(analytics::global_stats(&responses, total_leads, total_quizzes))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRow {
    #[serde(flatten)]
    pub lead: Lead,
    pub quiz_title: Option<String>,
}

pub async fn list_leads(State(state): State<AppState>) -> Json<ListResponse<LeadRow>> {
    let quizzes = state.db.quizzes.read().await;
    let mut items: Vec<LeadRow> = state
        .db
        .leads
        .read()
        .await
        .values()
        .map(|l| LeadRow {
            lead: l.clone(),
            quiz_title: quizzes.get(&l.quiz_id).map(|q| q.title.clone()),
        })
        .collect();
    items.sort_by(|a, b| b.lead.created_at.cmp(&a.lead.created_at));
    Json(ListResponse::new(items))
}

async fn ensure_quiz(state: &AppState, id: Uuid, headers: &HeaderMap) -> Result<(), AppError> {
    if state.db.quizzes.read().await.contains_key(&id) {
        Ok(())
    } else {
        Err(AppError::not_found("quiz", request_id_from_headers(headers)))
    }
}

pub async fn quiz_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<QuizStats>, AppError> {
    ensure_quiz(&state, id, &headers).await?;
    let responses = state.db.responses.read().await;
    Ok(Json(analytics::quiz_stats(&responses, id)))
}

pub async fn quiz_funnel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<FunnelStep>>, AppError> {
    ensure_quiz(&state, id, &headers).await?;
    let interactions: Vec<_> = state
        .db
        .interactions
        .iter()
        .filter(|e| e.quiz_id == id)
        .map(|e| e.value().clone())
        .collect();
    Ok(Json(analytics::funnel(&interactions, id)))
}

pub async fn quiz_score_distribution(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ScoreBucket>>, AppError> {
    ensure_quiz(&state, id, &headers).await?;
    let leads = state.db.leads.read().await;
    Ok(Json(analytics::lead_score_distribution(leads.values(), id)))
}

pub async fn quiz_leads(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ListResponse<Lead>>, AppError> {
    ensure_quiz(&state, id, &headers).await?;
    let mut items: Vec<Lead> = state
        .db
        .leads
        .read()
        .await
        .values()
        .filter(|l| l.quiz_id == id)
        .cloned()
        .collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(ListResponse::new(items)))
}

pub async fn quiz_responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ListResponse<ResponseRecord>>, AppError> {
    ensure_quiz(&state, id, &headers).await?;
    let items: Vec<ResponseRecord> = state
        .db
        .responses
        .read()
        .await
        .iter()
        .rev()
        .filter(|r| r.quiz_id == id)
        .cloned()
        .collect();
    Ok(Json(ListResponse::new(items)))
}

// ---- public ----

async fn active_quiz_by_slug(state: &AppState, slug: &str, req_id: &str) -> Result<Quiz, AppError> {
    state
        .quiz_by_slug(slug)
        .await
        .filter(|q| q.is_active)
        .ok_or_else(|| AppError::not_found("quiz", req_id))
}

pub async fn public_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Quiz>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let mut quiz = active_quiz_by_slug(&state, &slug, &req_id).await?;
    quiz.questions = quiz.runnable_questions();
    Ok(Json(quiz))
}

pub async fn submit_response(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(submission): Json<ResponseSubmission>,
) -> Result<(StatusCode, Json<SubmitResult>), AppError> {
    let req_id = request_id_from_headers(&headers);
    ensure_quiz(&state, submission.quiz_id, &headers).await?;
    match state.submit_response(submission).await {
        Ok(receipt) => Ok((StatusCode::OK, Json(SubmitResult::ok(receipt)))),
        Err(err) => {
            warn!("failed to submit response (request {}): {}", req_id, err);
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmitResult::failed("Failed to submit response")),
            ))
        }
    }
}

pub async fn track_interaction(
    State(state): State<AppState>,
    Json(event): Json<TrackingEvent>,
) -> StatusCode {
    let event = event.without_lead_reference();
    let pending = state.sink.track(&event);
    tokio::spawn(async move {
        if let Err(err) = pending.await {
            warn!("failed to track {:?} event: {}", event.kind, err);
        }
    });
    StatusCode::ACCEPTED
}

// ---- hosted sessions ----

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionPayload {
    #[serde(default)]
    pub url: Option<String>,
}

pub async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(payload): Json<StartSessionPayload>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let quiz = active_quiz_by_slug(&state, &slug, &req_id).await?;
    let referrer = header_text(&headers, header::REFERER);
    let capture = CaptureContext {
        url: payload.url.or_else(|| referrer.clone()),
        referrer,
        user_agent: header_text(&headers, header::USER_AGENT),
        cookies: header_text(&headers, header::COOKIE),
    };
    let runner = QuizRunner::start(
        Arc::new(quiz),
        state.config.transition_delay,
        state.sink.clone(),
        Arc::new(state.clone()),
    )
    .map_err(|e| AppError::from_engine(e, req_id.clone()))?;
    let view = runner.view();
    state
        .db
        .sessions
        .insert(view.session_id, Arc::new(Mutex::new(HostedSession { runner, capture })));
    info!("opened session {} for quiz {}", view.session_id, slug);
    Ok((StatusCode::CREATED, Json(view)))
}

fn hosted_session(state: &AppState, id: Uuid, req_id: &str) -> Result<Arc<Mutex<HostedSession>>, AppError> {
    state
        .db
        .sessions
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::not_found("session", req_id))
}

pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let session = hosted_session(&state, id, &req_id)?;
    let hosted = session.lock().await;
    Ok(Json(hosted.runner.view()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectPayload {
    pub question_id: String,
    pub value: String,
}

/// Names the question an action was taken on, so a repeated click cannot
/// land on the question that replaced it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    pub question_id: String,
}

pub async fn session_select(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SelectPayload>,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let session = hosted_session(&state, id, &req_id)?;
    let mut hosted = session.lock().await;
    hosted
        .runner
        .select_option(&payload.question_id, &payload.value)
        .await
        .map_err(|e| AppError::from_engine(e, req_id))?;
    Ok(Json(hosted.runner.view()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionPayload {
    pub question_id: String,
    #[serde(default)]
    pub selected: Vec<String>,
}

pub async fn session_selection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SelectionPayload>,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let session = hosted_session(&state, id, &req_id)?;
    let mut hosted = session.lock().await;
    hosted
        .runner
        .selection_change(&payload.question_id, payload.selected)
        .map_err(|e| AppError::from_engine(e, req_id))?;
    Ok(Json(hosted.runner.view()))
}

#[derive(Debug, Deserialize)]
pub struct TextPayload {
    pub text: String,
}

pub async fn session_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<TextPayload>,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let session = hosted_session(&state, id, &req_id)?;
    let mut hosted = session.lock().await;
    hosted
        .runner
        .set_text(&payload.text)
        .map_err(|e| AppError::from_engine(e, req_id))?;
    Ok(Json(hosted.runner.view()))
}

pub async fn session_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<QuestionPayload>,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let session = hosted_session(&state, id, &req_id)?;
    let mut hosted = session.lock().await;
    hosted
        .runner
        .submit(&payload.question_id)
        .await
        .map_err(|e| AppError::from_engine(e, req_id))?;
    Ok(Json(hosted.runner.view()))
}

pub async fn session_skip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<QuestionPayload>,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let session = hosted_session(&state, id, &req_id)?;
    let mut hosted = session.lock().await;
    hosted
        .runner
        .skip(&payload.question_id)
        .await
        .map_err(|e| AppError::from_engine(e, req_id))?;
    Ok(Json(hosted.runner.view()))
}

pub async fn session_back(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<QuestionPayload>,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let session = hosted_session(&state, id, &req_id)?;
    let mut hosted = session.lock().await;
    hosted
        .runner
        .go_back(&payload.question_id)
        .map_err(|e| AppError::from_engine(e, req_id))?;
    Ok(Json(hosted.runner.view()))
}

#[derive(Debug, Deserialize)]
pub struct LeadPayload {
    #[serde(default)]
    pub form: Map<String, Value>,
}

pub async fn session_lead(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<LeadPayload>,
) -> Result<Json<SessionView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let session = hosted_session(&state, id, &req_id)?;
    let mut hosted = session.lock().await;
    let HostedSession { runner, capture } = &mut *hosted;
    runner
        .complete_lead_capture(&payload.form, capture)
        .await
        .map_err(|e| AppError::from_engine(e, req_id))?;
    let view = runner.view();
    drop(hosted);
    state.db.sessions.remove(&id);
    Ok(Json(view))
}
