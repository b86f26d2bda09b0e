use crate::handlers;
use crate::state::AppState;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!("ignoring invalid cors origin {}: {}", o, err);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_credentials(true)
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::COOKIE,
            axum::http::HeaderName::from_static("x-request-id"),
        ])
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/quizzes", post(handlers::create_quiz).get(handlers::list_quizzes))
        .route(
            "/api/v1/quizzes/:id",
            get(handlers::get_quiz).put(handlers::update_quiz).delete(handlers::delete_quiz),
        )
        .route(
            "/api/v1/quizzes/:id/integrations",
            get(handlers::list_integrations).post(handlers::save_integration),
        )
        .route(
            "/api/v1/quizzes/:id/integrations/:integration_id",
            delete(handlers::delete_integration),
        )
        .route("/api/v1/quizzes/:id/stats", get(handlers::quiz_stats))
        .route("/api/v1/quizzes/:id/funnel", get(handlers::quiz_funnel))
        .route("/api/v1/quizzes/:id/score-distribution", get(handlers::quiz_score_distribution))
        .route("/api/v1/quizzes/:id/leads", get(handlers::quiz_leads))
        .route("/api/v1/quizzes/:id/responses", get(handlers::quiz_responses))
        .route("/api/v1/ab-tests", post(handlers::create_ab_test).get(handlers::list_ab_tests))
        .route(
            "/api/v1/ab-tests/:id",
            get(handlers::get_ab_test).put(handlers::update_ab_test).delete(handlers::delete_ab_test),
        )
        .route("/api/v1/stats", get(handlers::global_stats))
        .route("/api/v1/leads", get(handlers::list_leads))
        .route("/api/v1/public/quizzes/:slug", get(handlers::public_quiz))
        .route("/api/v1/public/quizzes/:slug/sessions", post(handlers::start_session))
        .route("/api/v1/responses", post(handlers::submit_response))
        .route("/api/v1/interactions", post(handlers::track_interaction))
        .route("/api/v1/sessions/:id", get(handlers::get_session))
        .route("/api/v1/sessions/:id/select", post(handlers::session_select))
        .route("/api/v1/sessions/:id/selection", post(handlers::session_selection))
        .route("/api/v1/sessions/:id/text", post(handlers::session_text))
        .route("/api/v1/sessions/:id/submit", post(handlers::session_submit))
        .route("/api/v1/sessions/:id/skip", post(handlers::session_skip))
        .route("/api/v1/sessions/:id/back", post(handlers::session_back))
        .route("/api/v1/sessions/:id/lead", post(handlers::session_lead))
        .route("/ab/:slug", get(handlers::ab_redirect))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
