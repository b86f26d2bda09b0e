pub mod analytics;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hidden_fields;
pub mod models;
pub mod routes;
pub mod runner;
pub mod scoring;
pub mod session;
pub mod splitter;
pub mod state;
pub mod submission;
pub mod tracking;

use std::sync::Arc;

pub fn build_state(config: config::AppConfig) -> anyhow::Result<state::AppState> {
    let schema_raw = include_str!("../contracts/quiz.schema.json");
    let schema: serde_json::Value = serde_json::from_str(schema_raw)?;
    Ok(state::AppState::new(
        config,
        schema,
        Arc::new(splitter::ThreadRandom),
        Arc::new(state::LoggingIntegrationSync),
    ))
}
