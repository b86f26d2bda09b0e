use quiz_funnel::{build_state, config::AppConfig, routes::build_router, state::spawn_session_sweeper};
use sqlx::mysql::MySqlPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = AppConfig::from_env();
    let addr = config.bind_addr()?;

    if let Some(db_url) = config.database_url.as_deref() {
        match MySqlPoolOptions::new().max_connections(5).connect(db_url).await {
            Ok(pool) => match sqlx::migrate!("./migrations").run(&pool).await {
                Ok(_) => tracing::info!("mysql connected and migrations applied"),
                Err(err) => tracing::warn!("mysql connected but migrations failed: {}", err),
            },
            Err(err) => {
                tracing::warn!(
                    "mysql is unavailable ({}), quiz funnel continues in local in-memory mode",
                    err
                );
            }
        }
    }

    let state = build_state(config)?;
    spawn_session_sweeper(state.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("quiz funnel listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
