mod agent;
mod avatar;
mod config;
mod db;
mod errors;
mod models;
mod routes;
mod service;
mod session;

use axum::routing::{get, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::OllamaAgentService;
use crate::config::AppConfig;
use crate::db::agent_repository::AgentRepository;
use crate::routes::api_routes::{
    create_agent_handler, generate_description_handler, get_agent_handler, list_agents_handler,
    update_agent_handler,
};
use crate::routes::ws_routes::ws_session_handler;
use crate::routes::AppState;
use crate::service::agent_service::AgentService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_studio=debug,tower_http=debug".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    // ── Database ──────────────────────────────────────────────────────────────
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Database connection established and migrations applied");

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let agent = OllamaAgentService::new(&config.ollama_base_url, &config.runtime_model)?;
    let agents = AgentService::new(AgentRepository::new(pool), agent);
    let state = AppState { agents, connect_timeout: config.connect_timeout };

    // ── Router ────────────────────────────────────────────────────────────────
    let app = Router::new()
        .route("/api/agents", get(list_agents_handler).post(create_agent_handler))
        .route("/api/agents/generate-description", post(generate_description_handler))
        .route("/api/agents/{id}", get(get_agent_handler).put(update_agent_handler))
        .route("/ws/agents/session", get(ws_session_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/ (runtime model: {})", config.runtime_model);

    axum::serve(listener, app).await?;
    Ok(())
}
