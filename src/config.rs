use std::time::Duration;

use anyhow::Context;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_RUNTIME_MODEL: &str = "llama3.2";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Process configuration, read from the environment (and `.env`, if present).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub ollama_base_url: String,
    pub runtime_model: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env if present (development convenience)
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set (copy .env.example to .env)")?;

        Ok(Self::from_lookup(database_url, |key| std::env::var(key).ok()))
    }

    fn from_lookup(database_url: String, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let connect_secs = lookup("SESSION_CONNECT_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);

        Self {
            database_url,
            ollama_base_url: lookup("OLLAMA_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            runtime_model: lookup("AGENT_RUNTIME_MODEL")
                .unwrap_or_else(|| DEFAULT_RUNTIME_MODEL.to_string()),
            port: lookup("PORT").and_then(|p| p.parse().ok()).unwrap_or(DEFAULT_PORT),
            connect_timeout: Duration::from_secs(connect_secs),
        }
    }
}
