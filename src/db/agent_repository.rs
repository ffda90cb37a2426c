use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::error;

use crate::errors::AppError;
use crate::models::{AgentConfig, AgentModel, AgentSummary, AgentType, ModelConfig, Variable};

const AGENT_COLUMNS: &str = "id, name, icon, description, agent_type, prompt, variables, \
                             model, max_tokens, temperature";

#[derive(Clone)]
pub struct AgentRepository {
    pool: PgPool,
}

impl AgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_all(&self) -> Result<Vec<AgentSummary>, AppError> {
        let rows = sqlx::query(
            "SELECT id, name, description, icon, updated_at FROM agents ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch agents: {e}");
            AppError::db_query("Failed to fetch agents", e)
        })?;

        rows.iter()
            .map(|row| {
                Ok(AgentSummary {
                    id: get(row, "id")?,
                    name: get(row, "name")?,
                    description: get(row, "description")?,
                    cover: get(row, "icon")?,
                    updated_at: get(row, "updated_at")?,
                })
            })
            .collect()
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<AgentConfig>, AppError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to find agent {id}: {e}");
                AppError::db_query(format!("Failed to find agent {id}"), e)
            })?;
        row.as_ref().map(agent_from_row).transpose()
    }

    /// Inserts `agent` under a freshly assigned id.
    pub async fn create(&self, agent: &AgentConfig) -> Result<AgentConfig, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(&format!(
            "INSERT INTO agents ({AGENT_COLUMNS}, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)"
        ))
        .bind(&id)
        .bind(agent.name.trim())
        .bind(&agent.icon)
        .bind(&agent.description)
        .bind(agent.agent_type.as_str())
        .bind(&agent.prompt)
        .bind(variables_json(agent)?)
        .bind(agent.model.as_str())
        .bind(agent.model_config.max_tokens as i32)
        .bind(agent.model_config.temperature)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create agent {id}: {e}");
            AppError::db_query("Failed to create agent", e)
        })?;

        Ok(AgentConfig { id: Some(id), name: agent.name.trim().to_string(), ..agent.clone() })
    }

    pub async fn update(&self, id: &str, agent: &AgentConfig) -> Result<AgentConfig, AppError> {
        let result = sqlx::query(
            "UPDATE agents
             SET name = $2, icon = $3, description = $4, agent_type = $5, prompt = $6,
                 variables = $7, model = $8, max_tokens = $9, temperature = $10, updated_at = $11
             WHERE id = $1",
        )
        .bind(id)
        .bind(agent.name.trim())
        .bind(&agent.icon)
        .bind(&agent.description)
        .bind(agent.agent_type.as_str())
        .bind(&agent.prompt)
        .bind(variables_json(agent)?)
        .bind(agent.model.as_str())
        .bind(agent.model_config.max_tokens as i32)
        .bind(agent.model_config.temperature)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update agent {id}: {e}");
            AppError::db_query(format!("Failed to update agent {id}"), e)
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::RecordNotFound {
                entity_type: "agent".to_string(),
                id: id.to_string(),
            });
        }
        Ok(AgentConfig {
            id: Some(id.to_string()),
            name: agent.name.trim().to_string(),
            ..agent.clone()
        })
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| AppError::db_query(format!("Failed to read {column}"), e))
}

fn variables_json(agent: &AgentConfig) -> Result<String, AppError> {
    serde_json::to_string(&agent.variables)
        .map_err(|e| AppError::Unexpected(format!("Failed to encode variables: {e}")))
}

fn agent_from_row(row: &PgRow) -> Result<AgentConfig, AppError> {
    let agent_type = AgentType::try_from(get::<String>(row, "agent_type")?)
        .map_err(AppError::Unexpected)?;
    let model = AgentModel::try_from(get::<String>(row, "model")?).map_err(AppError::Unexpected)?;
    let variables: Vec<Variable> = serde_json::from_str(&get::<String>(row, "variables")?)
        .map_err(|e| AppError::Unexpected(format!("Corrupt variables column: {e}")))?;
    let max_tokens: i32 = get(row, "max_tokens")?;

    Ok(AgentConfig {
        id: Some(get(row, "id")?),
        name: get(row, "name")?,
        icon: get(row, "icon")?,
        description: get(row, "description")?,
        agent_type,
        prompt: get(row, "prompt")?,
        variables: variables.into(),
        model,
        model_config: ModelConfig {
            max_tokens: max_tokens.max(0) as u32,
            temperature: get(row, "temperature")?,
        },
    })
}
