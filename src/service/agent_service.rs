use async_trait::async_trait;
use tracing::info;

use crate::agent::OllamaAgentService;
use crate::db::agent_repository::AgentRepository;
use crate::errors::AppError;
use crate::models::{AgentConfig, AgentSummary};
use crate::session::{AgentPersistence, DescriptionGenerator};

const MAX_SEED_LENGTH: usize = 2000;

#[derive(Clone)]
pub struct AgentService {
    agent_repo: AgentRepository,
    agent: OllamaAgentService,
}

impl AgentService {
    pub fn new(agent_repo: AgentRepository, agent: OllamaAgentService) -> Self {
        Self { agent_repo, agent }
    }

    pub fn agent(&self) -> &OllamaAgentService {
        &self.agent
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentSummary>, AppError> {
        self.agent_repo.find_all().await
    }

    pub async fn get_agent(&self, id: &str) -> Result<AgentConfig, AppError> {
        self.agent_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::RecordNotFound {
                entity_type: "agent".to_string(),
                id: id.to_string(),
            })
    }
}

#[async_trait]
impl AgentPersistence for AgentService {
    async fn create_agent(&self, config: AgentConfig) -> Result<AgentConfig, AppError> {
        config.validate()?;
        let saved = self.agent_repo.create(&config).await?;
        info!("Created agent {:?} ({})", saved.id, saved.name);
        Ok(saved)
    }

    async fn update_agent(&self, id: &str, config: AgentConfig) -> Result<AgentConfig, AppError> {
        config.validate()?;
        let saved = self.agent_repo.update(id, &config).await?;
        info!("Updated agent {id} ({})", saved.name);
        Ok(saved)
    }
}

#[async_trait]
impl DescriptionGenerator for AgentService {
    async fn generate_description(&self, seed: &str) -> Result<String, AppError> {
        if seed.chars().count() > MAX_SEED_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "seed".to_string(),
                max_length: MAX_SEED_LENGTH,
                actual_length: seed.chars().count(),
            });
        }
        self.agent.generate_description(seed).await
    }
}
