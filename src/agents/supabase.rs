use super::{Agent, AgentRegistry, AgentSummary, KnowledgeLoader};
use crate::config::SupabaseConfig;
use crate::core::error::EspejoError;
use crate::store::SupabaseClient;
use async_trait::async_trait;

/// Agents stored in a Supabase table, newest first.
pub struct SupabaseAgentRegistry {
    client: SupabaseClient,
    table: String,
    knowledge: Option<KnowledgeLoader>,
}

impl SupabaseAgentRegistry {
    pub fn new(
        client: SupabaseClient,
        table: impl Into<String>,
        knowledge: Option<KnowledgeLoader>,
    ) -> Self {
        Self {
            client,
            table: table.into(),
            knowledge,
        }
    }

    pub fn from_config(
        config: &SupabaseConfig,
        knowledge: Option<KnowledgeLoader>,
    ) -> Result<Self, EspejoError> {
        Ok(Self::new(
            SupabaseClient::new(config)?,
            config.agents_table.clone(),
            knowledge,
        ))
    }
}

#[async_trait]
impl AgentRegistry for SupabaseAgentRegistry {
    async fn list_agents(&self) -> Result<Vec<AgentSummary>, EspejoError> {
        let agents: Vec<Agent> = self
            .client
            .select(&self.table, &[("select", "*"), ("order", "created_at.desc")])
            .await?;
        if agents.is_empty() {
            return Ok(vec![Agent::builtin().summary()]);
        }
        Ok(agents.iter().map(Agent::summary).collect())
    }

    async fn get_agent(&self, id: &str) -> Result<Agent, EspejoError> {
        if id == super::DEFAULT_AGENT_ID {
            return Ok(Agent::builtin());
        }
        let filter = format!("eq.{}", id);
        let rows: Vec<Agent> = self
            .client
            .select(&self.table, &[("select", "*"), ("id", filter.as_str())])
            .await?;
        let agent = rows
            .into_iter()
            .next()
            .ok_or_else(|| EspejoError::NotFound(format!("agent {}", id)))?;
        Ok(match &self.knowledge {
            Some(loader) => loader.attach(agent).await,
            None => agent,
        })
    }
}
