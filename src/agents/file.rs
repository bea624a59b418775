use super::{Agent, AgentRegistry, AgentSummary, KnowledgeLoader};
use crate::core::error::EspejoError;
use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct AgentsFile {
    #[serde(default)]
    agents: Vec<Agent>,
}

/// Agents read from a YAML file, or the built-in persona when there is none.
pub struct FileAgentRegistry {
    agents: Vec<Agent>,
    knowledge: Option<KnowledgeLoader>,
}

impl FileAgentRegistry {
    pub fn new(agents: Vec<Agent>, knowledge: Option<KnowledgeLoader>) -> Self {
        let agents = if agents.is_empty() {
            vec![Agent::builtin()]
        } else {
            agents
        };
        Self { agents, knowledge }
    }

    pub fn builtin() -> Self {
        Self::new(Vec::new(), None)
    }

    /// A missing file yields the built-in persona; a malformed one is an error.
    pub fn load(path: &Path, knowledge: Option<KnowledgeLoader>) -> Result<Self, EspejoError> {
        if !path.exists() {
            debug!("No agents file at {}, using built-in agent", path.display());
            return Ok(Self::new(Vec::new(), knowledge));
        }
        let content = fs::read_to_string(path)?;
        let file: AgentsFile = serde_yml::from_str(&content).map_err(|e| {
            EspejoError::Config(format!("Invalid agents file {}: {}", path.display(), e))
        })?;
        info!("Loaded {} agents from {}", file.agents.len(), path.display());
        Ok(Self::new(file.agents, knowledge))
    }
}

#[async_trait]
impl AgentRegistry for FileAgentRegistry {
    async fn list_agents(&self) -> Result<Vec<AgentSummary>, EspejoError> {
        Ok(self.agents.iter().map(Agent::summary).collect())
    }

    async fn get_agent(&self, id: &str) -> Result<Agent, EspejoError> {
        let agent = self
            .agents
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| EspejoError::NotFound(format!("agent {}", id)))?;
        Ok(match &self.knowledge {
            Some(loader) => loader.attach(agent).await,
            None => agent,
        })
    }
}
