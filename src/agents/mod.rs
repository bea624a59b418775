//! Personas the user can talk to.

use crate::core::error::EspejoError;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

pub mod file;
pub mod knowledge;
pub mod supabase;

pub use file::FileAgentRegistry;
pub use knowledge::KnowledgeLoader;
pub use supabase::SupabaseAgentRegistry;

pub const DEFAULT_AGENT_ID: &str = "espejo-digital";
const DEFAULT_DESCRIPTION: &str = "Consciousness";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(alias = "nombre")]
    pub name: String,
    #[serde(default, alias = "descripcion")]
    pub description: Option<String>,
    #[serde(default, alias = "instrucciones", deserialize_with = "nullable_string")]
    pub system_instructions: String,
    #[serde(default, alias = "conocimiento_texto", skip_serializing_if = "Option::is_none")]
    pub knowledge_text: Option<String>,
    #[serde(default, alias = "archivo_url", skip_serializing_if = "Option::is_none")]
    pub knowledge_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl Agent {
    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description().to_string(),
        }
    }

    pub fn description(&self) -> &str {
        self.description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(DEFAULT_DESCRIPTION)
    }

    /// Instructions followed by the reference document, sent verbatim as
    /// the system instruction.
    pub fn instruction_blob(&self) -> String {
        match self.knowledge_text.as_deref().map(str::trim) {
            Some(knowledge) if !knowledge.is_empty() => format!(
                "{}\n\nADDITIONAL CONTEXT:\n{}",
                self.system_instructions, knowledge
            ),
            _ => self.system_instructions.clone(),
        }
    }

    pub fn greeting(&self) -> String {
        format!("I am {}. What would you like to reflect on today?", self.name)
    }

    /// The persona used when no registry provides any.
    pub fn builtin() -> Self {
        Self {
            id: DEFAULT_AGENT_ID.to_string(),
            name: "Espejo Digital".to_string(),
            description: Some("A warm, reflective mirror".to_string()),
            system_instructions: "You are \"El Espejo Digital\", a wise Uruguayan versed in law, \
psychology and philosophy. Speak warmly, humanly and directly, in Rioplatense Spanish. \
Keep the thread of the conversation: if the user already greeted you, do not greet again. \
Do not repeat yourself. End with a reflective question only when it helps to go deeper."
                .to_string(),
            knowledge_text: None,
            knowledge_url: None,
        }
    }
}

#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<AgentSummary>, EspejoError>;

    /// Full agent, with its reference document text loaded when available.
    async fn get_agent(&self, id: &str) -> Result<Agent, EspejoError>;
}

fn flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "agent id must be a string or number, got {}",
            other
        ))),
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
