use super::Agent;
use crate::core::error::EspejoError;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Fetches reference documents attached to agents.
///
/// Only plain-text formats are read; anything else is skipped.
#[derive(Clone)]
pub struct KnowledgeLoader {
    client: Client,
}

impl KnowledgeLoader {
    pub fn new(timeout: Duration) -> Result<Self, EspejoError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EspejoError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<Option<String>, EspejoError> {
        match extension(url).as_deref() {
            Some("txt") | Some("json") => {}
            other => {
                warn!(
                    "Skipping knowledge document with unsupported format {:?}: {}",
                    other, url
                );
                return Ok(None);
            }
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(EspejoError::Api(format!(
                "Knowledge document returned {}",
                response.status()
            )));
        }
        let text = response.text().await?;
        debug!(bytes = text.len(), "Loaded knowledge document");
        Ok(Some(text))
    }

    /// Fills `knowledge_text` from `knowledge_url` when it is not already set.
    /// Failures leave the agent usable without its document.
    pub async fn attach(&self, mut agent: Agent) -> Agent {
        if agent.knowledge_text.is_some() {
            return agent;
        }
        if let Some(url) = agent.knowledge_url.clone() {
            match self.fetch(&url).await {
                Ok(text) => agent.knowledge_text = text,
                Err(e) => warn!(agent = %agent.id, "Could not load knowledge document: {}", e),
            }
        }
        agent
    }
}

/// Lowercased extension of the URL path, ignoring query and fragment.
fn extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_ignores_query_strings() {
        assert_eq!(extension("https://cdn/x/Notes.TXT?token=1").as_deref(), Some("txt"));
        assert_eq!(extension("https://cdn/x/data.json#frag").as_deref(), Some("json"));
        assert_eq!(extension("https://cdn/x/book.pdf").as_deref(), Some("pdf"));
        assert_eq!(extension("https://cdn/x/noext"), None);
    }

    #[tokio::test]
    async fn unsupported_formats_are_skipped_without_network() {
        let loader = KnowledgeLoader::new(Duration::from_secs(1)).unwrap();
        let text = loader.fetch("http://127.0.0.1:9/manual.docx").await.unwrap();
        assert!(text.is_none());
    }

    #[tokio::test]
    async fn attach_keeps_existing_text() {
        let loader = KnowledgeLoader::new(Duration::from_secs(1)).unwrap();
        let mut agent = Agent::builtin();
        agent.knowledge_text = Some("inline".to_string());
        agent.knowledge_url = Some("http://127.0.0.1:9/other.txt".to_string());

        let agent = loader.attach(agent).await;
        assert_eq!(agent.knowledge_text.as_deref(), Some("inline"));
    }
}
