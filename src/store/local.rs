use super::{Conversation, ConversationStore, ConversationSummary};
use crate::core::error::EspejoError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

/// One pretty-printed JSON file per conversation.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, EspejoError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(EspejoError::Input(format!("Invalid conversation id: {}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl ConversationStore for LocalStore {
    async fn save(&self, conversation: &Conversation) -> Result<(), EspejoError> {
        let path = self.path_for(&conversation.id)?;
        fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(conversation)?;
        fs::write(&path, json).await?;
        debug!(id = %conversation.id, "Saved conversation locally");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Conversation, EspejoError> {
        let path = self.path_for(id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(EspejoError::NotFound(format!("conversation {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<ConversationSummary>, EspejoError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let conversation: Conversation = match fs::read(&path)
                .await
                .map_err(EspejoError::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(EspejoError::from))
            {
                Ok(conversation) => conversation,
                Err(e) => {
                    warn!("Skipping unreadable history file {}: {}", path.display(), e);
                    continue;
                }
            };
            if owner_id.is_some() && conversation.owner_id.as_deref() != owner_id {
                continue;
            }
            summaries.push(conversation.summary());
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<(), EspejoError> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
