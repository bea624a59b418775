//! Conversation persistence.
//!
//! Conversations are append-only logs of [`Message`]s. They are kept on
//! local disk and, when configured, mirrored to a Supabase table.

use crate::core::error::EspejoError;
use crate::providers::{Message, Role};
use crate::utils::text::truncate_chars;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod local;
pub mod supabase;
pub mod tiered;

pub use local::LocalStore;
pub use supabase::{SupabaseClient, SupabaseStore};
pub use tiered::TieredStore;

/// Text prefix recorded for user turns that carried an image.
pub const IMAGE_MARKER: &str = "[Image attached]";
const TITLE_CHARS: usize = 35;
const DEFAULT_TITLE: &str = "Reflection";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(owner_id: Option<String>, agent_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id,
            agent_id,
            title: String::new(),
            messages: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Appends a turn; the first user turn fixes the title.
    pub fn push(&mut self, message: Message) {
        if self.title.is_empty() && message.role == Role::User {
            self.title = derive_title(&message.text());
        }
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.display_title().to_string(),
            updated_at: self.updated_at,
        }
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            DEFAULT_TITLE
        } else {
            &self.title
        }
    }
}

pub fn derive_title(first_user_text: &str) -> String {
    let text = first_user_text.replace(IMAGE_MARKER, "📷");
    let text = text.trim();
    if text.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    format!("{}...", truncate_chars(text, TITLE_CHARS))
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Inserts or replaces the whole record.
    async fn save(&self, conversation: &Conversation) -> Result<(), EspejoError>;

    async fn load(&self, id: &str) -> Result<Conversation, EspejoError>;

    /// Summaries ordered by most recent update first.
    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<ConversationSummary>, EspejoError>;

    async fn delete(&self, id: &str) -> Result<(), EspejoError>;

    async fn append(&self, id: &str, message: &Message) -> Result<(), EspejoError> {
        let mut conversation = self.load(id).await?;
        conversation.push(message.clone());
        self.save(&conversation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{InlineData, Part};

    #[test]
    fn title_comes_from_first_user_turn_only() {
        let mut conversation = Conversation::new(None, None);
        conversation.push(Message::model("I am Espejo. What would you like to reflect on today?"));
        assert_eq!(conversation.display_title(), "Reflection");

        conversation.push(Message::user("Why do I keep postponing everything important to me?"));
        conversation.push(Message::user("second question"));

        assert_eq!(conversation.title, "Why do I keep postponing everything...");
    }

    #[test]
    fn image_marker_becomes_camera_in_title() {
        assert_eq!(derive_title("[Image attached] my garden"), "📷 my garden...");
        assert_eq!(derive_title("   "), "Reflection");
    }

    #[test]
    fn persisted_record_round_trips_losslessly() {
        let mut conversation = Conversation::new(Some("owner-1".into()), Some("agent-7".into()));
        conversation.push(Message::user("Primera línea\nsegunda línea \u{1F600}"));
        conversation.push(
            Message::new(
                Role::User,
                vec![
                    Part::image(InlineData::new("image/png", "iVBORw0KGgo=")),
                    Part::text("[Image attached] ¿qué ves?"),
                ],
            )
            .unwrap(),
        );
        conversation.push(Message::model("Veo un jardín."));

        let json = serde_json::to_string(&conversation).unwrap();
        let restored: Conversation = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, conversation);
        assert_eq!(restored.messages, conversation.messages);
    }

    #[test]
    fn record_uses_camel_case_and_iso_timestamps() {
        let conversation = Conversation::new(Some("me".into()), None);
        let json = serde_json::to_value(&conversation).unwrap();

        assert_eq!(json["ownerId"], "me");
        assert!(json.get("agentId").is_none());
        let stamp = json["updatedAt"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
    }
}
