//! One user's conversation with one agent.
//!
//! [`ChatSession`] sequences the work around a send: record the user turn,
//! persist it, dispatch, record the reply, persist again. Persistence is best
//! effort and never turns a successful completion into a failure.

use crate::agents::{Agent, AgentRegistry};
use crate::core::error::{DispatchError, EspejoError};
use crate::dispatch::{Dispatcher, InFlight};
use crate::providers::{InlineData, Message, Role};
use crate::store::{Conversation, ConversationStore, ConversationSummary, IMAGE_MARKER};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const FOGGED_MIRROR: &str = "The mirror is fogged up. Please try again.";
pub const MAX_IMAGE_BYTES: u64 = 4 * 1024 * 1024;

/// Everything that identifies the current exchange.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub owner_id: Option<String>,
    pub agent: Agent,
    pub conversation: Conversation,
    /// Whether the conversation already exists in the store.
    pub persisted: bool,
}

impl SessionContext {
    pub fn new(owner_id: Option<String>, agent: Agent) -> Self {
        let conversation = greeted_conversation(owner_id.clone(), &agent);
        Self {
            owner_id,
            agent,
            conversation,
            persisted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Model that answered; `None` when the reply is the failure notice.
    pub model_used: Option<String>,
}

impl Reply {
    fn failure() -> Self {
        Self {
            text: FOGGED_MIRROR.to_string(),
            model_used: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.model_used.is_none()
    }
}

pub struct ChatSession {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn ConversationStore>,
    agents: Arc<dyn AgentRegistry>,
    inflight: InFlight,
    context: SessionContext,
}

impl ChatSession {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn ConversationStore>,
        agents: Arc<dyn AgentRegistry>,
        context: SessionContext,
    ) -> Self {
        Self {
            dispatcher,
            store,
            agents,
            inflight: InFlight::new(),
            context,
        }
    }

    /// Opens a session with `agent_id`, or with the first listed agent.
    pub async fn start(
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn ConversationStore>,
        agents: Arc<dyn AgentRegistry>,
        owner_id: Option<String>,
        agent_id: Option<&str>,
    ) -> Result<Self, EspejoError> {
        let agent = match agent_id {
            Some(id) => agents.get_agent(id).await?,
            None => first_agent(agents.as_ref()).await,
        };
        info!(agent = %agent.id, "Starting chat session");
        let context = SessionContext::new(owner_id, agent);
        Ok(Self::new(dispatcher, store, agents, context))
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn agent(&self) -> &Agent {
        &self.context.agent
    }

    pub fn conversation(&self) -> &Conversation {
        &self.context.conversation
    }

    pub fn agents(&self) -> Arc<dyn AgentRegistry> {
        self.agents.clone()
    }

    /// Handle for abandoning requests from another task.
    pub fn inflight(&self) -> InFlight {
        self.inflight.clone()
    }

    /// Sends a user turn. Returns `None` for blank input and for results that
    /// arrived after their request was superseded or cancelled.
    pub async fn send(&mut self, text: &str, image: Option<InlineData>) -> Option<Reply> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return None;
        }

        // Greetings are local; the model sees the exchange from the first user turn.
        let mut outgoing: Vec<Message> = self
            .context
            .conversation
            .messages
            .iter()
            .skip_while(|m| m.role == Role::Model)
            .cloned()
            .collect();
        if !text.is_empty() {
            outgoing.push(Message::user(text));
        }

        let recorded = match (&image, text.is_empty()) {
            (Some(_), true) => IMAGE_MARKER.to_string(),
            (Some(_), false) => format!("{} {}", IMAGE_MARKER, text),
            (None, _) => text.to_string(),
        };
        self.context.conversation.push(Message::user(recorded));
        self.persist().await;

        let conversation_id = self.context.conversation.id.clone();
        let ticket = self.inflight.begin(&conversation_id);
        let instructions = self.context.agent.instruction_blob();
        let result = self
            .dispatcher
            .complete_cancellable(
                &outgoing,
                Some(instructions.as_str()),
                image.as_ref(),
                ticket.token(),
            )
            .await;

        if !self.inflight.finish(&ticket) || self.context.conversation.id != conversation_id {
            debug!(conversation_id, "Discarding result for superseded request");
            return None;
        }

        match result {
            Ok(completion) => {
                self.context
                    .conversation
                    .push(Message::model(completion.text.clone()));
                self.persist().await;
                Some(Reply {
                    text: completion.text,
                    model_used: Some(completion.model),
                })
            }
            Err(DispatchError::Cancelled) => None,
            Err(e) => {
                warn!(conversation_id, "Completion failed: {}", e);
                Some(Reply::failure())
            }
        }
    }

    /// Switches persona and starts a fresh conversation; returns the greeting.
    pub async fn set_agent(&mut self, agent_id: &str) -> Result<String, EspejoError> {
        let agent = self.agents.get_agent(agent_id).await?;
        info!(agent = %agent.id, "Switched agent");
        self.context.agent = agent;
        Ok(self.new_conversation())
    }

    /// Abandons any request in flight and starts over with a greeting.
    pub fn new_conversation(&mut self) -> String {
        self.inflight.cancel(&self.context.conversation.id);
        self.context.conversation =
            greeted_conversation(self.context.owner_id.clone(), &self.context.agent);
        self.context.persisted = false;
        self.context.agent.greeting()
    }

    pub async fn load_conversation(&mut self, id: &str) -> Result<&Conversation, EspejoError> {
        let conversation = self.store.load(id).await?;
        self.inflight.cancel(&self.context.conversation.id);

        if let Some(agent_id) = conversation.agent_id.as_deref() {
            if agent_id != self.context.agent.id {
                match self.agents.get_agent(agent_id).await {
                    Ok(agent) => self.context.agent = agent,
                    Err(e) => warn!(agent_id, "Keeping current agent: {}", e),
                }
            }
        }

        self.context.conversation = conversation;
        self.context.persisted = true;
        Ok(&self.context.conversation)
    }

    /// Deletes a stored conversation; deleting the open one starts a new one.
    pub async fn delete_conversation(&mut self, id: &str) -> Result<(), EspejoError> {
        self.store.delete(id).await?;
        if self.context.conversation.id == id {
            self.new_conversation();
        }
        Ok(())
    }

    pub async fn history(&self) -> Result<Vec<ConversationSummary>, EspejoError> {
        self.store.list(self.context.owner_id.as_deref()).await
    }

    async fn persist(&mut self) {
        let conversation = &self.context.conversation;
        let result = match (self.context.persisted, conversation.messages.last()) {
            (true, Some(last)) => self.store.append(&conversation.id, last).await,
            _ => self.store.save(conversation).await,
        };
        match result {
            Ok(()) => self.context.persisted = true,
            Err(e) => {
                // Next write re-sends the whole record.
                self.context.persisted = false;
                warn!(id = %conversation.id, "Could not persist conversation: {}", e);
            }
        }
    }
}

fn greeted_conversation(owner_id: Option<String>, agent: &Agent) -> Conversation {
    let mut conversation = Conversation::new(owner_id, Some(agent.id.clone()));
    conversation.push(Message::model(agent.greeting()));
    conversation
}

async fn first_agent(agents: &dyn AgentRegistry) -> Agent {
    let first = match agents.list_agents().await {
        Ok(list) => list.into_iter().next(),
        Err(e) => {
            warn!("Could not list agents: {}", e);
            None
        }
    };
    match first {
        Some(summary) => agents.get_agent(&summary.id).await.unwrap_or_else(|e| {
            warn!(agent = %summary.id, "Falling back to built-in agent: {}", e);
            Agent::builtin()
        }),
        None => Agent::builtin(),
    }
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

/// Reads an image for attaching to the next turn.
pub async fn load_image(path: &Path) -> Result<InlineData, EspejoError> {
    let mime = mime_for(path).ok_or_else(|| {
        EspejoError::Input(format!("Unsupported image type: {}", path.display()))
    })?;
    let size = tokio::fs::metadata(path).await?.len();
    if size > MAX_IMAGE_BYTES {
        return Err(EspejoError::Input(format!(
            "Image is {} bytes; the limit is 4 MiB",
            size
        )));
    }
    let bytes = tokio::fs::read(path).await?;
    Ok(InlineData::from_bytes(mime, &bytes))
}
