use super::ChatState;
use crate::core::error::EspejoError;
use crate::display;
use crate::session::load_image;
use async_trait::async_trait;
use console::style;
use std::path::Path;

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(
        &self,
        state: &mut ChatState,
        args: &[&str],
    ) -> Result<Option<String>, EspejoError>;
    fn help(&self) -> &'static str;
}

pub struct QuitCommand;
pub struct HelpCommand;
pub struct NewCommand;
pub struct AgentsCommand;
pub struct AgentCommand;
pub struct HistoryCommand;
pub struct LoadCommand;
pub struct DeleteCommand;
pub struct ImageCommand;

fn required_arg<'a>(args: &[&'a str], usage: &str) -> Result<&'a str, EspejoError> {
    args.first()
        .copied()
        .ok_or_else(|| EspejoError::Input(format!("Usage: {}", usage)))
}

#[async_trait]
impl CommandHandler for QuitCommand {
    async fn execute(
        &self,
        state: &mut ChatState,
        _args: &[&str],
    ) -> Result<Option<String>, EspejoError> {
        state.should_continue = false;
        Ok(None)
    }

    fn help(&self) -> &'static str {
        "/quit - Leave the mirror"
    }
}

#[async_trait]
impl CommandHandler for HelpCommand {
    async fn execute(
        &self,
        _state: &mut ChatState,
        _args: &[&str],
    ) -> Result<Option<String>, EspejoError> {
        let title = style("Available Commands").bold().underlined();
        let help_text = [
            title.to_string(),
            HelpCommand.help().to_string(),
            NewCommand.help().to_string(),
            AgentsCommand.help().to_string(),
            AgentCommand.help().to_string(),
            HistoryCommand.help().to_string(),
            LoadCommand.help().to_string(),
            DeleteCommand.help().to_string(),
            ImageCommand.help().to_string(),
            QuitCommand.help().to_string(),
        ]
        .join("\n");

        Ok(Some(help_text))
    }

    fn help(&self) -> &'static str {
        "/help - Show available commands"
    }
}

#[async_trait]
impl CommandHandler for NewCommand {
    async fn execute(
        &self,
        state: &mut ChatState,
        _args: &[&str],
    ) -> Result<Option<String>, EspejoError> {
        state.pending_image = None;
        let greeting = state.session.new_conversation();
        display::display_greeting(&greeting);
        Ok(None)
    }

    fn help(&self) -> &'static str {
        "/new - Start a new conversation"
    }
}

#[async_trait]
impl CommandHandler for AgentsCommand {
    async fn execute(
        &self,
        state: &mut ChatState,
        _args: &[&str],
    ) -> Result<Option<String>, EspejoError> {
        let agents = state.session.agents().list_agents().await?;
        display::display_agents(&agents, &state.session.agent().id);
        Ok(None)
    }

    fn help(&self) -> &'static str {
        "/agents - List available agents"
    }
}

#[async_trait]
impl CommandHandler for AgentCommand {
    async fn execute(
        &self,
        state: &mut ChatState,
        args: &[&str],
    ) -> Result<Option<String>, EspejoError> {
        if args.is_empty() {
            let agent = state.session.agent();
            return Ok(Some(format!(
                "Current agent: {} ({})",
                agent.name, agent.id
            )));
        }
        let greeting = state.session.set_agent(args[0]).await?;
        display::display_greeting(&greeting);
        Ok(None)
    }

    fn help(&self) -> &'static str {
        "/agent <id> - Show or switch the current agent"
    }
}

#[async_trait]
impl CommandHandler for HistoryCommand {
    async fn execute(
        &self,
        state: &mut ChatState,
        _args: &[&str],
    ) -> Result<Option<String>, EspejoError> {
        let conversations = state.session.history().await?;
        display::display_history(&conversations, &state.session.conversation().id);
        Ok(None)
    }

    fn help(&self) -> &'static str {
        "/history - List saved conversations"
    }
}

#[async_trait]
impl CommandHandler for LoadCommand {
    async fn execute(
        &self,
        state: &mut ChatState,
        args: &[&str],
    ) -> Result<Option<String>, EspejoError> {
        let id = required_arg(args, "/load <id>")?;
        state.pending_image = None;
        state.session.load_conversation(id).await?;
        display::display_conversation(state.session.conversation(), &state.session.agent().name);
        Ok(None)
    }

    fn help(&self) -> &'static str {
        "/load <id> - Continue a saved conversation"
    }
}

#[async_trait]
impl CommandHandler for DeleteCommand {
    async fn execute(
        &self,
        state: &mut ChatState,
        args: &[&str],
    ) -> Result<Option<String>, EspejoError> {
        let id = required_arg(args, "/delete <id>")?;
        state.session.delete_conversation(id).await?;
        Ok(Some(format!("Deleted conversation {}", id)))
    }

    fn help(&self) -> &'static str {
        "/delete <id> - Delete a saved conversation"
    }
}

#[async_trait]
impl CommandHandler for ImageCommand {
    async fn execute(
        &self,
        state: &mut ChatState,
        args: &[&str],
    ) -> Result<Option<String>, EspejoError> {
        match args {
            [] => Ok(Some(match &state.pending_image {
                Some(image) => format!(
                    "An {} image is attached to the next message",
                    image.mime_type
                ),
                None => "No image attached".to_string(),
            })),
            ["clear"] => {
                state.pending_image = None;
                Ok(Some("Image removed".to_string()))
            }
            _ => {
                let path = args.join(" ");
                let image = load_image(Path::new(&path)).await?;
                state.pending_image = Some(image);
                Ok(Some(format!(
                    "Attached {}; it will be sent with your next message",
                    path
                )))
            }
        }
    }

    fn help(&self) -> &'static str {
        "/image <path|clear> - Attach an image to the next message"
    }
}
