use super::{
    ChatState,
    handler::{
        AgentCommand, AgentsCommand, DeleteCommand, HelpCommand, HistoryCommand, ImageCommand,
        LoadCommand, NewCommand, QuitCommand,
    },
    registry::CommandRegistry,
};
use crate::core::error::EspejoError;
use std::sync::Arc;

#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<CommandRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    /// Runs a `/command arg...` line.
    pub async fn execute_line(
        &self,
        line: &str,
        state: &mut ChatState,
    ) -> Result<Option<String>, EspejoError> {
        let parts: Vec<&str> = line.trim_start_matches('/').split_whitespace().collect();
        match parts.split_first() {
            Some((command, args)) => self.registry.execute(command, args, state).await,
            None => Ok(None),
        }
    }

    pub fn get_command_names(&self) -> Vec<String> {
        self.registry.get_command_names()
    }
}

pub fn create_command_registry() -> CommandDispatcher {
    let mut registry = CommandRegistry::new();

    registry.register("quit", QuitCommand);
    registry.register("help", HelpCommand);
    registry.register("new", NewCommand);
    registry.register("agents", AgentsCommand);
    registry.register("agent", AgentCommand);
    registry.register("history", HistoryCommand);
    registry.register("load", LoadCommand);
    registry.register("delete", DeleteCommand);
    registry.register("image", ImageCommand);

    CommandDispatcher::new(Arc::new(registry))
}
