use crate::commands::handler::CommandHandler;
use crate::core::error::EspejoError;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: CommandHandler + 'static>(&mut self, name: &str, command: C) {
        self.handlers.insert(name.to_string(), Arc::new(command));
    }

    pub async fn execute(
        &self,
        name: &str,
        args: &[&str],
        state: &mut super::ChatState,
    ) -> Result<Option<String>, EspejoError> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| EspejoError::Input(format!("Unknown command: /{}", name)))?;
        handler.execute(state, args).await
    }

    pub fn get_command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
