use crate::agents::{AgentRegistry, FileAgentRegistry, KnowledgeLoader, SupabaseAgentRegistry};
use crate::cli::Args;
use crate::commands::{ChatState, create_command_registry};
use crate::config::{Config, CredentialPool, SupabaseConfig};
use crate::core::error::EspejoError;
use crate::dispatch::Dispatcher;
use crate::display;
use crate::input;
use crate::server::{self, AppState};
use crate::session::{ChatSession, load_image};
use crate::store::{ConversationStore, LocalStore, SupabaseClient, SupabaseStore, TieredStore};
use console::style;
use is_terminal::IsTerminal;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const KNOWLEDGE_TIMEOUT: Duration = Duration::from_secs(20);

pub struct Application {
    pub args: Args,
    pub config: Config,
}

impl Application {
    pub fn new(args: Args, mut config: Config) -> Self {
        if let Some(model) = &args.model {
            let models = &mut config.dispatch.models;
            models.retain(|m| m != model);
            models.insert(0, model.clone());
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        Self { args, config }
    }

    pub async fn run(&mut self) -> Result<(), EspejoError> {
        if self.args.serve {
            return self.handle_serve_mode().await;
        }

        let session = self.build_session().await?;
        if self.args.chat {
            self.handle_chat_mode(session).await
        } else {
            let context = if !io::stdin().is_terminal() {
                let mut buffer = String::new();
                io::stdin()
                    .read_to_string(&mut buffer)
                    .map_err(|e| EspejoError::Input(format!("Failed to read from stdin: {}", e)))?;
                Some(buffer).filter(|b| !b.trim().is_empty())
            } else {
                None
            };
            self.handle_one_shot_mode(session, context).await
        }
    }

    async fn handle_serve_mode(&self) -> Result<(), EspejoError> {
        let state = AppState::from_config(&self.config)?;
        server::serve(&self.config.server, state).await
    }

    async fn build_session(&self) -> Result<ChatSession, EspejoError> {
        let pool = CredentialPool::from_env();
        if pool.is_empty() {
            return Err(EspejoError::Config(
                "No Gemini keys found; set GEMINI_KEY_1, GEMINI_KEY_2, ... or GEMINI_API_KEYS"
                    .to_string(),
            ));
        }
        info!(keys = pool.len(), "Loaded credential pool");
        let dispatcher = Arc::new(Dispatcher::gemini(self.config.dispatch.clone(), pool)?);

        let knowledge = KnowledgeLoader::new(KNOWLEDGE_TIMEOUT)
            .map_err(|e| warn!("Knowledge documents disabled: {}", e))
            .ok();
        let local: Arc<dyn ConversationStore> = Arc::new(LocalStore::new(Config::history_dir()));

        let (store, agents, owner_id): (TieredStore, Arc<dyn AgentRegistry>, Option<String>) =
            match &self.config.supabase {
                Some(supabase) => {
                    let client = SupabaseClient::new(supabase)?;
                    let remote: Arc<dyn ConversationStore> = Arc::new(SupabaseStore::new(
                        client.clone(),
                        supabase.conversations_table.clone(),
                    ));
                    let agents: Arc<dyn AgentRegistry> = Arc::new(SupabaseAgentRegistry::new(
                        client.clone(),
                        supabase.agents_table.clone(),
                        knowledge,
                    ));
                    let owner_id = self.resolve_owner_id(&client, supabase).await;
                    (TieredStore::new(local, Some(remote)), agents, owner_id)
                }
                None => {
                    let agents: Arc<dyn AgentRegistry> = Arc::new(FileAgentRegistry::load(
                        &self.config.agents_path(),
                        knowledge,
                    )?);
                    (
                        TieredStore::local_only(local),
                        agents,
                        self.config.owner_id.clone(),
                    )
                }
            };

        ChatSession::start(
            dispatcher,
            Arc::new(store),
            agents,
            owner_id,
            self.args.agent.as_deref(),
        )
        .await
    }

    /// Configured id, then the remembered one, then a fresh anonymous sign-in.
    async fn resolve_owner_id(
        &self,
        client: &SupabaseClient,
        supabase: &SupabaseConfig,
    ) -> Option<String> {
        if let Some(id) = &self.config.owner_id {
            return Some(id.clone());
        }

        let path = Config::owner_id_path();
        if let Ok(id) = std::fs::read_to_string(&path) {
            let id = id.trim();
            if !id.is_empty() {
                debug!("Using remembered owner id");
                return Some(id.to_string());
            }
        }

        match client.sign_in_anonymously().await {
            Ok(id) => {
                let remembered = match path.parent() {
                    Some(parent) => std::fs::create_dir_all(parent),
                    None => Ok(()),
                }
                .and_then(|()| std::fs::write(&path, &id));
                if let Err(e) = remembered {
                    warn!(path = %path.display(), "Could not remember owner id: {}", e);
                }
                Some(id)
            }
            Err(e) => {
                warn!(url = %supabase.url, "Anonymous sign-in failed, history stays unscoped: {}", e);
                None
            }
        }
    }

    async fn handle_one_shot_mode(
        &self,
        mut session: ChatSession,
        context: Option<String>,
    ) -> Result<(), EspejoError> {
        let query = match (self.args.query.as_deref(), context) {
            (Some(query), Some(context)) => format!("{}\n\n{}", context.trim_end(), query),
            (None, Some(context)) => context,
            (Some(query), None) => query.to_string(),
            (None, None) if self.args.image.is_some() => String::new(),
            (None, None) => {
                return Err(EspejoError::Input(
                    "No question provided; pass one as an argument, pipe it in, or use --chat"
                        .to_string(),
                ));
            }
        };
        let image = match &self.args.image {
            Some(path) => Some(load_image(path).await?),
            None => None,
        };

        display::display_thinking();
        let reply = session.send(&query, image).await;
        display::clear_thinking();

        let Some(reply) = reply else {
            return Ok(());
        };
        if io::stdout().is_terminal() {
            display::display_reply(&session.agent().name, &reply);
        } else {
            println!("{}", reply.text);
        }
        Ok(())
    }

    async fn handle_chat_mode(&self, session: ChatSession) -> Result<(), EspejoError> {
        let commands = create_command_registry();
        let mut editor = input::create_editor(commands.clone())?;
        let mut state = ChatState::new(session);

        let agent = state.session.agent();
        display::display_welcome(&agent.name, &agent.greeting());

        loop {
            let line = match input::read_input(&mut editor)? {
                Some(line) => line.trim().to_string(),
                None => break,
            };
            if line.is_empty() {
                continue;
            }

            if line.starts_with('/') {
                match commands.execute_line(&line, &mut state).await {
                    Ok(Some(output)) => println!("{}", output),
                    Ok(None) => {}
                    Err(e) => eprintln!("{} {}", style("✗").bold().red(), e),
                }
                if !state.should_continue {
                    break;
                }
                continue;
            }

            let image = state.pending_image.take();
            let agent_name = state.session.agent().name.clone();
            let inflight = state.session.inflight();

            display::display_thinking();
            let reply = {
                let send = state.session.send(&line, image);
                tokio::pin!(send);
                tokio::select! {
                    reply = &mut send => reply,
                    _ = tokio::signal::ctrl_c() => {
                        inflight.cancel_all();
                        send.await
                    }
                }
            };
            display::clear_thinking();

            match reply {
                Some(reply) => display::display_reply(&agent_name, &reply),
                None => println!("{}", style("Reply cancelled.").dim()),
            }
        }

        input::save_history(&mut editor)?;
        Ok(())
    }
}
