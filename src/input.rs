use crate::commands::CommandDispatcher;
use crate::config::Config;
use crate::core::error::EspejoError;

use console::style;
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::{Hinter, HistoryHinter};
use rustyline::history::FileHistory;
use rustyline::validate::Validator;
use rustyline::{CompletionType, Context, EditMode, Editor, Helper};
use std::borrow::Cow;

/// Completes slash commands, and file paths after `/image`.
pub struct ChatHelper {
    filename_completer: FilenameCompleter,
    history_hinter: HistoryHinter,
    commands: CommandDispatcher,
}

impl ChatHelper {
    pub fn new(commands: CommandDispatcher) -> Self {
        Self {
            filename_completer: FilenameCompleter::new(),
            history_hinter: HistoryHinter {},
            commands,
        }
    }

    fn command_matches(&self, prefix: &str) -> Vec<Pair> {
        self.commands
            .get_command_names()
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .map(|name| Pair {
                display: format!("/{}", name),
                replacement: name,
            })
            .collect()
    }
}

impl Helper for ChatHelper {}

impl Completer for ChatHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        if line.starts_with("/image ") {
            return self.filename_completer.complete(line, pos, ctx);
        }
        if let Some(typed) = line[..pos].strip_prefix('/') {
            if !typed.contains(' ') {
                return Ok((1, self.command_matches(typed)));
            }
        }
        Ok((pos, Vec::new()))
    }
}

impl Hinter for ChatHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, ctx: &Context<'_>) -> Option<String> {
        self.history_hinter.hint(line, pos, ctx)
    }
}

impl Highlighter for ChatHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(style(hint).dim().to_string())
    }
}

impl Validator for ChatHelper {}

pub type ChatEditor = Editor<ChatHelper, FileHistory>;

pub fn create_editor(commands: CommandDispatcher) -> Result<ChatEditor, EspejoError> {
    let config = rustyline::Config::builder()
        .history_ignore_space(true)
        .completion_type(CompletionType::List)
        .edit_mode(EditMode::Emacs)
        .build();

    let mut editor = Editor::with_config(config)
        .map_err(|e| EspejoError::Input(format!("Failed to create line editor: {}", e)))?;
    editor.set_helper(Some(ChatHelper::new(commands)));
    let _ = editor.load_history(&Config::input_history_path());

    Ok(editor)
}

/// `None` on Ctrl-C or Ctrl-D at the prompt.
pub fn read_input(editor: &mut ChatEditor) -> Result<Option<String>, EspejoError> {
    let prompt = style("you › ").bold().cyan().to_string();
    match editor.readline(&prompt) {
        Ok(line) => {
            if !line.trim().is_empty() {
                editor.add_history_entry(line.as_str()).map_err(|e| {
                    EspejoError::Input(format!("Failed to add history entry: {}", e))
                })?;
            }
            Ok(Some(line))
        }
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
        Err(err) => Err(EspejoError::Input(format!("Input error: {}", err))),
    }
}

pub fn save_history(editor: &mut ChatEditor) -> Result<(), EspejoError> {
    let history_path = Config::input_history_path();
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    editor
        .save_history(&history_path)
        .map_err(|e| EspejoError::Input(format!("Failed to save history: {}", e)))
}
