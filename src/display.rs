use crate::agents::AgentSummary;
use crate::providers::Role;
use crate::session::Reply;
use crate::store::{Conversation, ConversationSummary};
use crate::utils::text::{display_width, wrap_text};
use console::{Term, style};
use termimad::MadSkin;

fn box_width(max: usize) -> usize {
    let terminal_width = Term::stdout().size().1 as usize;
    std::cmp::min(terminal_width.saturating_sub(4), max).max(40)
}

/// Replies that look like markdown are rendered with termimad, the rest in a box.
pub fn display_reply(agent_name: &str, reply: &Reply) {
    if reply.is_failure() {
        display_failure(&reply.text);
        return;
    }

    println!("\n{}", style(format!("🪞 {}", agent_name)).bold().magenta());
    if looks_like_markdown(&reply.text) {
        display_markdown(&reply.text);
    } else {
        display_boxed(&reply.text);
    }
    if let Some(model) = &reply.model_used {
        println!("{}", style(format!("  via {}", model)).dim());
    }
}

fn looks_like_markdown(text: &str) -> bool {
    text.contains("```")
        || text.contains("**")
        || text.contains('`')
        || text.lines().any(|l| {
            let l = l.trim_start();
            l.starts_with('#') || l.starts_with("- ") || l.starts_with("* ")
        })
}

pub fn display_markdown(text: &str) {
    let mut skin = MadSkin::default();
    skin.bold.set_fg(termimad::crossterm::style::Color::Magenta);
    skin.print_text(text);
}

fn display_boxed(text: &str) {
    let max_width = box_width(100);
    let lines = wrap_text(text, max_width.saturating_sub(4));
    let content_width = lines.iter().map(|l| display_width(l)).max().unwrap_or(0);
    let width = std::cmp::min(max_width, content_width + 4);

    println!("{}", style(format!("┌{}┐", "─".repeat(width - 2))).dim().magenta());
    for line in &lines {
        let padding = width.saturating_sub(display_width(line) + 3);
        println!("│ {}{}│", style(line).white(), " ".repeat(padding));
    }
    println!("{}", style(format!("└{}┘", "─".repeat(width - 2))).dim().magenta());
}

pub fn display_failure(message: &str) {
    println!("\n{} {}", style("🌫").bold(), style(message).italic().yellow());
}

pub fn display_greeting(greeting: &str) {
    println!("\n{}", style(greeting).italic().cyan());
}

pub fn display_welcome(agent_name: &str, greeting: &str) {
    println!(
        "{} {}",
        style("Espejo Digital").bold().magenta(),
        style(format!("· talking with {}", agent_name)).dim()
    );
    println!(
        "{}",
        style("Type /help for commands, Ctrl+C cancels a reply, Ctrl+D exits.").dim()
    );
    display_greeting(greeting);
}

/// Shown on stderr so piped output stays clean.
pub fn display_thinking() {
    let term = Term::stderr();
    if term.is_term() {
        let _ = term.write_line(&style("  reflecting…").dim().to_string());
    }
}

pub fn clear_thinking() {
    let term = Term::stderr();
    if term.is_term() {
        let _ = term.clear_last_lines(1);
    }
}

pub fn display_agents(agents: &[AgentSummary], current_id: &str) {
    println!("\n{}", style("Agents").bold().underlined());
    for agent in agents {
        let marker = if agent.id == current_id { "●" } else { " " };
        println!(
            "{} {} {} {}",
            style(marker).green(),
            style(&agent.id).dim(),
            style(&agent.name).bold(),
            style(format!("· {}", agent.description)).dim()
        );
    }
}

pub fn display_history(conversations: &[ConversationSummary], current_id: &str) {
    if conversations.is_empty() {
        println!("No saved conversations yet.");
        return;
    }
    println!("\n{}", style("Conversations").bold().underlined());
    for summary in conversations {
        let marker = if summary.id == current_id { "●" } else { " " };
        println!(
            "{} {} {} {}",
            style(marker).green(),
            style(summary.updated_at.format("%Y-%m-%d %H:%M")).dim(),
            style(&summary.title).bold(),
            style(&summary.id).dim()
        );
    }
}

pub fn display_conversation(conversation: &Conversation, agent_name: &str) {
    println!("\n{}", style(conversation.display_title()).bold().underlined());
    for message in &conversation.messages {
        let who = match message.role {
            Role::User => style("You".to_string()).bold().cyan(),
            Role::Model => style(agent_name.to_string()).bold().magenta(),
        };
        println!("\n{}: {}", who, message.text());
    }
}
