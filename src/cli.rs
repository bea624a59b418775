use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Talk to Espejo Digital from the terminal or serve it over HTTP", long_about = None)]
pub struct Args {
    /// Question to reflect on; piped stdin is added as context
    pub query: Option<String>,

    /// Start an interactive conversation
    #[arg(short, long, conflicts_with = "serve")]
    pub chat: bool,

    /// Run the HTTP completion proxy
    #[arg(short, long)]
    pub serve: bool,

    /// Agent to talk to
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Image to attach to the question
    #[arg(short, long)]
    pub image: Option<PathBuf>,

    /// Port for --serve
    #[arg(short, long, env = "ESPEJO_PORT")]
    pub port: Option<u16>,

    /// Model to try before the configured ones
    #[arg(short, long)]
    pub model: Option<String>,
}
