use clap::Parser;
use console::style;
use espejo::app::Application;
use espejo::cli::Args;
use espejo::config::Config;
use tracing_subscriber::EnvFilter;

const SERVE_LOG_FILTER: &str = "espejo=info,tower_http=info";
const TERMINAL_LOG_FILTER: &str = "espejo=warn";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_filter = if args.serve {
        SERVE_LOG_FILTER
    } else {
        TERMINAL_LOG_FILTER
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", style("Error loading config:").bold().red(), e);
            std::process::exit(1);
        }
    };

    let mut app = Application::new(args, config);
    if let Err(e) = app.run().await {
        eprintln!("{} {}", style("Error:").bold().red(), e);
        std::process::exit(1);
    }
}
