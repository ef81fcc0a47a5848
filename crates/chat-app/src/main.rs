use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use parlor::app::{self, AppOptions};

#[derive(Parser, Debug)]
#[command(name = "parlor", version, about = "Chat with an AI agent from the terminal")]
struct Cli {
    /// Settings file, defaults to the user config directory.
    #[arg(long, env = "PARLOR_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file or URL.
    #[arg(long)]
    database: Option<PathBuf>,

    /// Session id to open on startup.
    #[arg(long)]
    session: Option<String>,

    /// Agent id used for new sessions.
    #[arg(long)]
    agent: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so they never interleave with the transcript.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = AppOptions {
        config_path: cli.config,
        database_path: cli.database,
        session: cli.session,
        agent: cli.agent,
    };

    match app::run(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("parlor exited: {error}");
            eprintln!("parlor: {error}");
            ExitCode::FAILURE
        }
    }
}
