#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use llamarelay::{Config, daemon, doctor, modes::ModeCatalog};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

/// Relay Telegram chats to a local Ollama server.
#[derive(Parser, Debug)]
#[command(name = "llamarelay")]
#[command(version)]
#[command(about = "Streams local LLM replies into Telegram, one edited message per turn.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the bot: long-poll Telegram and relay turns to Ollama
    Start,

    /// Show the effective configuration
    Status,

    /// List the chat modes the bot offers
    Modes,

    /// Check Ollama, Telegram and transcript storage
    Doctor,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load_or_init()?;

    match cli.command {
        Commands::Start => {
            info!("🦙 Starting llamarelay against {}", config.ollama.base_url);
            daemon::run(config).await
        }

        Commands::Status => {
            let modes = load_modes(&config)?;
            println!("🦙 llamarelay Status");
            println!();
            println!("Version:     {}", env!("CARGO_PKG_VERSION"));
            println!("Config:      {}", config.config_path.display());
            println!("Workspace:   {}", config.workspace_dir.display());
            println!();
            println!("🤖 Ollama:        {}", config.ollama.base_url);
            println!("   Model:         {}", config.ollama.default_model);
            println!(
                "💬 Telegram:      {}",
                if config.telegram.bot_token.trim().is_empty() {
                    "not configured"
                } else {
                    "configured"
                }
            );
            println!(
                "   Allowed users: {}",
                if config.telegram.allowed_users.is_empty() {
                    "(none)".to_string()
                } else {
                    config.telegram.allowed_users.join(", ")
                }
            );
            println!(
                "🧠 Storage:       {} ({})",
                config.storage.backend,
                config
                    .storage
                    .resolved_db_path(&config.workspace_dir)
                    .display()
            );
            println!(
                "🎭 Modes:         {} (default: {})",
                modes.len(),
                modes.default_key()
            );
            Ok(())
        }

        Commands::Modes => {
            let modes = load_modes(&config)?;
            println!("Chat modes ({}):", modes.len());
            for mode in modes.iter() {
                let marker = if mode.key == modes.default_key() { "*" } else { " " };
                println!("  {marker} {:<24} {}", mode.key, mode.display_name);
            }
            Ok(())
        }

        Commands::Doctor => doctor::run(&config).await,
    }
}

fn load_modes(config: &Config) -> Result<ModeCatalog> {
    let path = config.resolved_modes_path();
    ModeCatalog::load(path.as_deref(), &config.relay.default_mode)
}
