use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;

mod app;
mod client;
mod config;
mod handler;
mod logging;
mod session;
mod speech;
mod tui;
mod ui;

use app::App;
use client::ChatClient;
use config::Config;
use session::HistoryToken;
use speech::SpeechCapability;

#[derive(Parser)]
#[command(name = "opsready-chat")]
#[command(about = "Chat with the OpsReady AI assistant from the terminal", version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Assistant backend, e.g. http://localhost:8000
    #[arg(short, long)]
    base_url: Option<String>,
    /// Dictation program used for voice input
    #[arg(long)]
    speech_command: Option<String>,
    /// Log level filter, e.g. debug or "info,reqwest=warn"
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat (default)
    Chat,
    /// Send one message and print the reply
    Ask {
        /// Your question
        message: String,
    },
    /// Check whether the backend is up
    Health,
    /// Save the backend URL in the config file
    SetBaseUrl {
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::get_config_path()?,
    };
    let mut config = Config::load_from(&config_path)?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(command) = &cli.speech_command {
        config.speech.command = Some(command.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    let _logger = logging::init_logging(&config.logging)?;

    let client = ChatClient::new(&config.base_url, &config.chat_path, &config.health_path);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(client, &config).await?,
        Commands::Ask { message } => ask(&client, &message).await?,
        Commands::Health => health(&client).await?,
        Commands::SetBaseUrl { url } => {
            Config::save_base_url(&config_path, &url)?;
            println!("Backend set to {} in {}", url.bold(), config_path.display());
        }
    }

    Ok(())
}

async fn run_chat(client: ChatClient, config: &Config) -> Result<()> {
    log::info!("Starting chat against {}", client.base_url());

    let speech = SpeechCapability::detect(&config.speech);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();

    let mut app = App::new(client, speech, events.sender());
    app.probe_backend();

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event),
                None => break,
            }
        }
        anyhow::Ok(())
    }
    .await;

    tui::restore()?;
    log::info!("Chat closed");
    result
}

async fn ask(client: &ChatClient, message: &str) -> Result<()> {
    let message = message.trim();
    if message.is_empty() {
        anyhow::bail!("Message is empty");
    }

    match client.exchange(message, &HistoryToken::default()).await {
        Ok(reply) => {
            println!("{}", reply.response);
            Ok(())
        }
        Err(e) => {
            log::error!("Exchange failed: {}", e);
            Err(e.into())
        }
    }
}

async fn health(client: &ChatClient) -> Result<()> {
    match client.health().await {
        Ok(status) => {
            println!("{} {} ({})", "●".green(), client.base_url().bold(), status);
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "●".red(), client.base_url().bold());
            Err(e.into())
        }
    }
}
