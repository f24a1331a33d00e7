//! gembot CLI entry point.

use gembot::config::Config;
use gembot::dispatch::Dispatcher;
use gembot::llm::GeminiClient;
use gembot::messaging::{ChatPlatform as _, TelegramAdapter};
use gembot::pipeline::Pipeline;
use gembot::store::{InteractionStore, Recorder};

use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "gembot")]
#[command(about = "Telegram bot that answers messages with the Gemini API", version)]
struct Cli {
    /// Path to config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_from_path(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let _log_guard = gembot::logging::init_tracing(
        cli.debug || config.verbose,
        config.log_dir.as_deref(),
        config.redactor(),
    )?;

    tracing::info!(
        config = %config_path.display(),
        text_model = %config.models.text,
        allowed_users = config.allowed_users.len(),
        "starting gembot"
    );

    let store = match &config.db_path {
        Some(db_path) => Some(
            InteractionStore::connect(db_path)
                .await
                .with_context(|| format!("failed to open database {}", db_path.display()))?,
        ),
        None => {
            tracing::info!("no database configured, interactions will not be recorded");
            None
        }
    };
    let recorder = store
        .clone()
        .map(|store| Arc::new(store) as Arc<dyn Recorder>);

    let client = Arc::new(
        GeminiClient::new(config.api_base_url.clone(), config.google_ai_api_key.clone())
            .context("failed to build Gemini client")?,
    );
    let telegram = Arc::new(TelegramAdapter::new(config.telegram_bot_token.clone()));

    let config = Arc::new(config);
    let pipeline = Pipeline::new(config.clone(), telegram.clone(), client, recorder)
        .context("failed to build answer pipeline")?;
    let dispatcher = Arc::new(Dispatcher::new(config, Arc::new(pipeline), store));

    let inbound = telegram
        .start()
        .await
        .context("failed to start telegram adapter")?;
    tracing::info!("gembot started");

    tokio::select! {
        _ = dispatcher.run(inbound) => {
            tracing::info!("update stream ended");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    if let Err(error) = telegram.shutdown().await {
        tracing::warn!(%error, "telegram adapter shutdown failed");
    }
    tracing::info!("gembot stopped");
    Ok(())
}
