use crate::bot::BotDispatcher;
use crate::channels::{Messenger, TelegramChannel, Update};
use crate::config::Config;
use crate::modes::ModeCatalog;
use crate::providers::{self, Provider};
use crate::relay::{RelayOrchestrator, RelaySettings};
use crate::timeouts::{SubjectKey, TimeoutScheduler};
use crate::transcript::{self, TranscriptStore};
use anyhow::{bail, Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

const LISTENER_INITIAL_BACKOFF_SECS: u64 = 2;
const LISTENER_MAX_BACKOFF_SECS: u64 = 60;
const UPDATE_QUEUE_DEPTH: usize = 100;

/// Fully wired components of a running bot.
pub struct Components {
    pub messenger: Arc<dyn Messenger>,
    pub provider: Arc<dyn Provider>,
    pub store: Arc<dyn TranscriptStore>,
    pub modes: Arc<ModeCatalog>,
    pub timeouts: TimeoutScheduler<SubjectKey>,
    pub dispatcher: Arc<BotDispatcher>,
}

impl Components {
    pub fn from_config(config: &Config) -> Result<Self> {
        let messenger: Arc<dyn Messenger> =
            Arc::new(TelegramChannel::from_config(&config.telegram));
        let provider = providers::create_provider(&config.ollama);
        Self::assemble(config, messenger, provider)
    }

    /// Wire everything around an already constructed messenger and provider.
    pub fn assemble(
        config: &Config,
        messenger: Arc<dyn Messenger>,
        provider: Arc<dyn Provider>,
    ) -> Result<Self> {
        let store = transcript::create_transcript_store(
            &config.storage,
            &config.workspace_dir,
            &config.ollama.default_model,
        )?;
        let modes_path = config.resolved_modes_path();
        let modes = Arc::new(
            ModeCatalog::load(modes_path.as_deref(), &config.relay.default_mode)
                .context("Failed to load chat modes")?,
        );
        let timeouts = TimeoutScheduler::new();
        let relay = Arc::new(RelayOrchestrator::new(
            Arc::clone(&provider),
            Arc::clone(&messenger),
            Arc::clone(&store),
            Arc::clone(&modes),
            RelaySettings::from_config(config),
        ));
        let dispatcher = Arc::new(BotDispatcher::new(
            Arc::clone(&messenger),
            Arc::clone(&provider),
            Arc::clone(&store),
            Arc::clone(&modes),
            relay,
            timeouts.clone(),
            config.menus.clone(),
        ));

        Ok(Self {
            messenger,
            provider,
            store,
            modes,
            timeouts,
            dispatcher,
        })
    }
}

pub async fn run(config: Config) -> Result<()> {
    if config.telegram.bot_token.trim().is_empty() {
        bail!(
            "Telegram bot token is not configured. Set telegram.bot_token in {} or LLAMARELAY_BOT_TOKEN",
            config.config_path.display()
        );
    }

    let components = Components::from_config(&config)?;
    tracing::info!(
        endpoint = %config.ollama.base_url,
        model = %config.ollama.default_model,
        store = components.store.name(),
        modes = components.modes.len(),
        "Relay components ready"
    );

    let (tx, rx) = mpsc::channel::<Update>(UPDATE_QUEUE_DEPTH);
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    {
        let messenger = Arc::clone(&components.messenger);
        handles.push(spawn_component_supervisor(
            "telegram",
            LISTENER_INITIAL_BACKOFF_SECS,
            LISTENER_MAX_BACKOFF_SECS,
            move || {
                let messenger = Arc::clone(&messenger);
                let tx = tx.clone();
                async move { messenger.listen(tx).await }
            },
        ));
    }

    handles.push(spawn_dispatch_loop(Arc::clone(&components.dispatcher), rx));

    println!("🦙 llamarelay started");
    println!("   Ollama:  {}", config.ollama.base_url);
    println!("   Model:   {}", config.ollama.default_model);
    println!("   Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        let _ = handle.await;
    }
    components.timeouts.shutdown();

    Ok(())
}

/// Fan updates out to their own tasks until the sender side closes.
fn spawn_dispatch_loop(
    dispatcher: Arc<BotDispatcher>,
    mut rx: mpsc::Receiver<Update>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            dispatcher.spawn(update);
        }
        tracing::warn!("Update queue closed");
    })
}

pub(crate) fn spawn_component_supervisor<F, Fut>(
    name: &'static str,
    initial_backoff_secs: u64,
    max_backoff_secs: u64,
    mut run_component: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = initial_backoff_secs.max(1);
        let max_backoff = max_backoff_secs.max(backoff);

        loop {
            match run_component().await {
                Ok(()) => tracing::warn!("Component '{name}' exited unexpectedly"),
                Err(e) => tracing::error!("Component '{name}' failed: {e}"),
            }

            tracing::info!("Restarting component '{name}' in {backoff}s");
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = backoff.saturating_mul(2).min(max_backoff);
        }
    })
}
