mod classifier;
mod config;
mod dispatch;
mod error;
mod generation;
mod ledger;
mod llm;
mod platform;
mod rate_limiter;
mod resolver;
mod scheduler;
#[cfg(test)]
mod testing;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::dispatch::{DispatchLoop, DispatchSettings};
use crate::ledger::ReplyLedger;
use crate::llm::LlmClient;
use crate::platform::telegram::{self, TelegramClient};
use crate::rate_limiter::RateLimiter;
use crate::scheduler::{tasks, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,channel_commenter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let max_per_hour = config.rate_limit.max_per_hour();
    let max_per_day = config.rate_limit.max_per_day();

    info!("Configuration loaded successfully");
    info!("  Model: {} via {}", config.llm.model, config.llm.provider);
    info!("  Channels: {:?}", config.telegram.channels);
    info!(
        "  Rate limits: {} per hour, {} per day ({:?} profile)",
        max_per_hour, max_per_day, config.rate_limit.profile
    );
    info!("  Ledger: {}", config.ledger.path.display());
    info!(
        "  Direct messages: {}",
        if config.telegram.reply_to_direct_messages {
            "answered"
        } else {
            "ignored"
        }
    );

    let limiter = Arc::new(RateLimiter::new(max_per_hour, max_per_day));
    let ledger = Arc::new(ReplyLedger::load(&config.ledger.path).await);
    let generator = Arc::new(LlmClient::new(config.llm.clone())?);
    let client = Arc::new(TelegramClient::new(&config.telegram.bot_token));

    let mapping = resolver::resolve_channels(client.as_ref(), &config.channel_refs()).await?;
    info!(
        "{} channel(s) monitored, {} bot message(s) tracked in {}",
        mapping.len(),
        ledger.len().await,
        ledger.path().display()
    );

    let mut scheduler = Scheduler::new().await?;
    tasks::register_builtin_tasks(
        &mut scheduler,
        Arc::clone(&ledger),
        Arc::clone(&limiter),
        &config.ledger.flush_cron,
    )
    .await?;
    scheduler.start().await?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let bot = client.bot();

    let dispatch = DispatchLoop::new(
        client,
        generator,
        Arc::clone(&limiter),
        Arc::clone(&ledger),
        mapping,
        DispatchSettings {
            model: config.llm.model.clone(),
            system_prompt: config.llm.system_prompt.clone(),
            reply_to_direct_messages: config.telegram.reply_to_direct_messages,
            flush_on_send: config.ledger.flush_on_send,
            max_event_age: config.rate_limit.max_event_age(),
        },
    );
    let shutdown = shutdown_signal()?;

    info!("Bot is running. Press Ctrl+C to stop.");
    tokio::select! {
        _ = dispatch.run(events_rx) => {
            warn!("Dispatch loop stopped");
        }
        result = telegram::listen(bot, events_tx) => {
            if let Err(e) = result {
                error!("Telegram listener failed: {:#}", e);
            }
            warn!("Telegram listener stopped");
        }
        signal = shutdown => {
            info!("Received {}, saving data...", signal);
        }
    }

    if let Err(e) = scheduler.shutdown().await {
        warn!("{:#}", e);
    }
    ledger.flush_logged().await;

    Ok(())
}

/// Resolves with the signal's name on Ctrl+C or SIGTERM. The SIGTERM
/// handler is installed before this returns.
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    Ok(async move {
        #[cfg(unix)]
        let terminated = terminate.recv();
        #[cfg(not(unix))]
        let terminated = std::future::pending::<Option<()>>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                "Ctrl+C"
            }
            _ = terminated => "SIGTERM",
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        let shutdown = shutdown_signal().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let signal = tokio::time::timeout(Duration::from_secs(10), shutdown)
            .await
            .unwrap();
        assert_eq!(signal, "SIGTERM");
    }
}
