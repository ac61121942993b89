use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use listing_sniper::chat::ChatListener;
use listing_sniper::config::AppConfig;
use listing_sniper::dedup::DedupStore;
use listing_sniper::dispatcher::CommandDispatcher;
use listing_sniper::pipeline::SignalPipeline;
use listing_sniper::reporter::{self, ActivityStats};
use listing_sniper::scheduler::SellScheduler;
use listing_sniper::shutdown::{ShutdownCoordinator, termination_signal};
use listing_sniper::stream::{StreamListener, WsConnector};
use listing_sniper::telegram::TelegramClient;
use listing_sniper::types::ChatTarget;

/// Resolve every configured chat once so misconfigured ids show up before
/// the first announcement. Failures are logged, not fatal.
async fn check_chat_access(telegram: &TelegramClient, sources: &[ChatTarget], destination: &ChatTarget) {
    for source in sources {
        match telegram.get_chat(source).await {
            Ok(chat) => info!(
                "Source {source} resolved: {} ({}, id {})",
                chat.title.or(chat.username).unwrap_or_default(),
                chat.kind,
                chat.id
            ),
            Err(e) => warn!("Source {source} is not visible to the bot: {e:#}"),
        }
    }
    if let Err(e) = telegram.get_chat(destination).await {
        warn!("Destination {destination} is not reachable by the bot: {e:#}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::parse();
    config.validate()?;

    let sources = config.sources();
    let destination = config.destination()?;
    info!(
        "Starting listing-sniper: {} source(s) -> {destination}, buy={} auto_sell={} ({}% after {}s)",
        sources.len(),
        config.buy_amount.normalize(),
        config.auto_sell_enabled,
        config.auto_sell_percent,
        config.auto_sell_delay,
    );

    if config.destination_is_bot() {
        warn!(
            "TARGET_BOT_ID {destination} looks like a bot account; the Bot API does not deliver \
             messages between bots, so commands must go to a group or channel the agent reads"
        );
    }

    let coordinator = ShutdownCoordinator::new();
    let stats = Arc::new(ActivityStats::default());
    let dedup = Arc::new(DedupStore::new());
    let telegram = TelegramClient::new(&config.telegram_bot_token)?;
    check_chat_access(&telegram, &sources, &destination).await;
    let dispatcher = CommandDispatcher::new(Arc::new(telegram.clone()), coordinator.token());

    let scheduler = config.auto_sell_enabled.then(|| {
        SellScheduler::new(
            dispatcher.clone(),
            destination.clone(),
            config.auto_sell_percent,
            config.sell_delay(),
            coordinator.clone(),
            stats.clone(),
        )
    });
    if scheduler.is_none() {
        info!("Auto-sell disabled");
    }

    let pipeline = SignalPipeline::new(
        dedup.clone(),
        dispatcher,
        scheduler,
        destination,
        config.buy_amount,
        coordinator.clone(),
        stats.clone(),
    );

    let chat = ChatListener::new(telegram.feed(), sources, pipeline.clone(), coordinator.token());
    let mut chat_task = coordinator.spawn("chat listener", chat.run());

    match (config.stream_enabled, config.stream_credential()) {
        (true, Some(key)) => {
            info!("Stream listener enabled: {}", config.stream_url);
            let connector = WsConnector::new(config.stream_url.clone(), key.to_string());
            let stream = StreamListener::new(connector, pipeline, coordinator.token());
            coordinator.spawn("stream listener", stream.run());
        }
        (true, None) => warn!("STREAM_ENABLED is set but STREAM_API_KEY is missing, running chat-only"),
        (false, _) => info!("Stream listener disabled"),
    }

    tokio::select! {
        signal = termination_signal() => {
            let signal = signal?;
            info!("{signal} received, shutting down");
        }
        _ = &mut chat_task => {
            warn!("Chat listener exited, shutting down");
        }
    }
    coordinator.shutdown();

    info!("Waiting for {} task(s) to finish", coordinator.outstanding());
    loop {
        tokio::select! {
            _ = coordinator.wait() => break,
            signal = termination_signal() => {
                let signal = signal?;
                info!("{signal} received again, shutdown already in progress");
            }
        }
    }

    reporter::report_exit_summary(&stats.summary(dedup.dispatched()));
    info!("Shutdown complete");
    Ok(())
}
