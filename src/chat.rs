use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::extractor::extract_from_text;
use crate::pipeline::{SignalPipeline, Submission};
use crate::retry::RetryPolicy;
use crate::types::{ChatTarget, RawOrigin, Signal};

/// Pause policy after consecutive feed errors.
const FEED_ERROR_POLICY: RetryPolicy =
    RetryPolicy::unbounded_exponential(Duration::from_secs(1), Duration::from_secs(30));

/// One inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub chat_id: i64,
    pub chat_username: Option<String>,
    pub message_id: i64,
    pub sender: Option<String>,
    pub text: String,
}

/// Source of new-message notifications.
#[async_trait]
pub trait ChatFeed: Send {
    /// Next message, `Ok(None)` once the feed has closed for good.
    async fn next_message(&mut self) -> Result<Option<ChatMessage>>;
}

/// Split a comma-separated source list into an ordered, de-duplicated set.
pub fn parse_sources(raw: &str) -> Vec<ChatTarget> {
    let mut out: Vec<ChatTarget> = Vec::new();
    for target in raw.split(',').filter_map(ChatTarget::parse) {
        if !out.contains(&target) {
            out.push(target);
        }
    }
    out
}

/// Feeds messages from the configured sources through text extraction and
/// into the signal pipeline, one message at a time in arrival order.
pub struct ChatListener<F> {
    feed: F,
    sources: Vec<ChatTarget>,
    pipeline: SignalPipeline,
    cancel: CancellationToken,
}

impl<F: ChatFeed> ChatListener<F> {
    pub fn new(
        feed: F,
        sources: Vec<ChatTarget>,
        pipeline: SignalPipeline,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            feed,
            sources,
            pipeline,
            cancel,
        }
    }

    /// Run until cancelled or the feed closes.
    pub async fn run(mut self) {
        let labels: Vec<String> = self.sources.iter().map(|s| s.to_string()).collect();
        info!("Chat listener watching: {}", labels.join(", "));

        let mut consecutive_errors: u32 = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.feed.next_message() => next,
            };

            match next {
                Ok(Some(message)) => {
                    consecutive_errors = 0;
                    self.handle_message(message);
                }
                Ok(None) => {
                    warn!("Chat feed closed");
                    break;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let pause = FEED_ERROR_POLICY.delay_after(consecutive_errors);
                    warn!("Chat feed error ({consecutive_errors} in a row): {e:#}, pausing {pause:?}");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }
        }

        info!("Chat listener stopped");
    }

    /// Process one message. Returns `None` when the message is ignored.
    pub fn handle_message(&self, message: ChatMessage) -> Option<Submission> {
        let from_source = self
            .sources
            .iter()
            .any(|s| s.matches(message.chat_id, message.chat_username.as_deref()));
        if !from_source {
            debug!("Ignoring message from chat {}", message.chat_id);
            return None;
        }

        let extraction = extract_from_text(&message.text)?;
        info!(
            "Extracted {} ({}) from {}",
            extraction.address,
            extraction.kind.label(),
            message.sender.as_deref().unwrap_or("channel post")
        );

        let origin = RawOrigin::Chat {
            chat_id: message.chat_id,
            message_id: message.message_id,
        };
        Some(self.pipeline.submit(Signal::new(extraction, origin)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::dedup::DedupStore;
    use crate::dispatcher::CommandDispatcher;
    use crate::reporter::ActivityStats;
    use crate::shutdown::ShutdownCoordinator;
    use crate::testing::{RecordingSink, ScriptedFeed, chat_message};

    const ADDR: &str = "0x97693439ea2f0ecdeb9135881e49f354656a911c";

    fn pipeline(sink: Arc<RecordingSink>, coordinator: &ShutdownCoordinator) -> SignalPipeline {
        SignalPipeline::new(
            Arc::new(DedupStore::new()),
            CommandDispatcher::new(sink, coordinator.token()),
            None,
            ChatTarget::Username("GMGN_bsc_bot".into()),
            dec!(0.1),
            coordinator.clone(),
            Arc::new(ActivityStats::default()),
        )
    }

    fn listing(addr: &str) -> String {
        format!("https://www.binance.com/en/binancewallet/{addr}/bsc")
    }

    // ── parse_sources ──────────────────────────────────────────────

    #[test]
    fn sources_split_and_resolved() {
        let sources = parse_sources("@NewListingsFeed, -1001234567890 ,newsbothub");
        assert_eq!(
            sources,
            vec![
                ChatTarget::Username("NewListingsFeed".into()),
                ChatTarget::Id(-1001234567890),
                ChatTarget::Username("newsbothub".into()),
            ]
        );
    }

    #[test]
    fn sources_drop_empty_and_repeats() {
        let sources = parse_sources("a,,a, 5 ,5,");
        assert_eq!(
            sources,
            vec![ChatTarget::Username("a".into()), ChatTarget::Id(5)]
        );
        assert!(parse_sources(" , ").is_empty());
    }

    // ── listener ───────────────────────────────────────────────────

    #[tokio::test]
    async fn ignores_unconfigured_chats() {
        let coordinator = ShutdownCoordinator::new();
        let sink = Arc::new(RecordingSink::new());
        let listener = ChatListener::new(
            ScriptedFeed::new(vec![]),
            vec![ChatTarget::Id(1)],
            pipeline(sink, &coordinator),
            coordinator.token(),
        );
        assert!(listener.handle_message(chat_message(2, None, &listing(ADDR))).is_none());
        assert!(listener.handle_message(chat_message(1, None, "no address here")).is_none());
        assert!(listener.handle_message(chat_message(1, None, &listing(ADDR))).is_some());
    }

    #[tokio::test]
    async fn matches_source_by_username() {
        let coordinator = ShutdownCoordinator::new();
        let sink = Arc::new(RecordingSink::new());
        let listener = ChatListener::new(
            ScriptedFeed::new(vec![]),
            parse_sources("@NewListingsFeed"),
            pipeline(sink, &coordinator),
            coordinator.token(),
        );
        let msg = chat_message(-100, Some("newlistingsfeed"), &listing(ADDR));
        assert!(listener.handle_message(msg).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_feed_in_order_and_dedups() {
        let coordinator = ShutdownCoordinator::new();
        let sink = Arc::new(RecordingSink::new());
        let other = "0x1234567890123456789012345678901234567890";
        let feed = ScriptedFeed::new(vec![
            Ok(chat_message(1, None, &listing(ADDR))),
            Err(anyhow::anyhow!("flaky network")),
            Ok(chat_message(1, None, &format!("live on binance alpha\nsource: {ADDR} (bsc)"))),
            Ok(chat_message(1, None, &format!("$X live on Binance alpha\nsource: {other} (bsc)"))),
        ]);
        let pipeline = pipeline(sink.clone(), &coordinator);
        let listener = ChatListener::new(feed, vec![ChatTarget::Id(1)], pipeline.clone(), coordinator.token());

        listener.run().await;
        // Let the last buy task run before tearing down.
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.shutdown();
        coordinator.wait().await;

        assert_eq!(
            sink.delivered(),
            vec![format!("/buy {ADDR} 0.1"), format!("/buy {other} 0.1")]
        );
        let summary = pipeline.stats().summary(vec![]);
        assert_eq!(summary.signals_seen, 3);
        assert_eq!(summary.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        struct Pending;

        #[async_trait]
        impl ChatFeed for Pending {
            async fn next_message(&mut self) -> Result<Option<ChatMessage>> {
                std::future::pending().await
            }
        }

        let coordinator = ShutdownCoordinator::new();
        let listener = ChatListener::new(
            Pending,
            vec![ChatTarget::Id(1)],
            pipeline(Arc::new(RecordingSink::new()), &coordinator),
            coordinator.token(),
        );
        let handle = coordinator.spawn("chat", listener.run());
        coordinator.shutdown();
        coordinator.wait().await;
        handle.await.unwrap();
    }
}
