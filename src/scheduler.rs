use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatcher::{CommandDispatcher, Delivery, sell_command};
use crate::reporter::{self, ActivityStats};
use crate::shutdown::ShutdownCoordinator;
use crate::types::{ChatTarget, CommandSide, ContractAddress, DispatchStatus};

/// Default delay between a buy and its follow-up sell (15 minutes).
pub const DEFAULT_SELL_DELAY: Duration = Duration::from_secs(900);

/// Default share of the position to sell.
pub const DEFAULT_SELL_PERCENT: u8 = 100;

/// How a scheduled sell ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellOutcome {
    Sent,
    /// Delivery failed after all retries. The sell is abandoned.
    Failed,
    Cancelled,
}

/// Fires one delayed `/sell` per contract address.
///
/// Each scheduled sell runs as a task on the shutdown coordinator and holds
/// a child cancellation token kept in the pending registry until it fires.
#[derive(Clone)]
pub struct SellScheduler {
    dispatcher: CommandDispatcher,
    destination: ChatTarget,
    percent: u8,
    delay: Duration,
    coordinator: ShutdownCoordinator,
    stats: Arc<ActivityStats>,
    pending: Arc<Mutex<HashMap<ContractAddress, CancellationToken>>>,
}

impl SellScheduler {
    pub fn new(
        dispatcher: CommandDispatcher,
        destination: ChatTarget,
        percent: u8,
        delay: Duration,
        coordinator: ShutdownCoordinator,
        stats: Arc<ActivityStats>,
    ) -> Self {
        Self {
            dispatcher,
            destination,
            percent,
            delay,
            coordinator,
            stats,
            pending: Arc::default(),
        }
    }

    /// Schedule with the configured delay.
    pub fn schedule_default(&self, address: ContractAddress) -> JoinHandle<SellOutcome> {
        self.schedule(address, self.delay)
    }

    /// Sleep for `delay`, then send `/sell <address> <percent>%`.
    pub fn schedule(&self, address: ContractAddress, delay: Duration) -> JoinHandle<SellOutcome> {
        let token = self.coordinator.child_token();
        self.lock_pending().insert(address.clone(), token.clone());

        let fire_at = chrono::Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        info!(
            "Auto-sell scheduled: {address} in {}s (at {})",
            delay.as_secs(),
            fire_at.to_rfc3339()
        );

        let dispatcher = self.dispatcher.with_cancel(token.clone());
        let destination = self.destination.clone();
        let percent = self.percent;
        let stats = self.stats.clone();
        let pending = self.pending.clone();
        let name = format!("auto-sell {}", address.short());

        self.coordinator.spawn(&name, async move {
            let command = sell_command(&address, percent);
            let outcome = tokio::select! {
                _ = token.cancelled() => SellOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {
                    info!("Auto-sell firing: {command}");
                    match dispatcher.deliver(&destination, &command, "SELL", None).await {
                        Delivery::Delivered => SellOutcome::Sent,
                        Delivery::Failed => SellOutcome::Failed,
                        Delivery::Cancelled => SellOutcome::Cancelled,
                    }
                }
            };

            let status = match outcome {
                SellOutcome::Sent => DispatchStatus::Sent,
                SellOutcome::Failed => {
                    error!("Auto-sell abandoned for {address}");
                    DispatchStatus::Failed
                }
                SellOutcome::Cancelled => {
                    info!("Auto-sell cancelled: {address}");
                    DispatchStatus::Cancelled
                }
            };

            pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&address);
            stats.record(CommandSide::Sell, status);
            reporter::report_event(&reporter::dispatch_event(
                CommandSide::Sell,
                status,
                &address,
                &command,
                destination.to_string(),
                None,
            ));
            outcome
        })
    }

    /// Cancel one pending sell. Returns `false` if none is pending.
    pub fn cancel(&self, address: &ContractAddress) -> bool {
        match self.lock_pending().get(address) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Addresses with a sell still waiting to fire or in delivery.
    pub fn pending(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<ContractAddress, CancellationToken>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::dispatcher::{MAX_SEND_ATTEMPTS, SEND_RETRY_PAUSE};
    use crate::testing::{RecordingSink, addr};

    fn scheduler(sink: Arc<RecordingSink>, coordinator: &ShutdownCoordinator) -> SellScheduler {
        let dispatcher = CommandDispatcher::new(sink, coordinator.token());
        SellScheduler::new(
            dispatcher,
            ChatTarget::Username("GMGN_bsc_bot".into()),
            DEFAULT_SELL_PERCENT,
            DEFAULT_SELL_DELAY,
            coordinator.clone(),
            Arc::new(ActivityStats::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let sink = Arc::new(RecordingSink::new());
        let coordinator = ShutdownCoordinator::new();
        let scheduler = scheduler(sink.clone(), &coordinator);
        let start = Instant::now();

        let handle = scheduler.schedule_default(addr(0xaa));
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(handle.await.unwrap(), SellOutcome::Sent);

        assert_eq!(start.elapsed(), DEFAULT_SELL_DELAY);
        assert_eq!(sink.delivered(), vec![format!("/sell {} 100%", addr(0xaa))]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_delay_and_percent() {
        let sink = Arc::new(RecordingSink::new());
        let coordinator = ShutdownCoordinator::new();
        let scheduler = SellScheduler::new(
            CommandDispatcher::new(sink.clone(), coordinator.token()),
            ChatTarget::Id(5),
            50,
            Duration::from_secs(30),
            coordinator.clone(),
            Arc::new(ActivityStats::default()),
        );
        let start = Instant::now();

        let outcome = scheduler.schedule_default(addr(1)).await.unwrap();
        assert_eq!(outcome, SellOutcome::Sent);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert_eq!(sink.delivered(), vec![format!("/sell {} 50%", addr(1))]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_without_dispatch() {
        let sink = Arc::new(RecordingSink::new());
        let coordinator = ShutdownCoordinator::new();
        let scheduler = scheduler(sink.clone(), &coordinator);

        let handle = scheduler.schedule_default(addr(0xbb));
        tokio::time::sleep(Duration::from_secs(60)).await;
        coordinator.shutdown();
        coordinator.wait().await;

        assert_eq!(handle.await.unwrap(), SellOutcome::Cancelled);
        assert_eq!(sink.attempts(), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_single_sell() {
        let sink = Arc::new(RecordingSink::new());
        let coordinator = ShutdownCoordinator::new();
        let scheduler = scheduler(sink.clone(), &coordinator);

        let keep = scheduler.schedule_default(addr(1));
        let dropped = scheduler.schedule_default(addr(2));
        assert!(scheduler.cancel(&addr(2)));
        assert!(!scheduler.cancel(&addr(3)));

        assert_eq!(dropped.await.unwrap(), SellOutcome::Cancelled);
        assert_eq!(keep.await.unwrap(), SellOutcome::Sent);
        assert_eq!(sink.delivered(), vec![format!("/sell {} 100%", addr(1))]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_is_abandoned() {
        let sink = Arc::new(RecordingSink::failing_first(u32::MAX));
        let coordinator = ShutdownCoordinator::new();
        let scheduler = scheduler(sink.clone(), &coordinator);
        let start = Instant::now();

        let outcome = scheduler.schedule_default(addr(1)).await.unwrap();
        assert_eq!(outcome, SellOutcome::Failed);
        assert_eq!(sink.attempts(), MAX_SEND_ATTEMPTS);
        assert_eq!(start.elapsed(), DEFAULT_SELL_DELAY + SEND_RETRY_PAUSE * 2);

        // Nothing is rescheduled.
        tokio::time::sleep(DEFAULT_SELL_DELAY * 2).await;
        assert_eq!(sink.attempts(), MAX_SEND_ATTEMPTS);
    }
}
