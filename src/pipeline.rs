use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::info;

use crate::dedup::DedupStore;
use crate::dispatcher::{CommandDispatcher, Delivery, buy_command};
use crate::reporter::{self, ActivityStats};
use crate::scheduler::SellScheduler;
use crate::shutdown::ShutdownCoordinator;
use crate::types::{ChatTarget, CommandSide, DispatchStatus, Signal};

/// Final state of one signal after the buy attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Buy delivered; follow-up sell scheduled if enabled.
    Dispatched,
    /// Buy failed after all retries; the claim was released.
    Failed,
    /// Shutdown interrupted the buy; the claim was released.
    Cancelled,
}

/// Result of handing a signal to the pipeline.
#[derive(Debug)]
pub enum Submission {
    /// Address already claimed by an earlier signal. Nothing was sent.
    Duplicate,
    /// Claim taken; the buy runs as a supervised task.
    Dispatching(JoinHandle<SignalOutcome>),
}

/// Shared path from a recognized signal to buy delivery and sell scheduling,
/// used by both listeners.
#[derive(Clone)]
pub struct SignalPipeline {
    dedup: Arc<DedupStore>,
    dispatcher: CommandDispatcher,
    scheduler: Option<SellScheduler>,
    destination: ChatTarget,
    buy_amount: Decimal,
    coordinator: ShutdownCoordinator,
    stats: Arc<ActivityStats>,
}

impl SignalPipeline {
    pub fn new(
        dedup: Arc<DedupStore>,
        dispatcher: CommandDispatcher,
        scheduler: Option<SellScheduler>,
        destination: ChatTarget,
        buy_amount: Decimal,
        coordinator: ShutdownCoordinator,
        stats: Arc<ActivityStats>,
    ) -> Self {
        Self {
            dedup,
            dispatcher,
            scheduler,
            destination,
            buy_amount,
            coordinator,
            stats,
        }
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn stats(&self) -> &ActivityStats {
        &self.stats
    }

    /// Claim the signal's address and, if this is the first claim, dispatch
    /// the buy on a supervised task.
    ///
    /// The claim is taken synchronously, so signals from one listener are
    /// claimed in arrival order and a race between listeners has one winner.
    pub fn submit(&self, signal: Signal) -> Submission {
        let address = &signal.contract_address;
        self.stats.record_signal();
        info!(
            "Signal via {}: {address} from {} (observed {})",
            signal.source_kind.label(),
            signal.raw_origin,
            signal.observed_at.to_rfc3339()
        );

        if !self.dedup.try_claim(address) {
            info!("Duplicate signal for {address}, skipping");
            self.stats.record_duplicate();
            return Submission::Duplicate;
        }

        let name = format!("buy {}", address.short());
        let this = self.clone();
        Submission::Dispatching(self.coordinator.spawn(&name, async move { this.dispatch(signal).await }))
    }

    async fn dispatch(&self, signal: Signal) -> SignalOutcome {
        let address = signal.contract_address;
        let command = buy_command(&address, self.buy_amount);
        info!("Sending buy command: {command}");

        let delivery = self
            .dispatcher
            .deliver(&self.destination, &command, "BUY", None)
            .await;

        let (outcome, status) = match delivery {
            Delivery::Delivered => {
                self.dedup.confirm(&address);
                (SignalOutcome::Dispatched, DispatchStatus::Sent)
            }
            Delivery::Failed => {
                self.dedup.release(&address);
                (SignalOutcome::Failed, DispatchStatus::Failed)
            }
            Delivery::Cancelled => {
                self.dedup.release(&address);
                (SignalOutcome::Cancelled, DispatchStatus::Cancelled)
            }
        };

        self.stats.record(CommandSide::Buy, status);
        reporter::report_event(&reporter::dispatch_event(
            CommandSide::Buy,
            status,
            &address,
            &command,
            self.destination.to_string(),
            Some(signal.source_kind),
        ));

        if outcome == SignalOutcome::Dispatched {
            if let Some(scheduler) = &self.scheduler {
                scheduler.schedule_default(address);
            }
        }
        outcome
    }
}
