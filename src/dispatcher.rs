use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::retry::{self, RetryOutcome, RetryPolicy};
use crate::types::{ChatTarget, ContractAddress};

/// Maximum delivery attempts per command.
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// Pause between delivery attempts.
pub const SEND_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Outbound text channel to the trading agent.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Deliver `text` to `destination`, optionally as a reply to `reply_to`.
    async fn send_text(
        &self,
        destination: &ChatTarget,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<()>;
}

/// `/buy <address> <amount>`
pub fn buy_command(address: &ContractAddress, amount: Decimal) -> String {
    format!("/buy {address} {}", amount.normalize())
}

/// `/sell <address> <percent>%`
pub fn sell_command(address: &ContractAddress, percent: u8) -> String {
    format!("/sell {address} {percent}%")
}

/// Terminal result of one command delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Failed,
    Cancelled,
}

/// Sends commands with bounded retry.
///
/// Retries are not idempotent at the transport: a send that timed out after
/// the agent actually received it will be repeated.
#[derive(Clone)]
pub struct CommandDispatcher {
    sink: Arc<dyn CommandSink>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl CommandDispatcher {
    pub fn new(sink: Arc<dyn CommandSink>, cancel: CancellationToken) -> Self {
        Self {
            sink,
            policy: RetryPolicy::bounded(MAX_SEND_ATTEMPTS, SEND_RETRY_PAUSE),
            cancel,
        }
    }

    /// Same sink and policy, observing a different cancellation token.
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Deliver `command` and report whether it went through.
    pub async fn send(&self, destination: &ChatTarget, command: &str, description: &str) -> bool {
        self.deliver(destination, command, description, None).await == Delivery::Delivered
    }

    /// Deliver `command`, distinguishing failure from cancellation.
    pub async fn deliver(
        &self,
        destination: &ChatTarget,
        command: &str,
        description: &str,
        reply_to: Option<i64>,
    ) -> Delivery {
        let label = format!("{description} send to {destination}");
        let outcome = retry::run(&self.policy, &self.cancel, &label, |_| {
            self.sink.send_text(destination, command, reply_to)
        })
        .await;

        match outcome {
            RetryOutcome::Succeeded { attempts, .. } => {
                info!("{description} delivered to {destination} (attempt {attempts}): '{command}'");
                Delivery::Delivered
            }
            RetryOutcome::Exhausted { attempts, last_error } => {
                error!(
                    "{description} to {destination} failed after {attempts} attempt(s): {last_error:#}"
                );
                Delivery::Failed
            }
            RetryOutcome::Cancelled { attempts } => {
                warn!("{description} to {destination} cancelled after {attempts} attempt(s)");
                Delivery::Cancelled
            }
        }
    }
}
