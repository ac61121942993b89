use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{
    CommandSide, ContractAddress, DispatchEvent, DispatchStatus, ExitSummary, SourceKind,
};

/// Emit a dispatch event as a single JSON line to stdout.
pub fn report_event(event: &DispatchEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{json}");
    }
}

/// Emit the exit summary as pretty-printed JSON to stdout.
pub fn report_exit_summary(summary: &ExitSummary) {
    if let Ok(json) = serde_json::to_string_pretty(summary) {
        println!("{json}");
    }
}

/// Build a dispatch event stamped with the current time.
pub fn dispatch_event(
    side: CommandSide,
    status: DispatchStatus,
    address: &ContractAddress,
    command: &str,
    destination: String,
    source_kind: Option<SourceKind>,
) -> DispatchEvent {
    DispatchEvent {
        timestamp: chrono::Utc::now().to_rfc3339(),
        side,
        status,
        contract_address: address.clone(),
        command: command.to_string(),
        destination,
        source_kind,
    }
}

/// Process-wide activity counters, shared by both listeners and the scheduler.
#[derive(Debug, Default)]
pub struct ActivityStats {
    signals_seen: AtomicU64,
    duplicates_skipped: AtomicU64,
    buys_sent: AtomicU64,
    buys_failed: AtomicU64,
    sells_sent: AtomicU64,
    sells_failed: AtomicU64,
    sells_cancelled: AtomicU64,
}

impl ActivityStats {
    pub fn record_signal(&self) {
        self.signals_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, side: CommandSide, status: DispatchStatus) {
        let counter = match (side, status) {
            (CommandSide::Buy, DispatchStatus::Sent) => &self.buys_sent,
            (CommandSide::Buy, _) => &self.buys_failed,
            (CommandSide::Sell, DispatchStatus::Sent) => &self.sells_sent,
            (CommandSide::Sell, DispatchStatus::Failed) => &self.sells_failed,
            (CommandSide::Sell, DispatchStatus::Cancelled) => &self.sells_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self, dispatched_addresses: Vec<ContractAddress>) -> ExitSummary {
        ExitSummary {
            signals_seen: self.signals_seen.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            buys_sent: self.buys_sent.load(Ordering::Relaxed),
            buys_failed: self.buys_failed.load(Ordering::Relaxed),
            sells_sent: self.sells_sent.load(Ordering::Relaxed),
            sells_failed: self.sells_failed.load(Ordering::Relaxed),
            sells_cancelled: self.sells_cancelled.load(Ordering::Relaxed),
            dispatched_addresses,
        }
    }
}
