use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::ContractAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimState {
    /// Claimed, buy dispatch in flight.
    Pending,
    /// Buy dispatched successfully. Never leaves this state.
    Dispatched,
}

/// Process-lifetime record of contract addresses already acted upon.
///
/// Claims are taken before sending (`try_claim`), so two listeners racing on
/// the same address can never both dispatch. A claim becomes permanent with
/// `confirm` after the buy is delivered; a failed buy `release`s it so a later
/// announcement may try again. Dispatched entries are never removed.
#[derive(Debug, Default)]
pub struct DedupStore {
    entries: Mutex<HashMap<ContractAddress, ClaimState>>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically reserve `address`. Returns `false` if it is already pending
    /// or dispatched; the caller must skip it.
    pub fn try_claim(&self, address: &ContractAddress) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(address) {
            return false;
        }
        entries.insert(address.clone(), ClaimState::Pending);
        true
    }

    /// Record a successful buy for a claimed address.
    pub fn confirm(&self, address: &ContractAddress) {
        self.lock().insert(address.clone(), ClaimState::Dispatched);
    }

    /// Drop a pending claim after a failed buy. Dispatched entries are kept.
    pub fn release(&self, address: &ContractAddress) {
        let mut entries = self.lock();
        if entries.get(address) == Some(&ClaimState::Pending) {
            entries.remove(address);
        }
    }

    /// Whether a buy has been successfully dispatched for `address`.
    pub fn is_dispatched(&self, address: &ContractAddress) -> bool {
        self.lock().get(address) == Some(&ClaimState::Dispatched)
    }

    /// Addresses with a confirmed buy, sorted for stable output.
    pub fn dispatched(&self) -> Vec<ContractAddress> {
        let mut out: Vec<ContractAddress> = self
            .lock()
            .iter()
            .filter(|(_, s)| **s == ClaimState::Dispatched)
            .map(|(a, _)| a.clone())
            .collect();
        out.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ContractAddress, ClaimState>> {
        // Every mutation is a single insert/remove, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
