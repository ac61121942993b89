use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::types::{ContractAddress, Extraction, SourceKind};

/// Wallet-listing URL with the token address embedded in the path.
///
/// e.g. `https://www.binance.com/en/binancewallet/0x9769...911c/bsc`
static WALLET_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://www\.binance\.com/en/binancewallet/(0x[a-fA-F0-9]{40,})/bsc")
        .expect("wallet url pattern")
});

/// `source: 0x... (bsc)` field used by keyword-style announcements.
static SOURCE_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)source:\s*(0x[a-f0-9]{40,})\s*\(bsc\)").expect("source field pattern")
});

/// Phrase that gates the keyword rule (matched case-insensitively).
pub const LISTING_KEYWORD: &str = "live on binance alpha";

/// Only events from this exchange are actionable.
pub const TARGET_EXCHANGE: &str = "binance";

/// Only events of this type are actionable.
pub const TARGET_EVENT_TYPE: &str = "alpha";

/// Chain identifier whose detections yield an address.
pub const TARGET_CHAIN: &str = "bsc";

/// One stream-feed frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlphaEvent {
    #[serde(default)]
    pub exchange: String,
    #[serde(default, rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub onchain: Option<OnchainRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OnchainRef {
    #[serde(default)]
    pub chain: String,
    #[serde(default)]
    pub contract: String,
}

/// Run the text rules in priority order.
///
/// The URL rule wins whenever it matches. The keyword rule is only consulted
/// when the URL rule fails, and if the keyword is present but the `source:`
/// field is missing or malformed the result is `None` with no further fallback.
pub fn extract_from_text(text: &str) -> Option<Extraction> {
    if let Some(address) = first_capture(&WALLET_URL_RE, text) {
        return Some(Extraction {
            address,
            kind: SourceKind::ChatUrl,
        });
    }

    if !text.to_lowercase().contains(LISTING_KEYWORD) {
        return None;
    }

    first_capture(&SOURCE_FIELD_RE, text).map(|address| Extraction {
        address,
        kind: SourceKind::ChatKeyword,
    })
}

/// Match a decoded stream event.
///
/// Detections on other chains and detections with an empty or malformed
/// contract are skipped, not treated as errors.
pub fn extract_from_event(event: &AlphaEvent) -> Option<Extraction> {
    if event.exchange != TARGET_EXCHANGE || event.event_type != TARGET_EVENT_TYPE {
        return None;
    }

    event
        .detections
        .iter()
        .filter_map(|d| d.onchain.as_ref())
        .filter(|o| o.chain == TARGET_CHAIN && !o.contract.is_empty())
        .find_map(|o| ContractAddress::parse(o.contract.trim()))
        .map(|address| Extraction {
            address,
            kind: SourceKind::Stream,
        })
}

fn first_capture(re: &Regex, text: &str) -> Option<ContractAddress> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| ContractAddress::parse(m.as_str()))
}
