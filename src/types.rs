use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A `0x`-prefixed hex token contract address, case preserved as captured.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractAddress(String);

impl ContractAddress {
    /// Minimum number of hex digits after the `0x` prefix.
    pub const MIN_HEX_DIGITS: usize = 40;

    /// Validate and wrap an address. Returns `None` for anything that is not
    /// `0x` followed by at least 40 hex digits.
    pub fn parse(raw: &str) -> Option<Self> {
        let hex = raw.strip_prefix("0x")?;
        if hex.len() < Self::MIN_HEX_DIGITS || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines: `0x1234..abcd`.
    pub fn short(&self) -> String {
        let s = &self.0;
        format!("{}..{}", &s[..6], &s[s.len() - 4..])
    }
}

impl fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which rule recognized a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Wallet-listing URL in chat text.
    ChatUrl,
    /// "live on binance alpha" keyword plus `source:` field in chat text.
    ChatKeyword,
    /// Structured event from the stream feed.
    Stream,
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::ChatUrl => "chat/url",
            SourceKind::ChatKeyword => "chat/keyword",
            SourceKind::Stream => "stream",
        }
    }
}

/// Result of a successful extraction: the address and the rule that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub address: ContractAddress,
    pub kind: SourceKind,
}

/// Where a signal came from, for the detection log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOrigin {
    Chat { chat_id: i64, message_id: i64 },
    Stream { frame_len: usize },
}

impl fmt::Display for RawOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawOrigin::Chat {
                chat_id,
                message_id,
            } => write!(f, "chat {chat_id} message {message_id}"),
            RawOrigin::Stream { frame_len } => write!(f, "stream frame of {frame_len} bytes"),
        }
    }
}

/// A recognized announcement. Immutable once produced.
#[derive(Debug, Clone)]
pub struct Signal {
    pub contract_address: ContractAddress,
    pub source_kind: SourceKind,
    pub raw_origin: RawOrigin,
    pub observed_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(extraction: Extraction, raw_origin: RawOrigin) -> Self {
        Self {
            contract_address: extraction.address,
            source_kind: extraction.kind,
            raw_origin,
            observed_at: Utc::now(),
        }
    }
}

/// A chat peer, addressed either by numeric id or by username.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatTarget {
    Id(i64),
    Username(String),
}

impl ChatTarget {
    /// Resolve a config entry: integers become ids, anything else a username
    /// (leading `@` stripped).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(id) = raw.parse::<i64>() {
            return Some(ChatTarget::Id(id));
        }
        let name = raw.strip_prefix('@').unwrap_or(raw);
        if name.is_empty() {
            return None;
        }
        Some(ChatTarget::Username(name.to_string()))
    }

    /// Whether a chat with this id and optional username is this target.
    pub fn matches(&self, chat_id: i64, username: Option<&str>) -> bool {
        match self {
            ChatTarget::Id(id) => *id == chat_id,
            ChatTarget::Username(name) => {
                username.is_some_and(|u| u.trim_start_matches('@').eq_ignore_ascii_case(name))
            }
        }
    }
}

impl fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatTarget::Id(id) => write!(f, "{id}"),
            ChatTarget::Username(name) => write!(f, "@{name}"),
        }
    }
}

/// Buy or sell command side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandSide {
    Buy,
    Sell,
}

/// Terminal outcome of a dispatch, as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Sent,
    Failed,
    Cancelled,
}

/// One JSON line per dispatch outcome.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchEvent {
    pub timestamp: String,
    pub side: CommandSide,
    pub status: DispatchStatus,
    pub contract_address: ContractAddress,
    pub command: String,
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<SourceKind>,
}

/// Counters printed when the process exits.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExitSummary {
    pub signals_seen: u64,
    pub duplicates_skipped: u64,
    pub buys_sent: u64,
    pub buys_failed: u64,
    pub sells_sent: u64,
    pub sells_failed: u64,
    pub sells_cancelled: u64,
    pub dispatched_addresses: Vec<ContractAddress>,
}
