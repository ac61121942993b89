pub mod chat;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod extractor;
pub mod pipeline;
pub mod reporter;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod stream;
pub mod telegram;
pub mod types;

#[cfg(test)]
mod testing;

/// Telegram Bot API base URL
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Default websocket endpoint for the structured listing feed
pub const DEFAULT_STREAM_URL: &str = "wss://news.treeofalpha.com/ws";
