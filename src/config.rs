use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use rust_decimal::Decimal;
use url::Url;

use crate::DEFAULT_STREAM_URL;
use crate::chat::parse_sources;
use crate::types::ChatTarget;

/// Runtime configuration. Every flag can also be set from the environment
/// (or a `.env` file loaded before parsing).
#[derive(Parser, Clone)]
#[command(
    name = "listing-sniper",
    about = "Exchange listing signal sniper",
    args_override_self = true
)]
pub struct AppConfig {
    /// Comma-separated chat ids or @usernames to watch for announcements
    #[arg(long, env = "SOURCE_BOT_ID", allow_hyphen_values = true)]
    pub source_bot_id: String,

    /// Chat id or @username that receives /buy and /sell commands
    #[arg(long, env = "TARGET_BOT_ID", allow_hyphen_values = true)]
    pub target_bot_id: String,

    /// Bot API token for the chat transport
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: String,

    /// Amount placed in every /buy command
    #[arg(long, env = "GMGN_BUY_AMOUNT", default_value = "0.1")]
    pub buy_amount: Decimal,

    /// Seconds between a successful buy and its follow-up sell
    #[arg(long, env = "AUTO_SELL_DELAY", default_value_t = 900)]
    pub auto_sell_delay: u64,

    /// Share of the position to sell (1-100)
    #[arg(long, env = "AUTO_SELL_PERCENT", default_value_t = 100)]
    pub auto_sell_percent: u8,

    /// Schedule follow-up sells at all
    #[arg(
        long,
        env = "AUTO_SELL_ENABLED",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub auto_sell_enabled: bool,

    /// Run the websocket stream listener alongside the chat listener
    #[arg(
        long,
        env = "STREAM_ENABLED",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub stream_enabled: bool,

    /// Bearer credential for the stream feed
    #[arg(long, env = "STREAM_API_KEY", hide_env_values = true)]
    pub stream_api_key: Option<String>,

    /// Stream feed endpoint
    #[arg(long, env = "STREAM_URL", default_value = DEFAULT_STREAM_URL)]
    pub stream_url: Url,
}

impl AppConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.buy_amount <= Decimal::ZERO {
            anyhow::bail!("GMGN_BUY_AMOUNT must be positive (got {})", self.buy_amount);
        }
        if !(1..=100).contains(&self.auto_sell_percent) {
            anyhow::bail!(
                "AUTO_SELL_PERCENT must be between 1 and 100 (got {})",
                self.auto_sell_percent
            );
        }
        if self.sources().is_empty() {
            anyhow::bail!("SOURCE_BOT_ID must name at least one chat");
        }
        self.destination()?;
        if self.telegram_bot_token.trim().is_empty() {
            anyhow::bail!("TELEGRAM_BOT_TOKEN is empty");
        }
        Ok(())
    }

    pub fn sources(&self) -> Vec<ChatTarget> {
        parse_sources(&self.source_bot_id)
    }

    pub fn destination(&self) -> Result<ChatTarget> {
        ChatTarget::parse(&self.target_bot_id).context("TARGET_BOT_ID is empty")
    }

    /// Whether the destination is addressed as a bot account. The Bot API
    /// refuses bot-to-bot messages, so such a destination never receives
    /// commands.
    pub fn destination_is_bot(&self) -> bool {
        matches!(
            self.destination(),
            Ok(ChatTarget::Username(name)) if name.to_ascii_lowercase().ends_with("bot")
        )
    }

    pub fn sell_delay(&self) -> Duration {
        Duration::from_secs(self.auto_sell_delay)
    }

    /// Non-blank stream credential, if one was supplied.
    pub fn stream_credential(&self) -> Option<&str> {
        self.stream_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, FromArgMatches};
    use rust_decimal_macros::dec;

    use super::*;

    /// Parse from `args` alone, ignoring the process environment.
    fn try_parse(args: &[&str]) -> clap::error::Result<AppConfig> {
        let matches = AppConfig::command()
            .mut_args(|arg| arg.env(None::<&'static str>))
            .try_get_matches_from(args)?;
        AppConfig::from_arg_matches(&matches)
    }

    fn parse(extra: &[&str]) -> AppConfig {
        let mut args = vec![
            "listing-sniper",
            "--source-bot-id",
            "@NewListingsFeed",
            "--target-bot-id",
            "@GMGN_bsc_bot",
            "--telegram-bot-token",
            "123:abc",
        ];
        args.extend_from_slice(extra);
        try_parse(&args).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]);
        assert_eq!(config.buy_amount, dec!(0.1));
        assert_eq!(config.sell_delay(), Duration::from_secs(900));
        assert_eq!(config.auto_sell_percent, 100);
        assert!(config.auto_sell_enabled);
        assert!(!config.stream_enabled);
        assert_eq!(config.stream_url.as_str(), DEFAULT_STREAM_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sources_and_destination() {
        let config = parse(&["--source-bot-id", "-1001, @feed,-1001"]);
        assert_eq!(
            config.sources(),
            vec![ChatTarget::Id(-1001), ChatTarget::Username("feed".into())]
        );
        assert_eq!(
            config.destination().unwrap(),
            ChatTarget::Username("GMGN_bsc_bot".into())
        );

        let config = parse(&["--target-bot-id", "-42"]);
        assert_eq!(config.destination().unwrap(), ChatTarget::Id(-42));
    }

    #[test]
    fn boolish_flags() {
        let config = parse(&["--auto-sell-enabled", "no", "--stream-enabled", "1"]);
        assert!(!config.auto_sell_enabled);
        assert!(config.stream_enabled);

        let config = parse(&["--auto-sell-enabled", "false", "--stream-enabled", "true"]);
        assert!(!config.auto_sell_enabled);
        assert!(config.stream_enabled);

        let config = parse(&["--auto-sell-enabled=yes", "--stream-enabled=off"]);
        assert!(config.auto_sell_enabled);
        assert!(!config.stream_enabled);
    }

    #[test]
    fn env_is_ignored_by_test_parser() {
        // Required values must come from args; a missing one is an error
        // even if the variable is exported in the developer's shell.
        assert!(try_parse(&["x", "--target-bot-id", "1", "--telegram-bot-token", "t"]).is_err());
    }

    #[test]
    fn bot_destination_detected() {
        assert!(parse(&[]).destination_is_bot());
        assert!(parse(&["--target-bot-id", "@SomeTradeBOT"]).destination_is_bot());
        assert!(!parse(&["--target-bot-id", "-1001234"]).destination_is_bot());
        assert!(!parse(&["--target-bot-id", "@sniper_group"]).destination_is_bot());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&["--buy-amount", "0"]).validate().is_err());
        assert!(parse(&["--auto-sell-percent", "0"]).validate().is_err());
        assert!(parse(&["--auto-sell-percent", "101"]).validate().is_err());
        assert!(parse(&["--source-bot-id", " , "]).validate().is_err());
        assert!(parse(&["--target-bot-id", " "]).validate().is_err());
        assert!(try_parse(&["x", "--buy-amount", "lots"]).is_err());
    }

    #[test]
    fn blank_stream_key_is_absent() {
        assert_eq!(parse(&[]).stream_credential(), None);
        assert_eq!(parse(&["--stream-api-key", "  "]).stream_credential(), None);
        assert_eq!(
            parse(&["--stream-api-key", "secret"]).stream_credential(),
            Some("secret")
        );
    }
}
