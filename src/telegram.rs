use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::TELEGRAM_API_BASE;
use crate::chat::{ChatFeed, ChatMessage};
use crate::dispatcher::CommandSink;
use crate::types::ChatTarget;

/// Server-side long-poll window for `getUpdates`.
const LONG_POLL_SECS: u64 = 30;

/// HTTP timeout; must outlast the long poll.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(LONG_POLL_SECS + 15);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
    channel_post: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    from: Option<TgUser>,
    text: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    username: Option<String>,
}

/// Subset of the `getChat` result used for startup checks.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatInfo {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    username: Option<String>,
}

/// Telegram Bot API client. Cheap to clone.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    bot_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base(TELEGRAM_API_BASE, token)
    }

    pub fn with_base(base: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            bot_url: format!("{}/bot{token}", base.trim_end_matches('/')),
        })
    }

    /// Long-polling feed of new messages and channel posts. Updates queued
    /// before the first poll are discarded.
    pub fn feed(&self) -> TelegramFeed {
        TelegramFeed {
            client: self.clone(),
            offset: None,
            buffered: VecDeque::new(),
        }
    }

    /// Resolve a chat the bot can see.
    pub async fn get_chat(&self, target: &ChatTarget) -> Result<ChatInfo> {
        self.call("getChat", &json!({ "chat_id": chat_id_value(target) }))
            .await
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let resp: ApiResponse<T> = self
            .http
            .post(format!("{}/{method}", self.bot_url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?
            .json()
            .await
            .with_context(|| format!("{method} response was not valid JSON"))?;

        if !resp.ok {
            anyhow::bail!(
                "{method} rejected: {}",
                resp.description.unwrap_or_else(|| "no description".into())
            );
        }
        resp.result
            .with_context(|| format!("{method} returned no result"))
    }
}

#[async_trait]
impl CommandSink for TelegramClient {
    async fn send_text(
        &self,
        destination: &ChatTarget,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<()> {
        let body = send_message_body(destination, text, reply_to);
        let _: Value = self.call("sendMessage", &body).await?;
        Ok(())
    }
}

/// Buffered `getUpdates` long poll.
pub struct TelegramFeed {
    client: TelegramClient,
    /// Next update id to request; `None` until the backlog is skipped.
    offset: Option<i64>,
    buffered: VecDeque<ChatMessage>,
}

impl TelegramFeed {
    /// Jump past everything queued while the process was down. Offset `-1`
    /// returns only the newest update and forgets the rest.
    async fn skip_backlog(&mut self) -> Result<i64> {
        let body = json!({
            "offset": -1,
            "timeout": 0,
            "allowed_updates": ["message", "channel_post"],
        });
        let latest: Vec<Update> = self.client.call("getUpdates", &body).await?;
        let next = match latest.last() {
            Some(update) => {
                info!("Skipping chat backlog through update {}", update.update_id);
                update.update_id + 1
            }
            None => 0,
        };
        self.offset = Some(next);
        Ok(next)
    }
}

#[async_trait]
impl ChatFeed for TelegramFeed {
    async fn next_message(&mut self) -> Result<Option<ChatMessage>> {
        loop {
            if let Some(message) = self.buffered.pop_front() {
                return Ok(Some(message));
            }

            let offset = match self.offset {
                Some(offset) => offset,
                None => self.skip_backlog().await?,
            };
            let body = json!({
                "offset": offset,
                "timeout": LONG_POLL_SECS,
                "allowed_updates": ["message", "channel_post"],
            });
            let updates: Vec<Update> = self.client.call("getUpdates", &body).await?;
            debug!("getUpdates returned {} update(s)", updates.len());

            let mut next = offset;
            for update in updates {
                next = next.max(update.update_id + 1);
                if let Some(message) = into_chat_message(update) {
                    self.buffered.push_back(message);
                }
            }
            self.offset = Some(next);
        }
    }
}

fn chat_id_value(target: &ChatTarget) -> Value {
    match target {
        ChatTarget::Id(id) => json!(id),
        ChatTarget::Username(name) => json!(format!("@{name}")),
    }
}

fn send_message_body(destination: &ChatTarget, text: &str, reply_to: Option<i64>) -> Value {
    let mut body = json!({
        "chat_id": chat_id_value(destination),
        "text": text,
    });
    if let Some(message_id) = reply_to {
        body["reply_to_message_id"] = json!(message_id);
    }
    body
}

/// Text messages and captioned media; anything without text is dropped.
fn into_chat_message(update: Update) -> Option<ChatMessage> {
    let msg = update.message.or(update.channel_post)?;
    let text = msg.text.or(msg.caption)?;
    let sender = msg
        .from
        .map(|u| u.username.unwrap_or_else(|| u.id.to_string()));
    Some(ChatMessage {
        chat_id: msg.chat.id,
        chat_username: msg.chat.username,
        message_id: msg.message_id,
        sender,
        text,
    })
}
