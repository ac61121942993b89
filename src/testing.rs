//! In-crate fakes for the transport seams.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::chat::{ChatFeed, ChatMessage};
use crate::dispatcher::CommandSink;
use crate::types::{ChatTarget, ContractAddress};

/// Deterministic address built from one repeated byte.
pub fn addr(byte: u8) -> ContractAddress {
    ContractAddress::parse(&format!("0x{}", format!("{byte:02x}").repeat(20)))
        .expect("valid test address")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub destination: ChatTarget,
    pub text: String,
    pub reply_to: Option<i64>,
}

/// Records every delivered command; fails the first `fail_first` attempts.
#[derive(Default)]
pub struct RecordingSink {
    fail_first: u32,
    latency: Duration,
    attempts: AtomicU32,
    sent: Mutex<Vec<SentCommand>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_first: n,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<String> {
        self.sent().into_iter().map(|c| c.text).collect()
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn send_text(
        &self,
        destination: &ChatTarget,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if attempt <= self.fail_first {
            anyhow::bail!("simulated delivery failure #{attempt}");
        }
        self.sent.lock().unwrap().push(SentCommand {
            destination: destination.clone(),
            text: text.to_string(),
            reply_to,
        });
        Ok(())
    }
}

/// Replays a fixed list of messages, then reports end of feed.
pub struct ScriptedFeed {
    messages: VecDeque<Result<ChatMessage>>,
}

impl ScriptedFeed {
    pub fn new(messages: Vec<Result<ChatMessage>>) -> Self {
        Self {
            messages: messages.into(),
        }
    }
}

#[async_trait]
impl ChatFeed for ScriptedFeed {
    async fn next_message(&mut self) -> Result<Option<ChatMessage>> {
        match self.messages.pop_front() {
            Some(Ok(m)) => Ok(Some(m)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

pub fn chat_message(chat_id: i64, username: Option<&str>, text: &str) -> ChatMessage {
    ChatMessage {
        chat_id,
        chat_username: username.map(str::to_string),
        message_id: 1,
        sender: None,
        text: text.to_string(),
    }
}
