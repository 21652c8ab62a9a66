//! Minimal Telegram Bot API client: long-poll `getUpdates` plus
//! `sendMessage`, which is all the relay needs.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Hard Telegram limit on one message body.
const MESSAGE_MAX_CHARS: usize = 4096;

/// Slack added on top of the long-poll hold time so the HTTP timeout never
/// fires on a healthy, idle poll.
const POLL_TIMEOUT_SLACK_SECONDS: u64 = 10;

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: String,
    pub poll_timeout_seconds: u64,
    pub request_timeout_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: TELEGRAM_API_BASE.to_string(),
            bot_token: String::new(),
            poll_timeout_seconds: 30,
            request_timeout_ms: 30_000,
        }
    }
}

/// One text message from a chat, already stripped of transport framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorMessage {
    pub chat_id: i64,
    pub text: String,
}

/// Result of one poll: the messages worth handling and the offset to ask for
/// next. The offset advances past every update in the batch, text or not, so
/// skipped updates are never re-delivered.
#[derive(Debug, Default)]
pub struct UpdateBatch {
    pub next_offset: u64,
    pub messages: Vec<OperatorMessage>,
}

pub struct TelegramClient {
    http: Client,
    config: TelegramConfig,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let request_timeout = Duration::from_millis(config.request_timeout_ms);
        let poll_budget = Duration::from_secs(
            config
                .poll_timeout_seconds
                .saturating_add(POLL_TIMEOUT_SLACK_SECONDS),
        );
        let http = Client::builder()
            .timeout(request_timeout.max(poll_budget))
            .build()
            .context("failed to build telegram http client")?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// Long-polls for updates at and after `offset`.
    pub async fn poll_updates(&self, offset: u64) -> Result<UpdateBatch> {
        let response = self
            .http
            .get(self.endpoint("getUpdates"))
            .query(&[
                ("timeout", self.config.poll_timeout_seconds.to_string().as_str()),
                ("offset", offset.to_string().as_str()),
            ])
            .send()
            .await
            .context("telegram getUpdates request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("telegram getUpdates returned status {status}");
        }
        let envelope: UpdatesEnvelope = response
            .json()
            .await
            .context("failed to decode telegram getUpdates response")?;
        if !envelope.ok {
            bail!(
                "telegram getUpdates reported an error: {}",
                envelope.description.unwrap_or_default()
            );
        }

        let mut batch = UpdateBatch {
            next_offset: offset,
            messages: Vec::new(),
        };
        for update in envelope.result {
            batch.next_offset = batch.next_offset.max(update.update_id.saturating_add(1));
            let Some(message) = update.message else {
                continue;
            };
            let Some(text) = message.text else {
                debug!(chat = message.chat.id, "ignoring update without message text");
                continue;
            };
            batch.messages.push(OperatorMessage {
                chat_id: message.chat.id,
                text,
            });
        }
        Ok(batch)
    }

    /// Sends a reply, splitting texts over the platform limit into several
    /// messages at line boundaries where possible.
    pub async fn send_reply(&self, chat_id: i64, text: &str) -> Result<()> {
        for chunk in chunk_message(text, MESSAGE_MAX_CHARS) {
            let response = self
                .http
                .post(self.endpoint("sendMessage"))
                .json(&json!({
                    "chat_id": chat_id,
                    "text": chunk,
                    "disable_web_page_preview": true,
                }))
                .send()
                .await
                .context("telegram sendMessage request failed")?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("telegram sendMessage returned status {status}: {body}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct UpdatesEnvelope {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Vec<UpdateEntry>,
}

#[derive(Debug, Deserialize)]
struct UpdateEntry {
    update_id: u64,
    #[serde(default)]
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    chat: IncomingChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncomingChat {
    id: i64,
}

/// Splits `text` into pieces of at most `max_chars` characters, preferring
/// line boundaries. A single line longer than the limit falls back to a hard
/// character split.
fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.trim().is_empty() || max_chars == 0 {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;
    for line in text.split('\n') {
        let line_chars = line.chars().count();
        if line_chars > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            let mut piece = String::new();
            let mut piece_chars = 0usize;
            for ch in line.chars() {
                piece.push(ch);
                piece_chars += 1;
                if piece_chars == max_chars {
                    chunks.push(std::mem::take(&mut piece));
                    piece_chars = 0;
                }
            }
            current = piece;
            current_chars = piece_chars;
            continue;
        }
        let separator = if current.is_empty() { 0 } else { 1 };
        if current_chars + separator + line_chars > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_chars += 1;
        }
        current.push_str(line);
        current_chars += line_chars;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
