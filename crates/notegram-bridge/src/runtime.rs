//! Long-poll loop wiring the Telegram transport to the command dispatcher.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::dispatcher::CommandDispatcher;
use crate::telegram_api_client::{OperatorMessage, TelegramClient};

const POLL_ERROR_BACKOFF_INITIAL_SECS: u64 = 5;
const POLL_ERROR_BACKOFF_MAX_SECS: u64 = 60;

/// Drives the bridge: polls Telegram, filters for the operator chat, hands
/// each message to the dispatcher, and sends the reply back.
pub struct RelayRuntime {
    client: TelegramClient,
    dispatcher: CommandDispatcher,
    operator_chat_id: i64,
    offset: u64,
}

impl RelayRuntime {
    pub fn new(client: TelegramClient, dispatcher: CommandDispatcher, operator_chat_id: i64) -> Self {
        Self {
            client,
            dispatcher,
            operator_chat_id,
            offset: 0,
        }
    }

    /// Runs until interrupted. Poll failures back off exponentially and
    /// never terminate the loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(operator_chat_id = self.operator_chat_id, "relay running");
        let mut backoff = Duration::from_secs(POLL_ERROR_BACKOFF_INITIAL_SECS);
        loop {
            tokio::select! {
                result = self.run_once() => match result {
                    Ok(()) => {
                        backoff = Duration::from_secs(POLL_ERROR_BACKOFF_INITIAL_SECS);
                    }
                    Err(error) => {
                        warn!(
                            delay_seconds = backoff.as_secs(),
                            "telegram poll failed, backing off: {error:#}"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = tokio::signal::ctrl_c() => {
                                info!("shutdown requested");
                                return Ok(());
                            }
                        }
                        backoff = (backoff * 2).min(Duration::from_secs(POLL_ERROR_BACKOFF_MAX_SECS));
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    /// Polls one batch and handles every message in it.
    pub async fn run_once(&mut self) -> Result<()> {
        let batch = self.client.poll_updates(self.offset).await?;
        self.offset = batch.next_offset;
        for message in batch.messages {
            self.handle_update(message).await;
        }
        Ok(())
    }

    async fn handle_update(&mut self, message: OperatorMessage) {
        if message.chat_id != self.operator_chat_id {
            debug!(chat_id = message.chat_id, "ignoring message from unauthorized chat");
            return;
        }
        let reply = self
            .dispatcher
            .handle_message(message.chat_id, &message.text)
            .await;
        if let Err(error) = self.client.send_reply(message.chat_id, &reply).await {
            warn!("failed to deliver reply: {error:#}");
        }
    }
}
