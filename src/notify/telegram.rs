// src/notify/telegram.rs
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;

use crate::config::TelegramConfig;
use crate::notify::Sink;
use crate::summarize::Summary;

/// Telegram's hard cap on message length.
const MAX_MESSAGE_LEN: usize = 4096;

pub struct TelegramSink {
    bot_token: String,
    chat_id: String,
    enabled: bool,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl TelegramSink {
    pub fn from_config(cfg: &TelegramConfig) -> Self {
        Self {
            bot_token: cfg.bot_token.clone(),
            chat_id: cfg.chat_id.clone(),
            enabled: cfg.enabled && !cfg.bot_token.is_empty() && !cfg.chat_id.is_empty(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }

    /// Truncate to the Telegram limit, preferring a newline boundary near the
    /// cut so the message does not end mid-sentence.
    pub fn truncate_message(message: &str, max_len: usize) -> String {
        if message.chars().count() <= max_len {
            return message.to_string();
        }
        let marker = "\n\n…(truncated)";
        let budget = max_len.saturating_sub(100);
        let mut cut: String = message.chars().take(budget).collect();
        if let Some(pos) = cut.rfind('\n') {
            if pos > budget.saturating_sub(500) {
                cut.truncate(pos);
            }
        }
        cut.push_str(marker);
        cut
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        #[derive(Serialize)]
        struct SendMessage<'a> {
            chat_id: &'a str,
            text: &'a str,
            disable_web_page_preview: bool,
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            disable_web_page_preview: true,
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&url)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("Telegram HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("Telegram request failed: {e}"));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink for TelegramSink {
    async fn deliver(&self, summary: &Summary) -> Result<()> {
        if !self.enabled {
            tracing::debug!("Telegram disabled (missing token/chat or turned off)");
            return Ok(());
        }
        let message = format!("📦 {} update\n\n{}", summary.repo, summary.text);
        let message = Self::truncate_message(&message, MAX_MESSAGE_LEN);
        self.send_text(&message).await
    }

    fn name(&self) -> &'static str {
        "telegram"
    }

    fn only_when_notify(&self) -> bool {
        true
    }
}
