//! Discord channel.
//!
//! Send-side presenter over the Discord HTTP API. Inbound traffic arrives
//! through a bot gateway process that posts into `/webhook` on the HTTP API
//! side, so this channel only delivers answers.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info};

use ansari_core::config::DiscordConfig;

use crate::{Channel, ChannelHandle, InboundQuery, InboundReceiver, SendResult};

pub struct DiscordChannel {
    bot_token: String,
    allowed_channels: Vec<String>,
    client: reqwest::Client,
}

impl DiscordChannel {
    pub fn new(config: &DiscordConfig) -> anyhow::Result<Self> {
        let bot_token = config
            .resolve_bot_token()
            .ok_or_else(|| anyhow::anyhow!("Discord bot token not configured"))?;
        Ok(Self {
            bot_token,
            allowed_channels: config.allowed_channels.clone(),
            client: reqwest::Client::new(),
        })
    }

    pub fn channel_allowed(&self, chat_id: &str) -> bool {
        self.allowed_channels.is_empty() || self.allowed_channels.iter().any(|c| c == chat_id)
    }
}

/// Split a message at Discord's 2000-char limit, preferring line breaks.
pub fn split_discord_message(text: &str) -> Vec<String> {
    const MAX_LEN: usize = 2000;
    if text.len() <= MAX_LEN {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= MAX_LEN {
            chunks.push(remaining.to_string());
            break;
        }
        let split_at = remaining[..MAX_LEN].rfind('\n').unwrap_or(MAX_LEN);
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches('\n');
    }
    chunks
}

#[async_trait]
impl Channel for DiscordChannel {
    fn id(&self) -> &str {
        "discord"
    }

    async fn start(&self) -> anyhow::Result<(InboundReceiver, ChannelHandle)> {
        let (_inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundQuery>();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            info!("Discord channel started (send-only)");
            let _ = shutdown_rx.await;
            info!("Discord channel stopped");
        });

        Ok((inbound_rx, ChannelHandle::new(shutdown_tx)))
    }

    async fn send(&self, chat_id: &str, text: &str) -> anyhow::Result<SendResult> {
        if text.is_empty() {
            return Ok(SendResult {
                success: true,
                error: None,
            });
        }
        if !self.channel_allowed(chat_id) {
            return Ok(SendResult {
                success: false,
                error: Some("channel not in allowlist".into()),
            });
        }

        for chunk in split_discord_message(text) {
            let resp = self
                .client
                .post(format!(
                    "https://discord.com/api/v10/channels/{chat_id}/messages"
                ))
                .header("Authorization", format!("Bot {}", self.bot_token))
                .header("Content-Type", "application/json")
                .json(&serde_json::json!({ "content": chunk }))
                .send()
                .await;

            match resp {
                Ok(r) if r.status().is_success() => {}
                Ok(r) => {
                    let status = r.status();
                    let body = r.text().await.unwrap_or_default();
                    error!(%status, body, "Discord send failed");
                    return Ok(SendResult {
                        success: false,
                        error: Some(format!("Discord API error {status}")),
                    });
                }
                Err(e) => {
                    return Ok(SendResult {
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(SendResult {
            success: true,
            error: None,
        })
    }
}
