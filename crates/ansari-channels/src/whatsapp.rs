//! WhatsApp Business Cloud API channel.

use async_trait::async_trait;
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{error, info};

use ansari_core::config::WhatsAppConfig;

use crate::{Channel, ChannelHandle, InboundQuery, InboundReceiver, SendResult};

pub struct WhatsAppChannel {
    config: WhatsAppConfig,
    access_token: String,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(config: WhatsAppConfig) -> anyhow::Result<Self> {
        let access_token = config
            .resolve_access_token()
            .ok_or_else(|| anyhow::anyhow!("WhatsApp access token not configured"))?;
        Ok(Self {
            config,
            access_token,
            client: reqwest::Client::new(),
        })
    }
}

/// Parse an inbound WhatsApp webhook payload into (from, text) pairs.
pub fn parse_webhook_messages(body: &serde_json::Value) -> Vec<(String, String)> {
    let mut messages = Vec::new();

    if let Some(entries) = body.get("entry").and_then(|v| v.as_array()) {
        for entry in entries {
            if let Some(changes) = entry.get("changes").and_then(|v| v.as_array()) {
                for change in changes {
                    if let Some(msgs) = change
                        .get("value")
                        .and_then(|v| v.get("messages"))
                        .and_then(|v| v.as_array())
                    {
                        for msg in msgs {
                            let from = msg
                                .get("from")
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .to_string();
                            let text = msg
                                .get("text")
                                .and_then(|v| v.get("body"))
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .to_string();
                            if !from.is_empty() && !text.is_empty() {
                                messages.push((from, text));
                            }
                        }
                    }
                }
            }
        }
    }

    messages
}

/// Verify Meta webhook signature (HMAC-SHA256).
pub fn verify_signature(payload: &[u8], signature: &str, app_secret: &str) -> bool {
    use hmac::{Hmac, Mac};
    let expected = signature.strip_prefix("sha256=").unwrap_or(signature);

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    let result = hex::encode(mac.finalize().into_bytes());

    result == expected
}

/// Answer the Meta subscription handshake: echo the challenge when the
/// verify token matches, an empty body otherwise.
pub fn verify_challenge(
    params: &std::collections::HashMap<String, String>,
    verify_token: &str,
) -> String {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or("");
    let token = params
        .get("hub.verify_token")
        .map(String::as_str)
        .unwrap_or("");
    if mode == "subscribe" && token == verify_token {
        params
            .get("hub.challenge")
            .cloned()
            .unwrap_or_default()
    } else {
        String::new()
    }
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn id(&self) -> &str {
        "whatsapp"
    }

    async fn start(&self) -> anyhow::Result<(InboundReceiver, ChannelHandle)> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundQuery>();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let verify_token = self.config.verify_token.clone().unwrap_or_default();
        let app_secret = self.config.resolve_app_secret();
        let port = self.config.webhook_port;

        tokio::spawn(async move {
            info!(port, "WhatsApp webhook listener starting");

            let app = axum::Router::new()
                .route(
                    "/webhook",
                    axum::routing::get(
                        move |axum::extract::Query(params): axum::extract::Query<
                            std::collections::HashMap<String, String>,
                        >| {
                            let token = verify_token.clone();
                            async move { verify_challenge(&params, &token) }
                        },
                    ),
                )
                .route(
                    "/webhook",
                    axum::routing::post(
                        move |headers: axum::http::HeaderMap, body: axum::body::Bytes| {
                            let tx = inbound_tx.clone();
                            let secret = app_secret.clone();
                            async move {
                                if let Some(ref secret) = secret {
                                    let signature = headers
                                        .get("x-hub-signature-256")
                                        .and_then(|v| v.to_str().ok())
                                        .unwrap_or("");
                                    if !verify_signature(&body, signature, secret) {
                                        error!("WhatsApp webhook signature mismatch, dropping payload");
                                        return "OK";
                                    }
                                }
                                if let Ok(payload) =
                                    serde_json::from_slice::<serde_json::Value>(&body)
                                {
                                    for (from, text) in parse_webhook_messages(&payload) {
                                        let _ = tx.send(InboundQuery {
                                            channel: "whatsapp".into(),
                                            sender_id: from.clone(),
                                            chat_id: from,
                                            text,
                                        });
                                    }
                                }
                                "OK"
                            }
                        },
                    ),
                );

            let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await {
                Ok(l) => l,
                Err(e) => {
                    error!(%e, "Failed to bind WhatsApp webhook port");
                    return;
                }
            };

            tokio::select! {
                _ = axum::serve(listener, app) => {}
                _ = shutdown_rx => {
                    info!("WhatsApp channel stopped");
                }
            }
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

        let phone_number_id = self
            .config
            .phone_number_id
            .clone()
            .unwrap_or_default();
        let resp = self
            .client
            .post(format!(
                "https://graph.facebook.com/v21.0/{phone_number_id}/messages"
            ))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "messaging_product": "whatsapp",
                "to": chat_id,
                "type": "text",
                "text": { "body": text }
            }))
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => Ok(SendResult {
                success: true,
                error: None,
            }),
            Ok(r) => {
                let status = r.status();
                let body = r.text().await.unwrap_or_default();
                error!(%status, body, "WhatsApp send failed");
                Ok(SendResult {
                    success: false,
                    error: Some(format!("WhatsApp API error {status}")),
                })
            }
            Err(e) => Ok(SendResult {
                success: false,
                error: Some(e.to_string()),
            }),
        }
    }
}
