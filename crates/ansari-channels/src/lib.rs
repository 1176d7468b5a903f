//! Presenter adapters.
//!
//! Every messaging surface (WhatsApp, Discord) implements the [`Channel`]
//! trait: it turns platform webhooks into [`InboundQuery`] values and sends
//! the agent's finished answer back out. Presenters are thin — all
//! conversation logic lives in the agent crate.

use async_trait::async_trait;
use tokio::sync::mpsc;

use ansari_core::message::{SourceDoc, render_citations};

pub mod discord;
pub mod whatsapp;

/// A user query arriving from a channel.
#[derive(Debug, Clone)]
pub struct InboundQuery {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub text: String,
}

/// Result of sending a message.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub success: bool,
    pub error: Option<String>,
}

/// Handle to stop a running channel listener.
pub struct ChannelHandle {
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl ChannelHandle {
    pub fn new(shutdown_tx: tokio::sync::oneshot::Sender<()>) -> Self {
        Self { shutdown_tx }
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Receiver for inbound queries from a channel.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundQuery>;

/// Sender half used by channel implementations.
pub type InboundSender = mpsc::UnboundedSender<InboundQuery>;

/// The presenter trait.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Unique channel identifier (e.g., "whatsapp", "discord").
    fn id(&self) -> &str;

    /// Start listening for inbound queries.
    async fn start(&self) -> anyhow::Result<(InboundReceiver, ChannelHandle)>;

    /// Send an answer to a chat on this channel.
    async fn send(&self, chat_id: &str, text: &str) -> anyhow::Result<SendResult>;
}

/// Render the final answer with a trailing citation list when any citable
/// references were gathered during the turn.
pub fn render_answer(answer: &str, references: &[&SourceDoc]) -> String {
    let citations = render_citations(references);
    if citations.is_empty() {
        answer.to_string()
    } else {
        format!("{answer}\n\nSources:\n{citations}")
    }
}
