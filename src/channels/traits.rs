use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::console::{InboundEvent, Render};
use crate::sessions::SessionKey;

/// Where a rendered view should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTarget {
    pub chat_id: i64,
    /// Set for button presses: the message carrying the pressed keyboard.
    pub edit_message_id: Option<i64>,
}

/// A platform event already translated into console terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub key: SessionKey,
    pub event: InboundEvent,
    pub reply: ReplyTarget,
}

/// Core chat channel trait: receive operator events, deliver rendered views.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Deliver a view to the operator.
    async fn send(&self, target: ReplyTarget, render: &Render) -> Result<()>;

    /// Receive events until the receiver side closes (long-running).
    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> Result<()>;

    /// Check if the channel is healthy.
    async fn health_check(&self) -> bool {
        true
    }
}
