//! Chat platform adapters.
//!
//! A [`Channel`] is the only place platform payloads exist: it turns updates
//! into [`ChannelMessage`]s and renders [`Render`](crate::console::Render)
//! views back out. Callback tokens are parsed here and nowhere else.

pub mod telegram;
pub mod traits;

pub use telegram::TelegramChannel;
pub use traits::{Channel, ChannelMessage, ReplyTarget};

use crate::config::BotConfig;
use std::sync::Arc;

/// Factory: build the configured chat channel.
pub fn create_channel(config: &BotConfig) -> anyhow::Result<Arc<dyn Channel>> {
    Ok(Arc::new(TelegramChannel::from_config(config)?))
}
