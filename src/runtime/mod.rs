//! Process runtime: wires the chat channel, per-session lanes, the router and
//! the idle-session sweeper together.

pub mod lanes;

pub use lanes::{spawn_session_sweeper, LaneHandler, SessionLanes};

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::backend::create_resource_client;
use crate::channels::{create_channel, Channel, ChannelMessage};
use crate::config::Config;
use crate::console::{create_router, ConsoleRouter};
use crate::sessions::{create_session_store, SessionKey};

/// Lane workers idle this long retire; a new event starts a fresh one.
const LANE_IDLE: Duration = Duration::from_secs(300);
const INBOUND_BUFFER: usize = 256;

/// Handle one message on its lane: route it, then deliver the view.
pub fn lane_handler(router: Arc<ConsoleRouter>, channel: Arc<dyn Channel>) -> LaneHandler<SessionKey, ChannelMessage> {
    Arc::new(move |key: SessionKey, message: ChannelMessage| {
        let router = Arc::clone(&router);
        let channel = Arc::clone(&channel);
        Box::pin(async move {
            let render = router.handle(key, message.event).await;
            if let Err(err) = channel.send(message.reply, &render).await {
                tracing::warn!(
                    user_id = key.user_id,
                    chat_id = key.chat_id,
                    channel = channel.name(),
                    "failed to deliver view: {err:#}"
                );
            }
        })
    })
}

/// Run the console until the channel stops or the process is interrupted.
pub async fn run(config: Config) -> Result<()> {
    let client = create_resource_client(&config.backend)?;
    let store = create_session_store();
    let router = Arc::new(create_router(&config, client.clone(), client, store.clone()));
    let channel = create_channel(&config.bot)?;

    if !channel.health_check().await {
        tracing::warn!(channel = channel.name(), "channel health check failed; polling anyway");
    }

    let sweeper = spawn_session_sweeper(
        store,
        Duration::from_secs(config.sessions.idle_ttl_secs),
        Duration::from_secs(config.sessions.sweep_interval_secs.max(1)),
    );
    let lanes = SessionLanes::new(lane_handler(router, Arc::clone(&channel)), LANE_IDLE);

    let (tx, mut rx) = mpsc::channel::<ChannelMessage>(INBOUND_BUFFER);
    let listener = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.listen(tx).await })
    };

    tracing::info!(
        channel = channel.name(),
        admins = config.admin_ids.len(),
        backend = %config.backend.base_url,
        "panel console running"
    );

    let outcome = loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => lanes.dispatch(message.key, message),
                None => break None,
            },
            _ = tokio::signal::ctrl_c() => break Some(()),
        }
    };
    sweeper.abort();

    if outcome.is_some() {
        tracing::info!("shutting down");
        listener.abort();
        return Ok(());
    }
    match listener.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.context("chat listener stopped")),
        Err(err) => Err(anyhow!("chat listener task failed: {err}")),
    }
}
