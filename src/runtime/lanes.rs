//! Per-key FIFO lanes.
//!
//! Each key gets its own worker task fed by an unbounded queue, so events for
//! one (user, chat) are handled strictly in arrival order while different keys
//! run concurrently. A worker that stays idle for `idle_timeout` retires; it
//! re-checks its queue under the map lock first, so nothing queued is lost.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::sessions::SessionStore;

pub type LaneHandler<K, T> = Arc<dyn Fn(K, T) -> BoxFuture<'static, ()> + Send + Sync>;

type LaneMap<K, T> = Arc<Mutex<HashMap<K, mpsc::UnboundedSender<T>>>>;

pub struct SessionLanes<K, T> {
    lanes: LaneMap<K, T>,
    handler: LaneHandler<K, T>,
    idle_timeout: Duration,
}

impl<K, T> SessionLanes<K, T>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    T: Send + 'static,
{
    pub fn new(handler: LaneHandler<K, T>, idle_timeout: Duration) -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            handler,
            idle_timeout,
        }
    }

    /// Queue `item` on the lane for `key`, starting a worker if none is live.
    pub fn dispatch(&self, key: K, item: T) {
        let mut lanes = self.lanes.lock();
        let item = match lanes.get(&key) {
            Some(tx) => match tx.send(item) {
                Ok(()) => return,
                Err(mpsc::error::SendError(item)) => item,
            },
            None => item,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(item).is_err() {
            return;
        }
        lanes.insert(key.clone(), tx);
        drop(lanes);

        tracing::debug!(lane = %key, "lane started");
        tokio::spawn(run_lane(
            key,
            rx,
            Arc::clone(&self.lanes),
            Arc::clone(&self.handler),
            self.idle_timeout,
        ));
    }

    /// Number of live lane workers.
    pub fn active(&self) -> usize {
        self.lanes.lock().len()
    }
}

async fn run_lane<K, T>(
    key: K,
    mut rx: mpsc::UnboundedReceiver<T>,
    lanes: LaneMap<K, T>,
    handler: LaneHandler<K, T>,
    idle_timeout: Duration,
) where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    T: Send + 'static,
{
    loop {
        let next = match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(item)) => Some(item),
            Ok(None) => None,
            Err(_) => {
                let mut lanes = lanes.lock();
                match rx.try_recv() {
                    Ok(item) => Some(item),
                    Err(_) => {
                        lanes.remove(&key);
                        None
                    }
                }
            }
        };
        match next {
            Some(item) => handler(key.clone(), item).await,
            None => break,
        }
    }
    tracing::debug!(lane = %key, "lane retired");
}

/// Periodically drop sessions idle longer than `ttl`.
pub fn spawn_session_sweeper(store: Arc<dyn SessionStore>, ttl: Duration, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.evict_idle(ttl).await {
                Ok(0) => {}
                Ok(evicted) => tracing::info!(evicted, store = store.name(), "idle sessions evicted"),
                Err(err) => tracing::warn!("session sweep failed: {err:#}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{create_session_store, Session, SessionKey};
    use chrono::Utc;

    fn recording_handler(
        delay_first: Duration,
    ) -> (LaneHandler<String, u32>, mpsc::UnboundedReceiver<(String, u32)>) {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let handler: LaneHandler<String, u32> = Arc::new(move |key: String, item: u32| {
            let done_tx = done_tx.clone();
            Box::pin(async move {
                if item == 0 {
                    tokio::time::sleep(delay_first).await;
                }
                let _ = done_tx.send((key, item));
            })
        });
        (handler, done_rx)
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<(String, u32)>, n: usize) -> Vec<(String, u32)> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let item = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn events_for_one_key_stay_in_order() {
        let (handler, mut done) = recording_handler(Duration::from_millis(50));
        let lanes = SessionLanes::new(handler, Duration::from_secs(5));

        for item in 0..5 {
            lanes.dispatch("a".to_string(), item);
        }
        let seen: Vec<u32> = collect(&mut done, 5).await.into_iter().map(|(_, i)| i).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(lanes.active(), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_wait_for_each_other() {
        let (handler, mut done) = recording_handler(Duration::from_millis(200));
        let lanes = SessionLanes::new(handler, Duration::from_secs(5));

        lanes.dispatch("slow".to_string(), 0);
        lanes.dispatch("fast".to_string(), 1);

        let first = collect(&mut done, 1).await;
        assert_eq!(first, vec![("fast".to_string(), 1)]);
        let second = collect(&mut done, 1).await;
        assert_eq!(second, vec![("slow".to_string(), 0)]);
        assert_eq!(lanes.active(), 2);
    }

    #[tokio::test]
    async fn idle_lanes_retire_and_restart_on_demand() {
        let (handler, mut done) = recording_handler(Duration::ZERO);
        let lanes = SessionLanes::new(handler, Duration::from_millis(20));

        lanes.dispatch("a".to_string(), 1);
        collect(&mut done, 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(lanes.active(), 0);

        lanes.dispatch("a".to_string(), 2);
        assert_eq!(collect(&mut done, 1).await, vec![("a".to_string(), 2)]);
    }

    #[tokio::test]
    async fn sweeper_evicts_idle_sessions() {
        let store = create_session_store();
        let mut stale = Session::new(SessionKey::new(1, 1));
        stale.last_activity = Utc::now() - chrono::Duration::hours(2);
        store.put(stale).await.unwrap();
        store.put(Session::new(SessionKey::new(2, 2))).await.unwrap();

        let sweeper = spawn_session_sweeper(store.clone(), Duration::from_secs(3600), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.abort();

        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.get(&SessionKey::new(1, 1)).await.unwrap().is_none());
    }
}
