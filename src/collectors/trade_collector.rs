//! Real-time trade streaming collector.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::models::{Trade, Venue};
use crate::push::{ChannelKind, PushClient, PushEvent};
use crate::store::Store;

use super::streaming::StreamingCollector;

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_BUFFER_SIZE: usize = 1000;

type InsertFn = Box<dyn Fn(&[Trade]) -> anyhow::Result<usize> + Send + Sync>;

pub struct TradeCollector {
    push: Arc<PushClient>,
    collector: Arc<StreamingCollector<Trade, InsertFn>>,
}

impl TradeCollector {
    pub fn new(venue: Venue, ws_base_url: &str, subscriptions: &[String], store: Store) -> Self {
        let channels: Vec<(String, ChannelKind)> = subscriptions
            .iter()
            .map(|s| (s.clone(), ChannelKind::AggTrade))
            .collect();
        let push = Arc::new(PushClient::new(venue, ws_base_url, &channels));

        let insert: InsertFn = Box::new(move |batch: &[Trade]| store.insert_trades(batch));
        let collector = Arc::new(StreamingCollector::new(
            "trade_collector",
            DEFAULT_MAX_BUFFER_SIZE,
            DEFAULT_FLUSH_INTERVAL,
            insert,
        ));

        Self { push, collector }
    }

    pub async fn run(&self, running: Arc<AtomicBool>) {
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<PushEvent>();
        let (trade_tx, trade_rx) = mpsc::unbounded_channel::<Trade>();

        let push = self.push.clone();
        let push_running = running.clone();
        let push_handle = tokio::spawn(async move { push.run(push_running, push_tx).await });

        let translate_handle = tokio::spawn(async move {
            while let Some(event) = push_rx.recv().await {
                if let PushEvent::Trade(t) = event {
                    if trade_tx.send(t).is_err() {
                        break;
                    }
                }
            }
        });

        self.collector.run(trade_rx, running).await;

        let _ = push_handle.await;
        let _ = translate_handle.await;
    }
}
