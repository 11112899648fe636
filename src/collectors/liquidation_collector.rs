//! Real-time liquidation (forceOrder) streaming collector.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::models::{LiquidationEvent, Venue};
use crate::push::{ChannelKind, PushClient, PushEvent};
use crate::store::Store;

use super::streaming::StreamingCollector;

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_BUFFER_SIZE: usize = 500;

type InsertFn = Box<dyn Fn(&[LiquidationEvent]) -> anyhow::Result<usize> + Send + Sync>;

pub struct LiquidationCollector {
    push: Arc<PushClient>,
    collector: Arc<StreamingCollector<LiquidationEvent, InsertFn>>,
}

impl LiquidationCollector {
    pub fn new(venue: Venue, ws_base_url: &str, subscriptions: &[String], store: Store) -> Self {
        let channels: Vec<(String, ChannelKind)> = subscriptions
            .iter()
            .map(|s| (s.clone(), ChannelKind::ForceOrder))
            .collect();
        let push = Arc::new(PushClient::new(venue, ws_base_url, &channels));

        let insert: InsertFn = Box::new(move |batch: &[LiquidationEvent]| store.insert_liquidations(batch));
        let collector = Arc::new(StreamingCollector::new(
            "liquidation_collector",
            DEFAULT_MAX_BUFFER_SIZE,
            DEFAULT_FLUSH_INTERVAL,
            insert,
        ));

        Self { push, collector }
    }

    pub async fn run(&self, running: Arc<AtomicBool>) {
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<PushEvent>();
        let (liq_tx, liq_rx) = mpsc::unbounded_channel::<LiquidationEvent>();

        let push = self.push.clone();
        let push_running = running.clone();
        let push_handle = tokio::spawn(async move { push.run(push_running, push_tx).await });

        let translate_handle = tokio::spawn(async move {
            while let Some(event) = push_rx.recv().await {
                if let PushEvent::Liquidation(liq) = event {
                    if liq_tx.send(liq).is_err() {
                        break;
                    }
                }
            }
        });

        self.collector.run(liq_rx, running).await;

        let _ = push_handle.await;
        let _ = translate_handle.await;
    }
}
