//! Discord webhook alert sink.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::json;
use tracing::warn;

use crate::models::CvdAlertPayload;
use crate::store::Store;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Sends CVD alerts to a configured webhook URL, retrying internally and
/// recording history on success. `webhook_url: None` makes this a no-op
/// sink that still records history, so a misconfigured deployment doesn't
/// silently drop the durability guarantee.
pub struct AlertService {
    http: Client,
    webhook_url: Option<String>,
    store: Store,
    max_retries: u32,
    retry_delay: Duration,
}

impl AlertService {
    pub fn new(webhook_url: Option<String>, store: Store) -> Result<Self> {
        Ok(Self {
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .context("failed to build reqwest client")?,
            webhook_url,
            store,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// POST the alert, retrying up to `max_retries` times. Inserts an
    /// `AlertHistory` row on success before returning. Re-raises on final
    /// failure so the caller's queue bookkeeping records it.
    pub async fn send_cvd_alert(&self, alert_type: &str, payload: &CvdAlertPayload) -> Result<()> {
        let Some(url) = &self.webhook_url else {
            self.store
                .insert_alert_history(alert_type, &payload.symbol, payload)?;
            return Ok(());
        };

        let body = json!({
            "content": format!(
                "CVD alert: {} trigger={:?} z={:.3} threshold={:.3}",
                payload.symbol, payload.trigger_source, payload.trigger_z_score, payload.threshold
            ),
            "embeds": [{
                "title": "CVD Anomaly",
                "fields": [
                    {"name": "symbol", "value": payload.symbol, "inline": true},
                    {"name": "triggerSource", "value": format!("{:?}", payload.trigger_source), "inline": true},
                    {"name": "zScore", "value": format!("{:.4}", payload.z_score), "inline": true},
                    {"name": "deltaZScore", "value": format!("{:.4}", payload.delta_z_score), "inline": true},
                    {"name": "cumulativeValue", "value": format!("{:.4}", payload.cumulative_value), "inline": true},
                    {"name": "threshold", "value": format!("{:.4}", payload.threshold), "inline": true},
                ],
                "timestamp": crate::models::from_ms(payload.timestamp).to_rfc3339(),
            }],
        });

        let mut last_err = None;
        for attempt in 0..self.max_retries {
            match self.http.post(url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    self.store
                        .insert_alert_history(alert_type, &payload.symbol, payload)?;
                    return Ok(());
                }
                Ok(resp) => {
                    last_err = Some(anyhow::anyhow!("webhook returned {}", resp.status()));
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(e));
                }
            }
            warn!(attempt, "webhook delivery attempt failed, retrying");
            if attempt + 1 < self.max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        match last_err {
            Some(e) => bail!(e),
            None => bail!("webhook delivery failed for an unknown reason"),
        }
    }
}
