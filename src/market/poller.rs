//! Fixed-interval spot price polling for one asset/reference pair.
//!
//! Ticks run one after another inside a single task: a tick whose request is
//! still outstanding when the interval fires delays the next one, and missed
//! ticks are skipped rather than queued.

use crate::converter::engine::PriceStatus;
use crate::error::AppError;
use crate::market::client::RestClient;
use crate::market::coingecko::fetch_spot_quote;
use crate::market::types::SpotQuote;
use crate::state::TaskHandle;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpotPriceSnapshot {
    /// Last successful quote; kept when a later tick fails.
    pub quote: Option<SpotQuote>,
    pub loading: bool,
    pub error: Option<String>,
}

impl SpotPriceSnapshot {
    pub fn price(&self) -> Option<f64> {
        self.quote.map(|quote| quote.price)
    }

    pub fn change_24h_pct(&self) -> Option<f64> {
        self.quote.map(|quote| quote.change_24h_pct)
    }

    pub fn to_price_status(&self) -> PriceStatus {
        PriceStatus {
            price: self.price(),
            change_24h_pct: self.change_24h_pct(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

#[derive(Debug)]
pub struct SpotPricePoller {
    asset_id: String,
    reference_id: String,
    snapshot: watch::Receiver<SpotPriceSnapshot>,
    task: Option<TaskHandle>,
}

impl SpotPricePoller {
    /// Spawns the polling task. The first request is issued immediately.
    pub fn start(
        client: RestClient,
        asset_id: impl Into<String>,
        reference_id: impl Into<String>,
        interval: Duration,
    ) -> Result<Self, AppError> {
        let asset_id = asset_id.into();
        let reference_id = reference_id.into();
        if interval.is_zero() {
            return Err(AppError::InvalidArgument(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        let (snapshot_tx, snapshot_rx) = watch::channel(SpotPriceSnapshot {
            loading: true,
            ..SpotPriceSnapshot::default()
        });

        let task_asset = asset_id.clone();
        let task_reference = reference_id.clone();
        let task = TaskHandle::spawn(move |cancel_token| async move {
            run_poll_loop(
                client,
                task_asset,
                task_reference,
                interval,
                snapshot_tx,
                cancel_token,
            )
            .await;
        });

        info!(%asset_id, %reference_id, interval_ms = interval.as_millis() as u64, "spot poller started");
        Ok(Self {
            asset_id,
            reference_id,
            snapshot: snapshot_rx,
            task: Some(task),
        })
    }

    pub fn pair(&self) -> (&str, &str) {
        (&self.asset_id, &self.reference_id)
    }

    pub fn snapshot(&self) -> SpotPriceSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver that is notified after every state write.
    pub fn watch(&self) -> watch::Receiver<SpotPriceSnapshot> {
        self.snapshot.clone()
    }

    /// Stops polling and waits until the task has exited; nothing is written
    /// to the snapshot afterwards.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
            debug!(asset_id = %self.asset_id, reference_id = %self.reference_id, "spot poller stopped");
        }
    }
}

impl Drop for SpotPricePoller {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.cancellation_token.cancel();
        }
    }
}

async fn run_poll_loop(
    client: RestClient,
    asset_id: String,
    reference_id: String,
    interval: Duration,
    snapshot_tx: watch::Sender<SpotPriceSnapshot>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        snapshot_tx.send_modify(|snapshot| snapshot.loading = true);

        let outcome = tokio::select! {
            _ = cancel_token.cancelled() => break,
            outcome = fetch_spot_quote(&client, &asset_id, &reference_id) => outcome,
        };

        if cancel_token.is_cancelled() {
            break;
        }

        match outcome {
            Ok(quote) => {
                debug!(%asset_id, %reference_id, price = quote.price, "spot price refreshed");
                snapshot_tx.send_modify(|snapshot| {
                    snapshot.quote = Some(quote);
                    snapshot.loading = false;
                    snapshot.error = None;
                });
            }
            Err(error) => {
                warn!(%asset_id, %reference_id, %error, "spot price refresh failed");
                snapshot_tx.send_modify(|snapshot| {
                    snapshot.loading = false;
                    snapshot.error = Some(error.to_string());
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(price: f64) -> SpotQuote {
        SpotQuote {
            price,
            change_24h_pct: 1.5,
            last_updated_ms: 1,
        }
    }

    #[test]
    fn snapshot_maps_into_price_status() {
        let snapshot = SpotPriceSnapshot {
            quote: Some(quote(42.0)),
            loading: false,
            error: Some("Request timed out.".to_string()),
        };

        let status = snapshot.to_price_status();
        assert_eq!(status.price, Some(42.0));
        assert_eq!(status.change_24h_pct, Some(1.5));
        assert!(!status.loading);
        assert_eq!(status.error.as_deref(), Some("Request timed out."));
    }

    #[test]
    fn empty_snapshot_has_no_price() {
        let snapshot = SpotPriceSnapshot::default();
        assert_eq!(snapshot.price(), None);
        assert_eq!(snapshot.to_price_status().change_24h_pct, None);
    }

    #[tokio::test]
    async fn rejects_zero_interval() {
        let client = RestClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            std::sync::Arc::new(crate::market::client::RateGate::new(Duration::ZERO)),
            crate::market::client::RetryPolicy::default(),
        );
        let result = SpotPricePoller::start(client, "bitcoin", "usd", Duration::ZERO);
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }
}
