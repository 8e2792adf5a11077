//! Live trade prices for a single exchange symbol.
//!
//! At most one connection is open per client: subscribing again first closes
//! the previous connection and waits for its task to exit. Trade prices reach
//! the owner through a [`Subscription`], which also exposes the rolling window
//! of points derived from them.

use crate::config::ConverterConfig;
use crate::error::AppError;
use crate::market::binance::{exchange_symbol, BinanceClient, BinanceWsStream};
use crate::market::types::{
    now_unix_ms, parse_trade_payload, HistoricalSeries, PricePoint, RollingWindow, TimeFrame,
};
use crate::state::TaskHandle;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// One trade, already appended to the rolling window.
    Price(PricePoint),
    /// A connection-level problem; the subscription stays open.
    Error(String),
    /// The connection is gone. Resubscribing is up to the owner.
    Disconnected(String),
}

#[derive(Debug)]
struct ActiveStream {
    id: u64,
    task: TaskHandle,
}

#[derive(Debug)]
pub struct StreamingPriceClient {
    binance: BinanceClient,
    active: tokio::sync::Mutex<Option<ActiveStream>>,
    next_id: AtomicU64,
}

#[derive(Debug)]
pub struct Subscription {
    id: u64,
    symbol: String,
    time_frame: TimeFrame,
    events: mpsc::Receiver<StreamEvent>,
    window: Arc<Mutex<RollingWindow>>,
    cancel_token: CancellationToken,
}

impl Subscription {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn time_frame(&self) -> TimeFrame {
        self.time_frame
    }

    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Next event, or `None` once the subscription is torn down or the
    /// connection task has exited and every buffered event was read.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.cancel_token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Current rolling window, oldest first.
    pub fn window(&self) -> Vec<PricePoint> {
        self.window.lock().to_vec()
    }

    /// Replaces the window with a snapshot; live points newer than the
    /// snapshot are kept after it.
    pub fn seed_window(&self, series: &HistoricalSeries) {
        self.window.lock().seed(series);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl StreamingPriceClient {
    pub fn new(binance: BinanceClient) -> Self {
        Self {
            binance,
            active: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Opens a trade stream for `asset`. Any previous connection is closed
    /// before the new one is opened.
    pub async fn subscribe(
        &self,
        asset: &str,
        time_frame: TimeFrame,
    ) -> Result<Subscription, AppError> {
        let symbol = exchange_symbol(asset)?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            debug!(subscription = previous.id, "closing previous trade stream");
            previous.task.stop().await;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let window = Arc::new(Mutex::new(RollingWindow::new(time_frame.kline_limit())));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let binance = self.binance.clone();
        let task_symbol = symbol.clone();
        let task_window = Arc::clone(&window);
        let task = TaskHandle::spawn(move |cancel_token| async move {
            run_trade_stream(binance, task_symbol, task_window, event_tx, cancel_token).await;
        });
        let cancel_token = task.cancellation_token.clone();
        *active = Some(ActiveStream { id, task });

        info!(subscription = id, %symbol, time_frame = time_frame.as_str(), "trade stream subscribed");
        Ok(Subscription {
            id,
            symbol,
            time_frame,
            events: event_rx,
            window,
            cancel_token,
        })
    }

    /// Closes the subscription's connection. Its receiver yields nothing
    /// further.
    pub async fn unsubscribe(&self, subscription: Subscription) {
        subscription.cancel_token.cancel();

        let mut active = self.active.lock().await;
        let owns_active = active
            .as_ref()
            .is_some_and(|stream| stream.id == subscription.id);
        if owns_active {
            if let Some(stream) = active.take() {
                stream.task.stop().await;
            }
        }
        info!(subscription = subscription.id, symbol = %subscription.symbol, "trade stream unsubscribed");
    }

    /// Closes whatever connection is open.
    pub async fn close(&self) {
        if let Some(stream) = self.active.lock().await.take() {
            stream.task.stop().await;
        }
    }

    pub async fn fetch_snapshot(
        &self,
        asset: &str,
        time_frame: TimeFrame,
    ) -> Result<HistoricalSeries, AppError> {
        let symbol = exchange_symbol(asset)?;
        self.binance.fetch_snapshot(&symbol, time_frame).await
    }
}

enum StreamDirective {
    Continue,
    Closed(String),
}

async fn run_trade_stream(
    binance: BinanceClient,
    symbol: String,
    window: Arc<Mutex<RollingWindow>>,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel_token: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel_token.cancelled() => return,
        connected = binance.connect_trade_stream(&symbol) => connected,
    };

    let mut websocket = match connected {
        Ok(websocket) => websocket,
        Err(error) => {
            warn!(%symbol, %error, "trade stream connect failed");
            emit(
                &event_tx,
                &cancel_token,
                StreamEvent::Disconnected(format!("websocket connect error: {error}")),
            )
            .await;
            return;
        }
    };
    info!(%symbol, "trade stream connected");

    loop {
        let frame = tokio::select! {
            _ = cancel_token.cancelled() => {
                close_websocket(&mut websocket, &symbol).await;
                return;
            }
            frame = websocket.next() => frame,
        };

        let directive = match frame {
            Some(Ok(message)) => {
                handle_message(message, &symbol, &window, &event_tx, &cancel_token).await
            }
            Some(Err(error)) => {
                warn!(%symbol, %error, "trade stream frame error");
                emit(
                    &event_tx,
                    &cancel_token,
                    StreamEvent::Error(format!("websocket frame error: {error}")),
                )
                .await;
                StreamDirective::Closed(format!("websocket frame error: {error}"))
            }
            None => StreamDirective::Closed("websocket stream ended".to_string()),
        };

        if let StreamDirective::Closed(reason) = directive {
            info!(%symbol, %reason, "trade stream disconnected");
            emit(&event_tx, &cancel_token, StreamEvent::Disconnected(reason)).await;
            return;
        }
    }
}

async fn handle_message(
    message: Message,
    symbol: &str,
    window: &Mutex<RollingWindow>,
    event_tx: &mpsc::Sender<StreamEvent>,
    cancel_token: &CancellationToken,
) -> StreamDirective {
    let parsed = match message {
        Message::Text(text_payload) => {
            let mut owned_payload = text_payload.into_bytes();
            parse_trade_payload(owned_payload.as_mut_slice())
        }
        Message::Binary(mut binary_payload) => parse_trade_payload(binary_payload.as_mut_slice()),
        Message::Close(_) => {
            return StreamDirective::Closed("websocket closed by server".to_string())
        }
        _ => return StreamDirective::Continue,
    };

    let trade = match parsed {
        Ok(trade) => trade,
        Err(error) => {
            warn!(%symbol, %error, "dropping malformed trade payload");
            return StreamDirective::Continue;
        }
    };

    if cancel_token.is_cancelled() {
        return StreamDirective::Continue;
    }
    let point = window.lock().push(PricePoint::new(now_unix_ms(), trade.price));
    emit(event_tx, cancel_token, StreamEvent::Price(point)).await;
    StreamDirective::Continue
}

async fn emit(
    event_tx: &mpsc::Sender<StreamEvent>,
    cancel_token: &CancellationToken,
    event: StreamEvent,
) {
    tokio::select! {
        _ = cancel_token.cancelled() => {}
        _ = event_tx.send(event) => {}
    }
}

async fn close_websocket(websocket: &mut BinanceWsStream, symbol: &str) {
    if let Err(error) = websocket.close(None).await {
        debug!(%symbol, %error, "trade stream close handshake failed");
    }
    info!(%symbol, "trade stream closed");
}

/// Backoff for resubscribing after the trade stream drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    const MAX_JITTER_MS: u64 = 250;

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self {
            base_delay: config.reconnect_base_delay,
            max_delay: config.reconnect_max_delay,
        }
    }

    /// Doubles from `base_delay` per attempt, adds up to a quarter second of
    /// jitter, and never exceeds `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.min(16);
        let jitter_ms = now_unix_ms().unsigned_abs() % Self::MAX_JITTER_MS;
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(Duration::from_millis(jitter_ms))
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_backoff_grows_until_the_configured_cap() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2_000),
        };

        let first = policy.delay_for_attempt(0);
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(350));
        assert!(policy.delay_for_attempt(2) >= Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_millis(2_000));
    }

    #[test]
    fn reconnect_policy_follows_config() {
        let config = ConverterConfig {
            reconnect_base_delay: Duration::from_millis(50),
            reconnect_max_delay: Duration::from_millis(60),
            ..ConverterConfig::default()
        };
        let policy = ReconnectPolicy::from_config(&config);
        assert_eq!(policy.base_delay, Duration::from_millis(50));
        assert!(policy.delay_for_attempt(5) <= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn rejects_unsupported_asset_before_connecting() {
        let client = StreamingPriceClient::new(BinanceClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            "ws://127.0.0.1:9",
        ));

        let result = client.subscribe("monero", TimeFrame::D1).await;
        assert!(matches!(result, Err(AppError::UnsupportedAsset(_))));
        assert!(client.active.lock().await.is_none());
    }

    #[tokio::test]
    async fn connect_failure_is_reported_as_disconnect() {
        let client = StreamingPriceClient::new(BinanceClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            "ws://127.0.0.1:9",
        ));

        let mut subscription = client
            .subscribe("bitcoin", TimeFrame::D1)
            .await
            .expect("mapping should exist");
        assert_eq!(subscription.symbol(), "BTCUSDT");
        assert_eq!(subscription.window().len(), 0);

        match subscription.next_event().await {
            Some(StreamEvent::Disconnected(reason)) => {
                assert!(reason.contains("connect"));
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
        client.unsubscribe(subscription).await;
    }
}
