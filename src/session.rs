//! The converter session: one background task that owns the engine state and
//! every data source for the selected pair, and publishes a [`ConverterView`]
//! after each change.
//!
//! Work issued for a pair or timeframe that is no longer selected is either
//! cancelled or, when it completes anyway, discarded by generation.

use crate::config::ConverterConfig;
use crate::converter::catalog::{self, CatalogKind, Currency};
use crate::converter::engine::{
    parse_amount, Converter, ConverterEvent, Field, HistoryStatus, PriceStatus,
};
use crate::error::AppError;
use crate::market::binance::{exchange_symbol, BinanceClient};
use crate::market::client::{build_http_client, RateGate, RestClient};
use crate::market::history::HistoryFetcher;
use crate::market::poller::{SpotPricePoller, SpotPriceSnapshot};
use crate::market::stream::{ReconnectPolicy, StreamEvent, StreamingPriceClient, Subscription};
use crate::market::types::{HistoricalSeries, PricePoint, TimeFrame};
use crate::state::TaskHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const STREAM_REFERENCE_ID: &str = "usd";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Poller,
    Stream,
}

impl PriceSource {
    /// Exchange data is quoted in a USD stablecoin, so it only serves USD
    /// conversions of mapped assets.
    pub fn for_pair(from: &Currency, to: &Currency) -> Self {
        if to.id == STREAM_REFERENCE_ID && exchange_symbol(from.id).is_ok() {
            Self::Stream
        } else {
            Self::Poller
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConverterView {
    pub from_amount: String,
    pub to_amount: String,
    /// Grouped rendering of the amounts at each currency's precision.
    pub from_display: String,
    pub to_display: String,
    pub last_edited: Field,
    pub from: Currency,
    pub to: Currency,
    pub price: Option<f64>,
    pub change_24h_pct: Option<f64>,
    pub loading: bool,
    pub error: Option<String>,
    pub history: Vec<PricePoint>,
    pub time_frame: TimeFrame,
    pub max_chart_ticks: u8,
    pub source: PriceSource,
}

impl ConverterView {
    fn build(converter: &Converter, history: &[PricePoint], time_frame: TimeFrame) -> Self {
        Self {
            from_amount: converter.conversion.from_amount.clone(),
            to_amount: converter.conversion.to_amount.clone(),
            from_display: display_amount(&converter.conversion.from_amount, converter.from),
            to_display: display_amount(&converter.conversion.to_amount, converter.to),
            last_edited: converter.conversion.last_edited,
            from: *converter.from,
            to: *converter.to,
            price: converter.price.price,
            change_24h_pct: converter.price.change_24h_pct,
            loading: converter.loading(),
            error: converter.error().map(str::to_string),
            history: history.to_vec(),
            time_frame,
            max_chart_ticks: time_frame.max_chart_ticks(),
            source: PriceSource::for_pair(converter.from, converter.to),
        }
    }
}

fn display_amount(text: &str, currency: &Currency) -> String {
    parse_amount(text)
        .map(|value| catalog::format_amount(value, currency))
        .unwrap_or_default()
}

#[derive(Debug)]
enum Command {
    Apply(ConverterEvent),
    SelectTimeFrame(TimeFrame),
}

/// Handle to a running session. Dropping it stops the session task.
#[derive(Debug)]
pub struct ConverterSession {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<ConverterView>,
    task: Option<TaskHandle>,
}

impl ConverterSession {
    pub fn start(config: ConverterConfig) -> Result<Self, AppError> {
        let (runtime, view_rx) = SessionRuntime::new(&config)?;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let task = TaskHandle::spawn(move |cancel_token| async move {
            runtime.run(command_rx, cancel_token).await;
        });

        Ok(Self {
            commands: command_tx,
            view: view_rx,
            task: Some(task),
        })
    }

    async fn send(&self, command: Command) -> Result<(), AppError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::Unknown("converter session has stopped".to_string()))
    }

    pub async fn edit_from(&self, text: impl Into<String>) -> Result<(), AppError> {
        self.send(Command::Apply(ConverterEvent::EditFrom(text.into())))
            .await
    }

    pub async fn edit_to(&self, text: impl Into<String>) -> Result<(), AppError> {
        self.send(Command::Apply(ConverterEvent::EditTo(text.into())))
            .await
    }

    pub async fn swap(&self) -> Result<(), AppError> {
        self.send(Command::Apply(ConverterEvent::Swap)).await
    }

    pub async fn select_from(&self, id: impl Into<String>) -> Result<(), AppError> {
        self.send(Command::Apply(ConverterEvent::SelectFrom(id.into())))
            .await
    }

    pub async fn select_to(&self, id: impl Into<String>) -> Result<(), AppError> {
        self.send(Command::Apply(ConverterEvent::SelectTo(id.into())))
            .await
    }

    pub async fn select_time_frame(&self, time_frame: TimeFrame) -> Result<(), AppError> {
        self.send(Command::SelectTimeFrame(time_frame)).await
    }

    pub fn view(&self) -> ConverterView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConverterView> {
        self.view.clone()
    }

    /// Waits for the next published view.
    pub async fn changed(&mut self) -> Result<ConverterView, AppError> {
        self.view
            .changed()
            .await
            .map_err(|_| AppError::Unknown("converter session has stopped".to_string()))?;
        Ok(self.view.borrow_and_update().clone())
    }

    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
        }
    }
}

impl Drop for ConverterSession {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.cancellation_token.cancel();
        }
    }
}

type HistoryResult = (u64, Result<HistoricalSeries, AppError>);

enum Wake {
    Shutdown,
    Command(Command),
    Price(SpotPriceSnapshot),
    Stream(Option<StreamEvent>),
    History(HistoryResult),
    Resubscribe,
}

struct SessionRuntime {
    poll_interval: Duration,
    reconnect: ReconnectPolicy,
    rest: RestClient,
    history_fetcher: HistoryFetcher,
    streaming: Arc<StreamingPriceClient>,
    converter: Converter,
    time_frame: TimeFrame,
    generation: u64,
    chart: Vec<PricePoint>,
    poller: Option<SpotPricePoller>,
    poller_rx: Option<watch::Receiver<SpotPriceSnapshot>>,
    subscription: Option<Subscription>,
    history_task: Option<TaskHandle>,
    history_tx: mpsc::Sender<HistoryResult>,
    history_rx: mpsc::Receiver<HistoryResult>,
    resubscribe_at: Option<Instant>,
    reconnect_attempt: u32,
    view_tx: watch::Sender<ConverterView>,
}

impl SessionRuntime {
    fn new(config: &ConverterConfig) -> Result<(Self, watch::Receiver<ConverterView>), AppError> {
        let from = catalog::find_in(CatalogKind::Asset, &config.asset_id).ok_or_else(|| {
            AppError::InvalidArgument(format!("unknown asset '{}'", config.asset_id))
        })?;
        let to = catalog::find_in(CatalogKind::Reference, &config.reference_id).ok_or_else(|| {
            AppError::InvalidArgument(format!("unknown reference '{}'", config.reference_id))
        })?;

        let http = build_http_client(config)?;
        let gate = Arc::new(RateGate::new(config.min_call_spacing));
        let rest = RestClient::from_config(http.clone(), config, gate);
        let streaming = Arc::new(StreamingPriceClient::new(BinanceClient::from_config(
            http, config,
        )));

        let converter = Converter::new(from, to);
        let (view_tx, view_rx) = watch::channel(ConverterView::build(
            &converter,
            &[],
            config.time_frame,
        ));
        let (history_tx, history_rx) = mpsc::channel(4);

        let runtime = Self {
            poll_interval: config.poll_interval,
            reconnect: ReconnectPolicy::from_config(config),
            history_fetcher: HistoryFetcher::new(rest.clone()),
            rest,
            streaming,
            converter,
            time_frame: config.time_frame,
            generation: 0,
            chart: Vec::new(),
            poller: None,
            poller_rx: None,
            subscription: None,
            history_task: None,
            history_tx,
            history_rx,
            resubscribe_at: None,
            reconnect_attempt: 0,
            view_tx,
        };
        Ok((runtime, view_rx))
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel_token: CancellationToken) {
        let (from, to) = self.converter.pair();
        info!(from, to, time_frame = self.time_frame.as_str(), "converter session started");
        self.restart_sources().await;
        self.publish();

        loop {
            let wake = tokio::select! {
                _ = cancel_token.cancelled() => Wake::Shutdown,
                command = commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => Wake::Shutdown,
                },
                snapshot = next_snapshot(&mut self.poller_rx) => Wake::Price(snapshot),
                event = next_stream_event(&mut self.subscription) => Wake::Stream(event),
                Some(result) = self.history_rx.recv() => Wake::History(result),
                _ = sleep_until_deadline(self.resubscribe_at) => Wake::Resubscribe,
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Command(command) => self.handle_command(command).await,
                Wake::Price(snapshot) => self.apply(ConverterEvent::PriceChanged(
                    snapshot.to_price_status(),
                )),
                Wake::Stream(event) => self.handle_stream_event(event),
                Wake::History(result) => self.handle_history(result),
                Wake::Resubscribe => {
                    self.resubscribe_at = None;
                    self.subscribe_stream().await;
                }
            }
            self.publish();
        }

        self.stop_sources().await;
        info!("converter session stopped");
    }

    fn apply(&mut self, event: ConverterEvent) {
        self.converter = self.converter.clone().apply(event);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Apply(event) => {
                let previous_pair = self.converter.pair();
                self.apply(event);
                if self.converter.pair() != previous_pair {
                    self.restart_sources().await;
                }
            }
            Command::SelectTimeFrame(time_frame) => {
                if time_frame == self.time_frame {
                    return;
                }
                self.time_frame = time_frame;
                self.generation += 1;
                self.chart.clear();
                self.apply(ConverterEvent::HistoryChanged(HistoryStatus::pending()));
                if self.source() == PriceSource::Stream {
                    // The rolling window cap depends on the timeframe.
                    self.reconnect_attempt = 0;
                    self.subscribe_stream().await;
                }
                self.start_history();
            }
        }
    }

    fn handle_stream_event(&mut self, event: Option<StreamEvent>) {
        let Some(event) = event else {
            self.subscription = None;
            return;
        };

        match event {
            StreamEvent::Price(point) => {
                self.reconnect_attempt = 0;
                if let Some(subscription) = &self.subscription {
                    self.chart = subscription.window();
                }
                self.apply(ConverterEvent::PriceChanged(PriceStatus {
                    price: Some(point.price),
                    change_24h_pct: None,
                    loading: false,
                    error: None,
                }));
            }
            StreamEvent::Error(message) => {
                let mut status = self.converter.price.clone();
                status.error = Some(message);
                self.apply(ConverterEvent::PriceChanged(status));
            }
            StreamEvent::Disconnected(reason) => {
                self.subscription = None;
                self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
                let delay = self.reconnect.delay_for_attempt(self.reconnect_attempt);
                warn!(
                    %reason,
                    attempt = self.reconnect_attempt,
                    delay_ms = delay.as_millis() as u64,
                    "trade stream lost, scheduling resubscribe"
                );
                self.resubscribe_at = Some(Instant::now() + delay);

                let mut status = self.converter.price.clone();
                status.loading = false;
                status.error = Some(reason);
                self.apply(ConverterEvent::PriceChanged(status));
            }
        }
    }

    fn handle_history(&mut self, (generation, result): HistoryResult) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "discarding stale history result");
            return;
        }
        self.history_task = None;

        match result {
            Ok(series) => {
                self.chart = match &self.subscription {
                    Some(subscription) if self.source() == PriceSource::Stream => {
                        subscription.seed_window(&series);
                        subscription.window()
                    }
                    _ => series.into_points(),
                };
                self.apply(ConverterEvent::HistoryChanged(HistoryStatus::default()));
            }
            Err(error) => {
                warn!(%error, "history fetch failed");
                self.chart.clear();
                self.apply(ConverterEvent::HistoryChanged(HistoryStatus {
                    loading: false,
                    error: Some(error.to_string()),
                }));
            }
        }
    }

    fn source(&self) -> PriceSource {
        PriceSource::for_pair(self.converter.from, self.converter.to)
    }

    async fn restart_sources(&mut self) {
        self.stop_sources().await;
        self.generation += 1;
        self.chart.clear();
        self.reconnect_attempt = 0;

        let (from, to) = self.converter.pair();
        let source = self.source();
        info!(from, to, ?source, "starting price sources");

        match source {
            PriceSource::Stream => self.subscribe_stream().await,
            PriceSource::Poller => {
                match SpotPricePoller::start(self.rest.clone(), from, to, self.poll_interval) {
                    Ok(poller) => {
                        self.poller_rx = Some(poller.watch());
                        self.poller = Some(poller);
                    }
                    Err(error) => self.apply(ConverterEvent::PriceChanged(PriceStatus {
                        error: Some(error.to_string()),
                        ..PriceStatus::default()
                    })),
                }
            }
        }
        self.start_history();
    }

    async fn stop_sources(&mut self) {
        self.poller_rx = None;
        if let Some(poller) = self.poller.take() {
            poller.shutdown().await;
        }
        if let Some(subscription) = self.subscription.take() {
            self.streaming.unsubscribe(subscription).await;
        }
        self.streaming.close().await;
        self.resubscribe_at = None;
        if let Some(task) = self.history_task.take() {
            task.stop().await;
        }
    }

    async fn subscribe_stream(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.streaming.unsubscribe(subscription).await;
        }

        match self
            .streaming
            .subscribe(self.converter.from.id, self.time_frame)
            .await
        {
            Ok(subscription) => {
                if !self.chart.is_empty() {
                    if let Ok(series) = HistoricalSeries::from_points(self.chart.clone()) {
                        subscription.seed_window(&series);
                    }
                }
                self.subscription = Some(subscription);
                self.resubscribe_at = None;
            }
            Err(error) => {
                warn!(%error, "trade stream subscribe failed");
                self.apply(ConverterEvent::PriceChanged(PriceStatus {
                    error: Some(error.to_string()),
                    ..PriceStatus::default()
                }));
            }
        }
    }

    fn start_history(&mut self) {
        if let Some(task) = self.history_task.take() {
            task.cancellation_token.cancel();
        }

        let generation = self.generation;
        let history_tx = self.history_tx.clone();
        let time_frame = self.time_frame;
        let (from, to) = self.converter.pair();
        let (from, to) = (from.to_string(), to.to_string());
        let source = self.source();
        let fetcher = self.history_fetcher.clone();
        let streaming = Arc::clone(&self.streaming);

        self.history_task = Some(TaskHandle::spawn(move |cancel_token| async move {
            let request = async {
                match source {
                    PriceSource::Stream => streaming.fetch_snapshot(&from, time_frame).await,
                    PriceSource::Poller => fetcher.fetch(&from, &to, time_frame).await,
                }
            };
            let result = tokio::select! {
                _ = cancel_token.cancelled() => return,
                result = request => result,
            };
            let _ = history_tx.send((generation, result)).await;
        }));
    }

    fn publish(&self) {
        let view = ConverterView::build(&self.converter, &self.chart, self.time_frame);
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }
}

async fn next_snapshot(
    receiver: &mut Option<watch::Receiver<SpotPriceSnapshot>>,
) -> SpotPriceSnapshot {
    if let Some(receiver) = receiver {
        if receiver.changed().await.is_ok() {
            return receiver.borrow_and_update().clone();
        }
    }
    std::future::pending().await
}

async fn next_stream_event(subscription: &mut Option<Subscription>) -> Option<StreamEvent> {
    match subscription {
        Some(subscription) => subscription.next_event().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
