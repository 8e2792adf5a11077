use crate::config::ConverterConfig;
use crate::converter::catalog;
use crate::error::AppError;
use crate::market::types::{HistoricalSeries, KlineInterval, KlineWire, PricePoint, TimeFrame};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Quote currency for every exchange pair; the most liquid stablecoin market.
pub const QUOTE_SYMBOL: &str = "USDT";

const SUPPORTED_BASE_SYMBOLS: [&str; 5] = ["BTC", "ETH", "DOGE", "ADA", "SOL"];

pub type BinanceWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Maps a catalog asset (id or ticker) to its exchange trading pair.
pub fn exchange_symbol(asset: &str) -> Result<String, AppError> {
    let ticker = catalog::find(asset)
        .map(|currency| currency.symbol.to_string())
        .unwrap_or_else(|| asset.trim().to_ascii_uppercase());

    if !SUPPORTED_BASE_SYMBOLS.contains(&ticker.as_str()) {
        return Err(AppError::UnsupportedAsset(ticker));
    }
    Ok(format!("{ticker}{QUOTE_SYMBOL}"))
}

#[derive(Debug, Clone)]
pub struct BinanceClient {
    http: Client,
    rest_base_url: String,
    stream_base_url: String,
}

impl BinanceClient {
    pub fn new(
        http: Client,
        rest_base_url: impl Into<String>,
        stream_base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            rest_base_url: rest_base_url.into(),
            stream_base_url: stream_base_url.into(),
        }
    }

    pub fn from_config(http: Client, config: &ConverterConfig) -> Self {
        Self::new(
            http,
            config.binance_rest_base_url.clone(),
            config.binance_stream_base_url.clone(),
        )
    }

    fn trade_stream_endpoint(&self, symbol: &str) -> String {
        format!("{}/{}@trade", self.stream_base_url, symbol.to_ascii_lowercase())
    }

    fn klines_endpoint(&self, symbol: &str, interval: KlineInterval, limit: usize) -> String {
        format!("{}/api/v3/klines", self.rest_base_url)
            + &format!(
                "?symbol={}&interval={}&limit={limit}",
                symbol.to_ascii_uppercase(),
                interval.as_str()
            )
    }

    pub async fn connect_trade_stream(&self, symbol: &str) -> Result<BinanceWsStream, AppError> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(1 << 20),
            max_frame_size: Some(1 << 20),
            ..Default::default()
        };

        let request = self.trade_stream_endpoint(symbol);
        debug!(endpoint = %request, "connecting trade stream");
        let (stream, _) = connect_async_with_config(request, Some(ws_config), true).await?;
        Ok(stream)
    }

    /// One-shot candle history for the chart, closing prices at open times.
    pub async fn fetch_snapshot(
        &self,
        symbol: &str,
        time_frame: TimeFrame,
    ) -> Result<HistoricalSeries, AppError> {
        let endpoint =
            self.klines_endpoint(symbol, time_frame.kline_interval(), time_frame.kline_limit());
        debug!(%endpoint, "requesting klines snapshot");
        let response = self.http.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<Vec<KlineWire>>().await?;

        let mut points = Vec::with_capacity(payload.len());
        for kline in payload {
            points.push(PricePoint::try_from(kline)?);
        }
        HistoricalSeries::from_points(points)
    }
}
