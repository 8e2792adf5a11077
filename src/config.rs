use crate::converter::catalog::{self, CatalogKind};
use crate::error::AppError;
use crate::market::types::TimeFrame;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_BINANCE_REST_BASE_URL: &str = "https://api.binance.com";
pub const DEFAULT_BINANCE_STREAM_BASE_URL: &str = "wss://stream.binance.com:9443/ws";
pub const DEFAULT_ASSET_ID: &str = "bitcoin";
pub const DEFAULT_REFERENCE_ID: &str = "usd";
pub const DEFAULT_TIME_FRAME: TimeFrame = TimeFrame::D30;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_MIN_CALL_SPACING_MS: u64 = 3_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 5_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
pub const MAX_POLL_INTERVAL_MS: u64 = 600_000;
pub const MAX_MIN_CALL_SPACING_MS: u64 = 60_000;
pub const MAX_RETRIES: u32 = 10;
pub const MAX_INITIAL_RETRY_DELAY_MS: u64 = 30_000;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 120_000;
pub const MIN_RECONNECT_DELAY_MS: u64 = 10;
pub const MAX_RECONNECT_DELAY_MS: u64 = 300_000;

const ENV_PREFIX: &str = "CONVERTER_";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConverterArgs {
    pub coingecko_base_url: Option<String>,
    pub binance_rest_base_url: Option<String>,
    pub binance_stream_base_url: Option<String>,
    pub asset_id: Option<String>,
    pub reference_id: Option<String>,
    pub time_frame: Option<TimeFrame>,
    pub poll_interval_ms: Option<u64>,
    pub min_call_spacing_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub initial_retry_delay_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub reconnect_base_delay_ms: Option<u64>,
    pub reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub coingecko_base_url: String,
    pub binance_rest_base_url: String,
    pub binance_stream_base_url: String,
    pub asset_id: String,
    pub reference_id: String,
    pub time_frame: TimeFrame,
    pub poll_interval: Duration,
    pub min_call_spacing: Duration,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub request_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            coingecko_base_url: DEFAULT_COINGECKO_BASE_URL.to_string(),
            binance_rest_base_url: DEFAULT_BINANCE_REST_BASE_URL.to_string(),
            binance_stream_base_url: DEFAULT_BINANCE_STREAM_BASE_URL.to_string(),
            asset_id: DEFAULT_ASSET_ID.to_string(),
            reference_id: DEFAULT_REFERENCE_ID.to_string(),
            time_frame: DEFAULT_TIME_FRAME,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            min_call_spacing: Duration::from_millis(DEFAULT_MIN_CALL_SPACING_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_retry_delay: Duration::from_millis(DEFAULT_INITIAL_RETRY_DELAY_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            reconnect_base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
            reconnect_max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, AppError> {
    match env_value(name) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            AppError::InvalidArgument(format!("{ENV_PREFIX}{name} has an invalid value '{raw}'"))
        }),
        None => Ok(None),
    }
}

fn normalize_base_url(field: &str, value: Option<String>, default: &str) -> Result<String, AppError> {
    let url = value
        .map(|raw| raw.trim().trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string());

    let has_scheme = ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| url.starts_with(scheme));
    if !has_scheme {
        return Err(AppError::InvalidArgument(format!(
            "{field} must be an absolute http(s) or ws(s) URL"
        )));
    }
    Ok(url)
}

fn ensure_range<T>(field: &str, value: T, min: T, max: T) -> Result<T, AppError>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(AppError::InvalidArgument(format!(
            "{field} must be between {min} and {max}"
        )));
    }
    Ok(value)
}

impl ConverterArgs {
    pub fn from_env() -> Result<Self, AppError> {
        let time_frame = match env_value("TIME_FRAME") {
            Some(raw) => Some(TimeFrame::parse_str(&raw)?),
            None => None,
        };

        Ok(Self {
            coingecko_base_url: env_value("COINGECKO_BASE_URL"),
            binance_rest_base_url: env_value("BINANCE_REST_BASE_URL"),
            binance_stream_base_url: env_value("BINANCE_STREAM_BASE_URL"),
            asset_id: env_value("ASSET"),
            reference_id: env_value("REFERENCE"),
            time_frame,
            poll_interval_ms: env_parsed("POLL_INTERVAL_MS")?,
            min_call_spacing_ms: env_parsed("MIN_CALL_SPACING_MS")?,
            max_retries: env_parsed("MAX_RETRIES")?,
            initial_retry_delay_ms: env_parsed("INITIAL_RETRY_DELAY_MS")?,
            request_timeout_ms: env_parsed("REQUEST_TIMEOUT_MS")?,
            reconnect_base_delay_ms: env_parsed("RECONNECT_BASE_DELAY_MS")?,
            reconnect_max_delay_ms: env_parsed("RECONNECT_MAX_DELAY_MS")?,
        })
    }

    pub fn normalize(self) -> Result<ConverterConfig, AppError> {
        let coingecko_base_url = normalize_base_url(
            "coingeckoBaseUrl",
            self.coingecko_base_url,
            DEFAULT_COINGECKO_BASE_URL,
        )?;
        let binance_rest_base_url = normalize_base_url(
            "binanceRestBaseUrl",
            self.binance_rest_base_url,
            DEFAULT_BINANCE_REST_BASE_URL,
        )?;
        let binance_stream_base_url = normalize_base_url(
            "binanceStreamBaseUrl",
            self.binance_stream_base_url,
            DEFAULT_BINANCE_STREAM_BASE_URL,
        )?;

        let asset_id = self
            .asset_id
            .unwrap_or_else(|| DEFAULT_ASSET_ID.to_string())
            .trim()
            .to_ascii_lowercase();
        if catalog::find_in(CatalogKind::Asset, &asset_id).is_none() {
            return Err(AppError::InvalidArgument(format!(
                "assetId '{asset_id}' is not in the asset catalog"
            )));
        }

        let reference_id = self
            .reference_id
            .unwrap_or_else(|| DEFAULT_REFERENCE_ID.to_string())
            .trim()
            .to_ascii_lowercase();
        if catalog::find_in(CatalogKind::Reference, &reference_id).is_none() {
            return Err(AppError::InvalidArgument(format!(
                "referenceId '{reference_id}' is not in the reference catalog"
            )));
        }

        let poll_interval_ms = ensure_range(
            "pollIntervalMs",
            self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            MIN_POLL_INTERVAL_MS,
            MAX_POLL_INTERVAL_MS,
        )?;
        let min_call_spacing_ms = ensure_range(
            "minCallSpacingMs",
            self.min_call_spacing_ms.unwrap_or(DEFAULT_MIN_CALL_SPACING_MS),
            0,
            MAX_MIN_CALL_SPACING_MS,
        )?;
        let max_retries = ensure_range(
            "maxRetries",
            self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            0,
            MAX_RETRIES,
        )?;
        let initial_retry_delay_ms = ensure_range(
            "initialRetryDelayMs",
            self.initial_retry_delay_ms
                .unwrap_or(DEFAULT_INITIAL_RETRY_DELAY_MS),
            0,
            MAX_INITIAL_RETRY_DELAY_MS,
        )?;
        let request_timeout_ms = ensure_range(
            "requestTimeoutMs",
            self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            MIN_REQUEST_TIMEOUT_MS,
            MAX_REQUEST_TIMEOUT_MS,
        )?;
        let reconnect_base_delay_ms = ensure_range(
            "reconnectBaseDelayMs",
            self.reconnect_base_delay_ms
                .unwrap_or(DEFAULT_RECONNECT_BASE_DELAY_MS),
            MIN_RECONNECT_DELAY_MS,
            MAX_RECONNECT_DELAY_MS,
        )?;
        let reconnect_max_delay_ms = ensure_range(
            "reconnectMaxDelayMs",
            self.reconnect_max_delay_ms
                .unwrap_or(DEFAULT_RECONNECT_MAX_DELAY_MS),
            reconnect_base_delay_ms,
            MAX_RECONNECT_DELAY_MS,
        )?;

        Ok(ConverterConfig {
            coingecko_base_url,
            binance_rest_base_url,
            binance_stream_base_url,
            asset_id,
            reference_id,
            time_frame: self.time_frame.unwrap_or(DEFAULT_TIME_FRAME),
            poll_interval: Duration::from_millis(poll_interval_ms),
            min_call_spacing: Duration::from_millis(min_call_spacing_ms),
            max_retries,
            initial_retry_delay: Duration::from_millis(initial_retry_delay_ms),
            request_timeout: Duration::from_millis(request_timeout_ms),
            reconnect_base_delay: Duration::from_millis(reconnect_base_delay_ms),
            reconnect_max_delay: Duration::from_millis(reconnect_max_delay_ms),
        })
    }
}
