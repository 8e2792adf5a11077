use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TimeFrame {
    #[serde(rename = "1D")]
    D1,
    #[serde(rename = "7D")]
    D7,
    #[serde(rename = "30D")]
    D30,
    #[serde(rename = "90D")]
    D90,
    #[serde(rename = "1Y")]
    Y1,
}

impl TimeFrame {
    pub const ALL: [TimeFrame; 5] = [Self::D1, Self::D7, Self::D30, Self::D90, Self::Y1];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::D1 => "1D",
            Self::D7 => "7D",
            Self::D30 => "30D",
            Self::D90 => "90D",
            Self::Y1 => "1Y",
        }
    }

    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == normalized)
            .ok_or_else(|| AppError::InvalidArgument(format!("unknown time frame '{value}'")))
    }

    /// Lookback window used by the market-chart history source.
    pub fn lookback_days(self) -> u16 {
        match self {
            Self::D1 => 1,
            Self::D7 => 7,
            Self::D30 => 30,
            Self::D90 => 90,
            Self::Y1 => 365,
        }
    }

    pub fn market_chart_resolution(self) -> &'static str {
        if self.lookback_days() <= 1 {
            "hourly"
        } else {
            "daily"
        }
    }

    /// Candle interval used by the exchange snapshot. Kept apart from
    /// `lookback_days`; the two sources do not share a resolution table.
    pub fn kline_interval(self) -> KlineInterval {
        match self {
            Self::D1 => KlineInterval::H1,
            Self::D7 => KlineInterval::H4,
            Self::D30 | Self::D90 => KlineInterval::D1,
            Self::Y1 => KlineInterval::W1,
        }
    }

    /// Candle count for the exchange snapshot, also the rolling window cap.
    pub fn kline_limit(self) -> usize {
        match self {
            Self::D1 => 24,
            Self::D7 => 42,
            Self::D30 => 30,
            Self::D90 => 90,
            Self::Y1 => 52,
        }
    }

    pub fn max_chart_ticks(self) -> u8 {
        match self {
            Self::D1 => 6,
            Self::D7 => 7,
            Self::D30 => 8,
            Self::D90 => 10,
            Self::Y1 => 12,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KlineInterval {
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl KlineInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub timestamp: i64,
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp: i64, price: f64) -> Self {
        Self { timestamp, price }
    }

    pub fn is_valid(&self) -> bool {
        self.timestamp > 0 && self.price.is_finite() && self.price >= 0.0
    }
}

/// Non-empty series ordered by strictly increasing timestamp.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(transparent)]
pub struct HistoricalSeries(Vec<PricePoint>);

impl HistoricalSeries {
    /// Drops invalid points, orders by timestamp and keeps the last point for
    /// duplicated timestamps.
    pub fn from_points(mut points: Vec<PricePoint>) -> Result<Self, AppError> {
        points.retain(PricePoint::is_valid);
        points.sort_by_key(|point| point.timestamp);

        let mut deduped: Vec<PricePoint> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => deduped.push(point),
            }
        }

        if deduped.is_empty() {
            return Err(AppError::EmptyResult(
                "No valid price data available for this time range".to_string(),
            ));
        }
        Ok(Self(deduped))
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.0.last()
    }

    pub fn into_points(self) -> Vec<PricePoint> {
        self.0
    }
}

/// Bounded buffer of the most recent points, truncated from the front.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow {
    points: VecDeque<PricePoint>,
    cap: usize,
}

impl RollingWindow {
    pub fn new(cap: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(cap),
            cap: cap.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Replaces the contents with a snapshot, keeping live points that are
    /// newer than the snapshot's last point.
    pub fn seed(&mut self, series: &HistoricalSeries) {
        let newest_seeded = series.latest().map(|point| point.timestamp).unwrap_or(i64::MIN);
        let live: Vec<PricePoint> = self
            .points
            .iter()
            .copied()
            .filter(|point| point.timestamp > newest_seeded)
            .collect();

        self.points.clear();
        self.points.extend(series.points().iter().copied());
        self.points.extend(live);
        self.truncate_front();
    }

    /// Appends a point, bumping its timestamp past the previous one when the
    /// wall clock did not advance.
    pub fn push(&mut self, mut point: PricePoint) -> PricePoint {
        if let Some(last) = self.points.back() {
            if point.timestamp <= last.timestamp {
                point.timestamp = last.timestamp.saturating_add(1);
            }
        }
        self.points.push_back(point);
        self.truncate_front();
        point
    }

    pub fn latest(&self) -> Option<PricePoint> {
        self.points.back().copied()
    }

    pub fn to_vec(&self) -> Vec<PricePoint> {
        self.points.iter().copied().collect()
    }

    fn truncate_front(&mut self) {
        while self.points.len() > self.cap {
            self.points.pop_front();
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpotQuote {
    pub price: f64,
    pub change_24h_pct: f64,
    pub last_updated_ms: i64,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct KlineWire(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
    pub String,
    pub u64,
    pub String,
    pub String,
    pub String,
);

impl TryFrom<KlineWire> for PricePoint {
    type Error = AppError;

    fn try_from(value: KlineWire) -> Result<Self, Self::Error> {
        let close = value.4.parse::<f64>()?;
        if !close.is_finite() || close < 0.0 {
            return Err(AppError::MalformedResponse(
                "kline close must be finite and non-negative".to_string(),
            ));
        }
        Ok(Self {
            timestamp: value.0,
            price: close,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TradeWire {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "p")]
    pub price: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeEvent {
    pub event_time: i64,
    pub price: f64,
}

impl TryFrom<TradeWire> for TradeEvent {
    type Error = AppError;

    fn try_from(value: TradeWire) -> Result<Self, Self::Error> {
        if value.event_type != "trade" {
            return Err(AppError::MalformedResponse(format!(
                "unexpected event type '{}' for trade stream",
                value.event_type
            )));
        }

        let price = value.price.parse::<f64>()?;
        if !price.is_finite() || price < 0.0 {
            return Err(AppError::MalformedResponse(
                "trade price must be finite and non-negative".to_string(),
            ));
        }

        Ok(Self {
            event_time: value.event_time,
            price,
        })
    }
}

pub fn parse_trade_payload(payload: &mut [u8]) -> Result<TradeEvent, AppError> {
    let wire: TradeWire = simd_json::serde::from_slice(payload)?;
    wire.try_into()
}

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
