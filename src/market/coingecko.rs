use crate::error::AppError;
use crate::market::client::RestClient;
use crate::market::types::{now_unix_ms, PricePoint, SpotQuote, TimeFrame};
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::collections::HashMap;

fn simple_price_endpoint(base_url: &str, asset_id: &str, reference_id: &str) -> String {
    format!("{base_url}/simple/price")
        + &format!("?ids={asset_id}&vs_currencies={reference_id}&include_24hr_change=true")
}

fn market_chart_endpoint(
    base_url: &str,
    asset_id: &str,
    reference_id: &str,
    time_frame: TimeFrame,
) -> String {
    let days = time_frame.lookback_days();
    let resolution = time_frame.market_chart_resolution();
    format!("{base_url}/coins/{asset_id}/market_chart")
        + &format!("?vs_currency={reference_id}&days={days}&interval={resolution}")
}

/// `{"bitcoin": {"usd": 50000.0, "usd_24h_change": 1.2}}`
pub type SimplePriceWire = HashMap<String, HashMap<String, Option<f64>>>;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
#[allow(dead_code)]
pub enum LooseNumber {
    Number(f64),
    Other(IgnoredAny),
}

impl LooseNumber {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MarketChartWire {
    pub prices: Option<Vec<Vec<LooseNumber>>>,
}

pub fn spot_quote_from_wire(
    payload: SimplePriceWire,
    asset_id: &str,
    reference_id: &str,
) -> Result<SpotQuote, AppError> {
    let no_data =
        || AppError::EmptyResult("No price data available for this currency pair.".to_string());

    let fields = payload.get(asset_id).ok_or_else(no_data)?;
    let price = fields
        .get(reference_id)
        .copied()
        .flatten()
        .filter(|price| price.is_finite() && *price >= 0.0)
        .ok_or_else(no_data)?;
    let change_24h_pct = fields
        .get(&format!("{reference_id}_24h_change"))
        .copied()
        .flatten()
        .filter(|change| change.is_finite())
        .unwrap_or(0.0);

    Ok(SpotQuote {
        price,
        change_24h_pct,
        last_updated_ms: now_unix_ms(),
    })
}

/// Keeps the `[timestamp, price]` pairs whose price is a number. Ordering and
/// emptiness are the series' concern.
pub fn points_from_market_chart(payload: MarketChartWire) -> Result<Vec<PricePoint>, AppError> {
    let prices = payload.prices.ok_or_else(|| {
        AppError::MalformedResponse("market chart payload has no prices".to_string())
    })?;

    Ok(prices
        .iter()
        .filter_map(|pair| match pair.as_slice() {
            [timestamp, price, ..] => {
                let timestamp = timestamp.as_f64()?;
                let price = price.as_f64()?;
                if price.is_nan() || timestamp <= 0.0 {
                    return None;
                }
                Some(PricePoint::new(timestamp as i64, price))
            }
            _ => None,
        })
        .collect())
}

pub async fn fetch_spot_quote(
    client: &RestClient,
    asset_id: &str,
    reference_id: &str,
) -> Result<SpotQuote, AppError> {
    let endpoint = simple_price_endpoint(client.base_url(), asset_id, reference_id);
    let payload = client.get_json::<SimplePriceWire>(&endpoint).await?;
    spot_quote_from_wire(payload, asset_id, reference_id)
}

pub async fn fetch_market_chart(
    client: &RestClient,
    asset_id: &str,
    reference_id: &str,
    time_frame: TimeFrame,
) -> Result<Vec<PricePoint>, AppError> {
    let endpoint = market_chart_endpoint(client.base_url(), asset_id, reference_id, time_frame);
    let payload = client.get_json::<MarketChartWire>(&endpoint).await?;
    points_from_market_chart(payload)
}
