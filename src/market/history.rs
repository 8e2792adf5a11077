use crate::converter::catalog;
use crate::error::AppError;
use crate::market::client::RestClient;
use crate::market::coingecko::fetch_market_chart;
use crate::market::types::{HistoricalSeries, TimeFrame};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HistoryFetcher {
    client: RestClient,
}

impl HistoryFetcher {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    pub async fn fetch(
        &self,
        asset_id: &str,
        reference_id: &str,
        time_frame: TimeFrame,
    ) -> Result<HistoricalSeries, AppError> {
        validate_pair(asset_id, reference_id)?;

        let points = fetch_market_chart(&self.client, asset_id, reference_id, time_frame).await?;
        let received = points.len();
        let series = HistoricalSeries::from_points(points)?;
        debug!(
            asset_id,
            reference_id,
            time_frame = time_frame.as_str(),
            received,
            kept = series.len(),
            "historical series fetched"
        );
        Ok(series)
    }
}

/// Rejects missing or unknown identifiers before any request is issued.
pub fn validate_pair(asset_id: &str, reference_id: &str) -> Result<(), AppError> {
    for (field, value) in [("asset", asset_id), ("reference", reference_id)] {
        if value.trim().is_empty() {
            return Err(AppError::InvalidArgument(format!("{field} id is missing")));
        }
        let known = catalog::find(value).is_some_and(|currency| currency.id == value);
        if !known {
            return Err(AppError::InvalidArgument(format!(
                "{field} id '{value}' is not a known currency id"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::client::{RateGate, RetryPolicy};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn validates_identifiers() {
        assert!(validate_pair("bitcoin", "usd").is_ok());
        assert!(validate_pair("usd", "bitcoin").is_ok());
        assert!(validate_pair("", "usd").is_err());
        assert!(validate_pair("bitcoin", " ").is_err());
        assert!(validate_pair("BTC", "usd").is_err());
        assert!(validate_pair("bitcoin", "zzz").is_err());
    }

    #[tokio::test]
    async fn invalid_pair_fails_before_any_request() {
        // Nothing listens on this address; a request would surface as a
        // network error rather than a validation error.
        let client = RestClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            Arc::new(RateGate::new(Duration::ZERO)),
            RetryPolicy::default(),
        );
        let fetcher = HistoryFetcher::new(client);

        let result = fetcher.fetch("", "usd", TimeFrame::D7).await;
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }
}
