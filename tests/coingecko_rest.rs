use crypto_converter_lib::error::AppError;
use crypto_converter_lib::market::client::{RateGate, RestClient, RetryPolicy};
use crypto_converter_lib::market::coingecko::fetch_spot_quote;
use crypto_converter_lib::market::history::HistoryFetcher;
use crypto_converter_lib::market::types::{PricePoint, TimeFrame};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

async fn setup(max_retries: u32) -> (MockServer, RestClient) {
    let mock_server = MockServer::start().await;
    let client = RestClient::new(
        reqwest::Client::new(),
        mock_server.uri(),
        Arc::new(RateGate::new(Duration::ZERO)),
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(10),
        },
    );
    (mock_server, client)
}

#[tokio::test]
async fn fetches_spot_quote_with_24h_change() {
    let (mock_server, client) = setup(0).await;

    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .and(query_param("ids", "bitcoin"))
        .and(query_param("vs_currencies", "usd"))
        .and(query_param("include_24hr_change", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bitcoin": { "usd": 50000.0, "usd_24h_change": 2.5 }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let quote = fetch_spot_quote(&client, "bitcoin", "usd")
        .await
        .expect("quote should be returned");
    assert_eq!(quote.price, 50_000.0);
    assert_eq!(quote.change_24h_pct, 2.5);
}

#[tokio::test]
async fn missing_currency_key_is_no_data() {
    let (mock_server, client) = setup(0).await;

    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&mock_server)
        .await;

    let result = fetch_spot_quote(&client, "bitcoin", "usd").await;
    assert!(matches!(result, Err(AppError::EmptyResult(_))));
}

#[tokio::test]
async fn retries_server_errors_until_success() {
    let (mock_server, client) = setup(3).await;

    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ethereum": { "eur": 3000.0 }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let quote = fetch_spot_quote(&client, "ethereum", "eur")
        .await
        .expect("third attempt should succeed");
    assert_eq!(quote.price, 3_000.0);
    assert_eq!(quote.change_24h_pct, 0.0);
}

#[tokio::test]
async fn not_found_is_mapped_and_not_retried() {
    let (mock_server, client) = setup(3).await;

    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = fetch_spot_quote(&client, "bitcoin", "usd").await;
    let error = result.expect_err("404 should fail");
    assert!(matches!(error, AppError::NotFound));
    assert_eq!(
        error.to_string(),
        "Cryptocurrency not found. Please try another one."
    );
}

#[tokio::test]
async fn rate_limit_is_mapped() {
    let (mock_server, client) = setup(3).await;

    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = fetch_spot_quote(&client, "bitcoin", "usd").await;
    assert!(matches!(result, Err(AppError::RateLimited)));
}

#[tokio::test]
async fn history_is_sorted_and_filtered() {
    let (mock_server, client) = setup(0).await;

    Mock::given(method("GET"))
        .and(path("/coins/bitcoin/market_chart"))
        .and(query_param("vs_currency", "usd"))
        .and(query_param("days", "7"))
        .and(query_param("interval", "daily"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "prices": [
                [3000, 103.0],
                [1000, 101.0],
                [2000, "bad"],
                [2500, null],
                [2000, 102.0]
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let series = HistoryFetcher::new(client)
        .fetch("bitcoin", "usd", TimeFrame::D7)
        .await
        .expect("series should be returned");

    assert_eq!(
        series.points(),
        &[
            PricePoint::new(1_000, 101.0),
            PricePoint::new(2_000, 102.0),
            PricePoint::new(3_000, 103.0)
        ]
    );
}

#[tokio::test]
async fn one_day_history_uses_hourly_resolution() {
    let (mock_server, client) = setup(0).await;

    Mock::given(method("GET"))
        .and(path("/coins/ethereum/market_chart"))
        .and(query_param("days", "1"))
        .and(query_param("interval", "hourly"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "prices": [[1000, 1.0]]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let series = HistoryFetcher::new(client)
        .fetch("ethereum", "gbp", TimeFrame::D1)
        .await;
    // vs_currency is not matched above, only the window parameters.
    assert_eq!(series.expect("series").len(), 1);
}

#[tokio::test]
async fn history_without_valid_points_is_an_empty_result() {
    let (mock_server, client) = setup(0).await;

    Mock::given(method("GET"))
        .and(path("/coins/bitcoin/market_chart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "prices": [[1000, "x"], [2000, null]]
        })))
        .mount(&mock_server)
        .await;

    let result = HistoryFetcher::new(client)
        .fetch("bitcoin", "usd", TimeFrame::D30)
        .await;
    let error = result.expect_err("no valid points");
    assert!(matches!(error, AppError::EmptyResult(_)));
    assert_eq!(
        error.to_string(),
        "No valid price data available for this time range"
    );
}

#[tokio::test]
async fn invalid_identifiers_never_reach_the_server() {
    let (mock_server, client) = setup(0).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let result = HistoryFetcher::new(client)
        .fetch("not-a-coin", "usd", TimeFrame::D7)
        .await;
    assert!(matches!(result, Err(AppError::InvalidArgument(_))));
}
