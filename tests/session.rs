use crypto_converter_lib::config::ConverterArgs;
use crypto_converter_lib::market::types::TimeFrame;
use crypto_converter_lib::session::{ConverterSession, ConverterView, PriceSource};
use serde_json::json;
use std::time::Duration;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

async fn wait_for(
    session: &mut ConverterSession,
    predicate: impl Fn(&ConverterView) -> bool,
) -> ConverterView {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut view = session.view();
        while !predicate(&view) {
            view = session.changed().await.expect("session should be running");
        }
        view
    })
    .await
    .expect("view condition should be reached")
}

async fn mount_bitcoin_eur(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .and(query_param("ids", "bitcoin"))
        .and(query_param("vs_currencies", "eur"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bitcoin": { "eur": 40000.0, "eur_24h_change": 3.5 }
        })))
        .mount(mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/coins/bitcoin/market_chart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "prices": [[1000, 39000.0], [2000, 40000.0]]
        })))
        .mount(mock_server)
        .await;
}

fn start_session(mock_server: &MockServer) -> ConverterSession {
    let config = ConverterArgs {
        coingecko_base_url: Some(mock_server.uri()),
        reference_id: Some("eur".to_string()),
        min_call_spacing_ms: Some(0),
        max_retries: Some(0),
        ..ConverterArgs::default()
    }
    .normalize()
    .expect("config should be valid");
    ConverterSession::start(config).expect("session should start")
}

#[tokio::test]
async fn converts_with_polled_price_and_tracks_edits() {
    let mock_server = MockServer::start().await;
    mount_bitcoin_eur(&mock_server).await;
    let mut session = start_session(&mock_server);

    let view = wait_for(&mut session, |view| !view.loading && view.price.is_some()).await;
    assert_eq!(view.source, PriceSource::Poller);
    assert_eq!(view.from.id, "bitcoin");
    assert_eq!(view.to.id, "eur");
    assert_eq!(view.from_amount, "1");
    assert_eq!(view.to_amount, "40000.00");
    assert_eq!(view.change_24h_pct, Some(3.5));
    assert_eq!(view.history.len(), 2);
    assert_eq!(view.time_frame, TimeFrame::D30);
    assert_eq!(view.max_chart_ticks, 8);

    session.edit_from("2").await.expect("edit");
    let view = wait_for(&mut session, |view| view.from_amount == "2").await;
    assert_eq!(view.to_amount, "80000.00");

    session.edit_to("100").await.expect("edit");
    let view = wait_for(&mut session, |view| view.to_amount == "100").await;
    assert_eq!(view.from_amount, "0.0025");

    // Nine fraction digits exceed the asset precision and are ignored.
    session.edit_from("1.123456789").await.expect("edit");
    session.edit_from("").await.expect("edit");
    let view = wait_for(&mut session, |view| view.from_amount.is_empty()).await;
    assert!(view.to_amount.is_empty());

    session.shutdown().await;
}

#[tokio::test]
async fn history_failure_does_not_hide_price() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bitcoin": { "eur": 40000.0 }
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/coins/bitcoin/market_chart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prices": [] })))
        .mount(&mock_server)
        .await;
    let mut session = start_session(&mock_server);

    let view = wait_for(&mut session, |view| !view.loading && view.error.is_some()).await;
    assert_eq!(view.price, Some(40_000.0));
    assert_eq!(view.to_amount, "40000.00");
    assert_eq!(
        view.error.as_deref(),
        Some("No valid price data available for this time range")
    );
    assert!(view.history.is_empty());

    session.shutdown().await;
}

#[tokio::test]
async fn swap_resets_price_and_moves_reference_to_from_side() {
    let mock_server = MockServer::start().await;
    mount_bitcoin_eur(&mock_server).await;
    let mut session = start_session(&mock_server);
    wait_for(&mut session, |view| !view.loading && view.price.is_some()).await;

    session.swap().await.expect("swap");
    let view = wait_for(&mut session, |view| view.from.id == "eur").await;
    assert_eq!(view.to.id, "bitcoin");

    // The reversed pair has no mocked data; unmatched requests answer 404.
    let view = wait_for(&mut session, |view| !view.loading && view.error.is_some()).await;
    assert_eq!(view.price, None);
    assert_eq!(
        view.error.as_deref(),
        Some("Cryptocurrency not found. Please try another one.")
    );

    // A reference currency is not selectable on the FROM side.
    session.select_from("usd").await.expect("select");
    session.select_to("eur").await.expect("select");
    let view = wait_for(&mut session, |view| view.to.id == "eur").await;
    assert_eq!(view.from.id, "eur");

    session.shutdown().await;
}

#[tokio::test]
async fn time_frame_change_refetches_history() {
    let mock_server = MockServer::start().await;
    mount_bitcoin_eur(&mock_server).await;
    let mut session = start_session(&mock_server);
    wait_for(&mut session, |view| !view.loading && view.price.is_some()).await;

    session
        .select_time_frame(TimeFrame::Y1)
        .await
        .expect("select time frame");
    let view = wait_for(&mut session, |view| {
        view.time_frame == TimeFrame::Y1 && !view.loading
    })
    .await;
    assert_eq!(view.max_chart_ticks, 12);
    assert_eq!(view.history.len(), 2);

    let requests = mock_server
        .received_requests()
        .await
        .expect("recording enabled");
    assert!(requests.iter().any(|request| {
        request.url.path() == "/coins/bitcoin/market_chart"
            && request.url.query().is_some_and(|query| query.contains("days=365"))
    }));

    session.shutdown().await;
}

#[tokio::test]
async fn stale_history_is_discarded_after_time_frame_change() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bitcoin": { "eur": 40000.0 }
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/coins/bitcoin/market_chart"))
        .and(query_param("days", "30"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "prices": [[1000, 1.0], [2000, 2.0]] }))
                .set_delay(Duration::from_millis(1_500)),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/coins/bitcoin/market_chart"))
        .and(query_param("days", "365"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "prices": [[5000, 5.0], [6000, 6.0], [7000, 7.0]]
        })))
        .mount(&mock_server)
        .await;
    let mut session = start_session(&mock_server);

    // The 30D request is still in flight when the timeframe changes.
    session
        .select_time_frame(TimeFrame::Y1)
        .await
        .expect("select time frame");
    let view = wait_for(&mut session, |view| {
        view.time_frame == TimeFrame::Y1 && !view.loading && !view.history.is_empty()
    })
    .await;
    let yearly: Vec<f64> = view.history.iter().map(|point| point.price).collect();
    assert_eq!(yearly, vec![5.0, 6.0, 7.0]);

    // Outlast the delayed 30D response.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let view = session.view();
    assert_eq!(view.time_frame, TimeFrame::Y1);
    assert_eq!(
        view.history.iter().map(|point| point.price).collect::<Vec<_>>(),
        vec![5.0, 6.0, 7.0]
    );
    assert!(view.error.is_none());

    session.shutdown().await;
}
