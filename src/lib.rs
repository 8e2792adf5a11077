pub mod config;
pub mod converter;
pub mod error;
pub mod market;
pub mod session;
pub mod state;

use config::ConverterArgs;
use error::AppError;
use session::ConverterSession;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Headless entry point: configuration comes from `CONVERTER_*` variables,
/// every published view is logged until Ctrl-C.
pub fn run() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ConverterArgs::from_env()?.normalize()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| AppError::Unknown(format!("failed to build runtime: {error}")))?;

    runtime.block_on(async move {
        let mut session = ConverterSession::start(config)?;
        loop {
            let view = tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                view = session.changed() => view?,
            };

            match &view.error {
                Some(message) => error!(
                    from = view.from.symbol,
                    to = view.to.symbol,
                    %message,
                    "conversion unavailable"
                ),
                None => info!(
                    from = view.from.symbol,
                    to = view.to.symbol,
                    from_amount = %view.from_display,
                    to_amount = %view.to_display,
                    price = ?view.price,
                    change_24h_pct = ?view.change_24h_pct,
                    loading = view.loading,
                    chart_points = view.history.len(),
                    time_frame = view.time_frame.as_str(),
                    "conversion updated"
                ),
            }
        }

        info!("shutting down");
        session.shutdown().await;
        Ok(())
    })
}
