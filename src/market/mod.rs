pub mod binance;
pub mod client;
pub mod coingecko;
pub mod history;
pub mod poller;
pub mod stream;
pub mod types;
