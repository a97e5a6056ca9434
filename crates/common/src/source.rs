use std::time::Duration;

use async_trait::async_trait;

use crate::{Candle, Interval, Result};

/// Historical candle provider.
///
/// `BinanceClient` implements this against the public klines endpoint.
/// Tests plug in scripted sources.
///
/// Implementations report network, status and decode failures as
/// `Error::TransientFetch`; an empty window is `Ok(vec![])`, not an error.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Candles for `symbol` covering the last `lookback`, oldest first.
    async fn fetch(&self, symbol: &str, interval: Interval, lookback: Duration)
        -> Result<Vec<Candle>>;
}

/// Outbound message channel to a subscriber.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one message. `is_table` marks pre-rendered fixed-width text
    /// that the transport should display monospaced.
    async fn send(&self, subscriber_id: i64, text: &str, is_table: bool) -> Result<()>;
}
