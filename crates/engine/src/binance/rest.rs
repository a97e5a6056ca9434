use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use common::{Candle, CandleSource, Error, ExchangeNetwork, Interval, Result};

const MAINNET_URL: &str = "https://api.binance.com";
const TESTNET_URL: &str = "https://testnet.binance.vision";

/// Binance caps one klines response at this many rows.
const KLINES_PAGE_LIMIT: usize = 1000;

/// REST client for Binance market data. Only the public klines endpoint is used.
pub struct BinanceClient {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

impl BinanceClient {
    pub fn new(network: ExchangeNetwork, api_key: Option<String>) -> Result<Self> {
        let base_url = match network {
            ExchangeNetwork::Mainnet => MAINNET_URL,
            ExchangeNetwork::Testnet => TESTNET_URL,
        };
        Self::with_base_url(base_url, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key,
            http,
        })
    }

    async fn klines_page(
        &self,
        symbol: &str,
        interval: Interval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>> {
        let url = Url::parse_with_params(
            &format!("{}/api/v3/klines", self.base_url),
            &[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("startTime", start_ms.to_string()),
                ("endTime", end_ms.to_string()),
                ("limit", KLINES_PAGE_LIMIT.to_string()),
            ],
        )
        .map_err(|e| Error::Config(format!("bad exchange URL: {e}")))?;

        let mut request = self.http.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::TransientFetch(format!("{symbol}: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::TransientFetch(format!("{symbol}: {e}")))?;

        if !status.is_success() {
            return Err(Error::TransientFetch(format!("{symbol}: HTTP {status}: {body}")));
        }
        parse_klines(&body)
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        lookback: Duration,
    ) -> Result<Vec<Candle>> {
        let end_ms = Utc::now().timestamp_millis();
        let mut start_ms = end_ms - lookback.as_millis() as i64;
        let step_ms = interval.duration().as_millis() as i64;

        let mut candles: Vec<Candle> = Vec::new();
        loop {
            let page = self.klines_page(symbol, interval, start_ms, end_ms).await?;
            let full = page.len() >= KLINES_PAGE_LIMIT;
            let last_open = page.last().map(|c| c.open_time.timestamp_millis());
            candles.extend(page);

            match last_open {
                Some(open) if full && open + step_ms < end_ms => start_ms = open + step_ms,
                _ => break,
            }
        }

        debug!(symbol, %interval, count = candles.len(), "Fetched klines");
        Ok(candles)
    }
}

// ─── Response types ──────────────────────────────────────────────────────────

/// One klines row:
/// `[openTime, open, high, low, close, volume, closeTime, quoteVolume,
///   trades, takerBuyBase, takerBuyQuote, ignore]`.
/// Prices and volume arrive as decimal strings.
#[derive(Deserialize)]
struct KlineRow(
    i64,
    String,
    String,
    String,
    String,
    String,
    #[serde(default)] IgnoredAny,
    #[serde(default)] IgnoredAny,
    #[serde(default)] IgnoredAny,
    #[serde(default)] IgnoredAny,
    #[serde(default)] IgnoredAny,
    #[serde(default)] IgnoredAny,
);

impl KlineRow {
    fn into_candle(self) -> Result<Candle> {
        let open_ms = self.0;
        let open_time: DateTime<Utc> = Utc
            .timestamp_millis_opt(open_ms)
            .single()
            .ok_or_else(|| Error::TransientFetch(format!("kline open time out of range: {open_ms}")))?;

        Ok(Candle {
            open_time,
            open: decimal(&self.1, "open")?,
            high: decimal(&self.2, "high")?,
            low: decimal(&self.3, "low")?,
            close: decimal(&self.4, "close")?,
            volume: decimal(&self.5, "volume")?,
        })
    }
}

fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<KlineRow> = serde_json::from_str(body)
        .map_err(|e| Error::TransientFetch(format!("malformed klines payload: {e}")))?;

    rows.into_iter().map(KlineRow::into_candle).collect()
}

fn decimal(raw: &str, field: &str) -> Result<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::TransientFetch(format!("kline {field} is not a number: {raw:?}")))
}
