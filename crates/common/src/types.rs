use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// One OHLCV bucket returned by the exchange, oldest first within a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// All-zero candle stamped `at`. Stands in for an empty fetch so the
    /// indicator math always has one bar to work on; it evaluates as flat.
    pub fn flat(at: DateTime<Utc>) -> Self {
        Self {
            open_time: at,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            volume: 0.0,
        }
    }
}

/// Kline bucket size. Only the sizes Binance serves are constructible via `FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    Minutes(u32),
    Hours(u32),
    Days(u32),
}

impl Interval {
    pub fn duration(&self) -> Duration {
        match *self {
            Interval::Minutes(n) => Duration::from_secs(u64::from(n) * 60),
            Interval::Hours(n) => Duration::from_secs(u64::from(n) * 3_600),
            Interval::Days(n) => Duration::from_secs(u64::from(n) * 86_400),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interval::Minutes(n) => write!(f, "{n}m"),
            Interval::Hours(n) => write!(f, "{n}h"),
            Interval::Days(n) => write!(f, "{n}d"),
        }
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || Error::Config(format!("unsupported kline interval '{s}'"));
        if s.len() < 2 {
            return Err(invalid());
        }
        let (count, unit) = s.split_at(s.len() - 1);
        let count: u32 = count.parse().map_err(|_| invalid())?;
        let interval = match unit {
            "m" => Interval::Minutes(count),
            "h" => Interval::Hours(count),
            "d" => Interval::Days(count),
            _ => return Err(invalid()),
        };
        let supported = matches!(
            interval,
            Interval::Minutes(1 | 3 | 5 | 15 | 30)
                | Interval::Hours(1 | 2 | 4 | 6 | 8 | 12)
                | Interval::Days(1 | 3)
        );
        if supported {
            Ok(interval)
        } else {
            Err(invalid())
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.to_string()
    }
}

/// What a subscription was last told about a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    #[default]
    None,
    Buy,
    Sell,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::None => write!(f, "none"),
            SignalKind::Buy => write!(f, "buy"),
            SignalKind::Sell => write!(f, "sell"),
        }
    }
}

/// Crossover verdict for one symbol at one refresh.
/// `buy` and `sell` are never both set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalState {
    pub buy: bool,
    pub sell: bool,
    /// Fast line at the last bar.
    pub fast: f64,
    /// Reference line at the last bar.
    pub signal: f64,
    /// Open time of the last candle used.
    pub as_of: DateTime<Utc>,
    /// When this verdict was computed. Entries kept across failed cycles
    /// keep their original stamp.
    pub refreshed_at: DateTime<Utc>,
}

impl SignalState {
    /// A verdict computed now. Panics in debug builds if both flags are set.
    pub fn new(buy: bool, sell: bool, fast: f64, signal: f64, as_of: DateTime<Utc>) -> Self {
        debug_assert!(!(buy && sell));
        Self {
            buy,
            sell,
            fast,
            signal,
            as_of,
            refreshed_at: Utc::now(),
        }
    }

    pub fn flat(fast: f64, signal: f64, as_of: DateTime<Utc>) -> Self {
        Self::new(false, false, fast, signal, as_of)
    }

    pub fn kind(&self) -> SignalKind {
        if self.buy {
            SignalKind::Buy
        } else if self.sell {
            SignalKind::Sell
        } else {
            SignalKind::None
        }
    }
}

/// Everything the refresher knows after one cycle. Published as a whole,
/// never edited in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub states: BTreeMap<String, SignalState>,
    /// False when the producing cycle hit an unexpected error. Alerts are
    /// suppressed while this is false.
    pub healthy: bool,
    pub generated_at: DateTime<Utc>,
    /// Refresh cycle that produced this snapshot; 0 before the first cycle.
    pub cycle: u64,
    pub last_error: Option<String>,
}

impl SignalSnapshot {
    /// Placeholder published before the first refresh completes.
    pub fn empty() -> Self {
        Self {
            states: BTreeMap::new(),
            healthy: true,
            generated_at: Utc::now(),
            cycle: 0,
            last_error: None,
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&SignalState> {
        self.states.get(symbol)
    }
}

/// Which symbols a subscription follows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SymbolSelector {
    Symbol(String),
    All,
}

impl SymbolSelector {
    pub fn matches(&self, symbol: &str) -> bool {
        match self {
            SymbolSelector::All => true,
            SymbolSelector::Symbol(s) => s == symbol,
        }
    }
}

impl std::fmt::Display for SymbolSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolSelector::Symbol(s) => write!(f, "{s}"),
            SymbolSelector::All => write!(f, "all"),
        }
    }
}

impl FromStr for SymbolSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Other("empty symbol".to_string()));
        }
        if s.eq_ignore_ascii_case("all") {
            return Ok(SymbolSelector::All);
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Other(format!("invalid symbol '{s}'")));
        }
        Ok(SymbolSelector::Symbol(s.to_ascii_uppercase()))
    }
}

/// A chat bound to a selector. `subscriber_id` is the Telegram chat id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber_id: i64,
    pub selector: SymbolSelector,
}

impl Subscription {
    pub fn new(subscriber_id: i64, selector: SymbolSelector) -> Self {
        Self {
            subscriber_id,
            selector,
        }
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.subscriber_id, self.selector)
    }
}

/// When a subscription may receive the same alert again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// A flat state clears the last alert, so the next crossover alerts again.
    #[default]
    ResetOnNone,
    /// Only the opposite alert re-arms a symbol.
    OppositeOnly,
}

/// Which Binance deployment candles are pulled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeNetwork {
    Testnet,
    Mainnet,
}

impl std::fmt::Display for ExchangeNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeNetwork::Testnet => write!(f, "testnet"),
            ExchangeNetwork::Mainnet => write!(f, "mainnet"),
        }
    }
}
