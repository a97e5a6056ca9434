use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::{DedupPolicy, Error, Interval, Result};

use crate::evaluator::{Confirmation, SignalEvaluator, SignalRule};

/// Watch-list and signal rule file (TOML).
///
/// Example `config/signals.toml`:
/// ```toml
/// symbols = ["BTCUSDT", "ETHUSDT"]
/// interval = "1h"
/// lookback_hours = 240
/// confirmation = "single"
/// dedup = "reset_on_none"
///
/// [rule]
/// type = "ema"
/// fast = 5
/// slow = 30
/// signal = 10
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    /// Symbols refreshed every cycle, e.g. "BTCUSDT".
    pub symbols: Vec<String>,
    /// Kline bucket size.
    #[serde(default = "default_interval")]
    pub interval: Interval,
    /// How far back each fetch reaches.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,
    #[serde(default)]
    pub rule: SignalRule,
    #[serde(default)]
    pub confirmation: Confirmation,
    #[serde(default)]
    pub dedup: DedupPolicy,
}

fn default_interval() -> Interval {
    Interval::Hours(1)
}

fn default_lookback_hours() -> u64 {
    240
}

impl StrategyFileConfig {
    /// Load from a TOML file. Exits process on error.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path).unwrap_or_else(|e| {
            panic!("Failed to read strategy config at '{path}': {e}")
        });
        Self::parse(&content).unwrap_or_else(|e| {
            panic!("Failed to parse strategy config at '{path}': {e}")
        })
    }

    /// Parse and normalise: symbols are upper-cased and de-duplicated in order.
    pub fn parse(content: &str) -> Result<Self> {
        let mut cfg: StrategyFileConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

        let mut symbols: Vec<String> = Vec::with_capacity(cfg.symbols.len());
        for raw in &cfg.symbols {
            let symbol = raw.trim().to_ascii_uppercase();
            if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::Config(format!("invalid symbol '{raw}'")));
            }
            if symbol == "ALL" {
                return Err(Error::Config("'all' is reserved and cannot be watched".into()));
            }
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        if symbols.is_empty() {
            return Err(Error::Config("symbols must list at least one symbol".into()));
        }
        if cfg.lookback_hours == 0 {
            return Err(Error::Config("lookback_hours must be greater than zero".into()));
        }
        cfg.symbols = symbols;

        // Surface bad periods at load time rather than on the first cycle.
        cfg.evaluator()?;
        Ok(cfg)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_hours * 3_600)
    }

    pub fn evaluator(&self) -> Result<SignalEvaluator> {
        SignalEvaluator::new(self.rule, self.confirmation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::MaKind;

    #[test]
    fn minimal_file_uses_defaults() {
        let cfg = StrategyFileConfig::parse(r#"symbols = ["btcusdt", "ETHUSDT", "BTCUSDT"]"#)
            .unwrap();
        assert_eq!(cfg.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(cfg.interval, Interval::Hours(1));
        assert_eq!(cfg.lookback(), Duration::from_secs(240 * 3_600));
        assert_eq!(cfg.rule, SignalRule::default());
        assert_eq!(cfg.confirmation, Confirmation::Single);
        assert_eq!(cfg.dedup, DedupPolicy::ResetOnNone);
    }

    #[test]
    fn full_file_parses_rule_and_modes() {
        let cfg = StrategyFileConfig::parse(
            r#"
            symbols = ["BTCUSDT"]
            interval = "15m"
            lookback_hours = 48
            confirmation = "two_bar"
            dedup = "opposite_only"

            [rule]
            type = "macd"
            fast = 12
            slow = 26
            signal = 9
            kind = "sma"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.interval, Interval::Minutes(15));
        assert_eq!(cfg.confirmation, Confirmation::TwoBar);
        assert_eq!(cfg.dedup, DedupPolicy::OppositeOnly);
        assert_eq!(
            cfg.rule,
            SignalRule::Macd {
                fast: 12,
                slow: 26,
                signal: 9,
                kind: MaKind::Sma
            }
        );
    }

    #[test]
    fn rejects_bad_files() {
        assert!(StrategyFileConfig::parse("symbols = []").is_err());
        assert!(StrategyFileConfig::parse(r#"symbols = ["BTC-USD"]"#).is_err());
        assert!(StrategyFileConfig::parse(r#"symbols = ["all"]"#).is_err());
        assert!(StrategyFileConfig::parse(
            r#"symbols = ["BTCUSDT"]
               interval = "7h""#
        )
        .is_err());
        assert!(StrategyFileConfig::parse(
            r#"symbols = ["BTCUSDT"]
               [rule]
               type = "ema"
               fast = 0
               slow = 30
               signal = 10"#
        )
        .is_err());
    }
}
