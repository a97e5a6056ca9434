use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{Candle, Error, Result, SignalState};

use crate::indicators::{compute_ema, compute_macd, MaKind};

/// Which pair of lines is compared to decide buy/sell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalRule {
    /// EMA fast line against the EMA signal line.
    Ema {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    /// MACD line against its signal line.
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
        #[serde(default)]
        kind: MaKind,
    },
}

impl Default for SignalRule {
    fn default() -> Self {
        SignalRule::Ema {
            fast: 5,
            slow: 30,
            signal: 10,
        }
    }
}

/// How many trailing bars must agree before a crossover counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// Last bar only.
    #[default]
    Single,
    /// Last two bars must both agree.
    TwoBar,
}

impl Confirmation {
    fn depth(self) -> usize {
        match self {
            Confirmation::Single => 1,
            Confirmation::TwoBar => 2,
        }
    }
}

/// Turns a candle window into a `SignalState`. Stateless; safe to share.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalEvaluator {
    rule: SignalRule,
    confirmation: Confirmation,
}

impl SignalEvaluator {
    pub fn new(rule: SignalRule, confirmation: Confirmation) -> Result<Self> {
        let (fast, slow, signal) = match rule {
            SignalRule::Ema { fast, slow, signal } | SignalRule::Macd { fast, slow, signal, .. } => {
                (fast, slow, signal)
            }
        };
        if fast == 0 || slow == 0 || signal == 0 {
            return Err(Error::Config("indicator periods must be at least 1".into()));
        }
        if let SignalRule::Macd { .. } = rule {
            if fast >= slow {
                return Err(Error::Config(
                    "MACD fast period must be less than slow period".into(),
                ));
            }
        }
        Ok(Self { rule, confirmation })
    }

    pub fn rule(&self) -> SignalRule {
        self.rule
    }

    pub fn confirmation(&self) -> Confirmation {
        self.confirmation
    }

    /// Evaluate the crossover on the latest bar(s) of `candles` (oldest first).
    ///
    /// A window shorter than the confirmation depth evaluates as flat.
    pub fn evaluate(&self, candles: &[Candle]) -> Result<SignalState> {
        let last_candle = candles.last().ok_or(Error::InsufficientData {
            needed: 1,
            got: 0,
        })?;
        let as_of = last_candle.open_time;

        let (fast_line, ref_line) = self.lines(candles)?;
        let n = fast_line.len();
        let fast_now = fast_line[n - 1]
            .ok_or(Error::InsufficientData { needed: self.warmup(), got: n })?;
        let ref_now = ref_line[n - 1]
            .ok_or(Error::InsufficientData { needed: self.warmup(), got: n })?;

        let depth = self.confirmation.depth();
        if n < depth {
            return Ok(SignalState::flat(fast_now, ref_now, as_of));
        }

        let mut above = true;
        let mut below = true;
        for i in n - depth..n {
            let (f, r) = match (fast_line[i], ref_line[i]) {
                (Some(f), Some(r)) => (f, r),
                _ => {
                    return Err(Error::InsufficientData {
                        needed: self.warmup() + depth - 1,
                        got: n,
                    })
                }
            };
            above &= f > r;
            below &= f < r;
        }

        debug!(fast = fast_now, signal = ref_now, above, below, "Crossover evaluated");
        Ok(SignalState::new(above, below, fast_now, ref_now, as_of))
    }

    fn lines(&self, candles: &[Candle]) -> Result<(Vec<Option<f64>>, Vec<Option<f64>>)> {
        match self.rule {
            SignalRule::Ema { fast, slow, signal } => {
                let s = compute_ema(candles, fast, slow, signal)?;
                Ok((
                    s.fast.into_iter().map(Some).collect(),
                    s.signal.into_iter().map(Some).collect(),
                ))
            }
            SignalRule::Macd { fast, slow, signal, kind } => {
                let s = compute_macd(candles, fast, slow, signal, kind)?;
                Ok((s.macd, s.signal))
            }
        }
    }

    /// Bars needed before the compared lines are defined.
    fn warmup(&self) -> usize {
        match self.rule {
            SignalRule::Ema { .. } => 1,
            SignalRule::Macd { slow, signal, .. } => slow + signal - 1,
        }
    }
}

impl Default for SignalEvaluator {
    fn default() -> Self {
        Self {
            rule: SignalRule::default(),
            confirmation: Confirmation::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::tests::candles_from;

    fn ema_rule(fast: usize, slow: usize, signal: usize) -> SignalRule {
        SignalRule::Ema { fast, slow, signal }
    }

    #[test]
    fn rising_closes_give_buy() {
        let closes: Vec<f64> = (100..=110).map(f64::from).collect();
        let eval = SignalEvaluator::new(ema_rule(2, 5, 10), Confirmation::Single).unwrap();
        let state = eval.evaluate(&candles_from(&closes)).unwrap();
        assert!(state.buy);
        assert!(!state.sell);
        assert!(state.fast > state.signal);
    }

    #[test]
    fn falling_closes_give_sell() {
        let closes: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
        let state = SignalEvaluator::default().evaluate(&candles_from(&closes)).unwrap();
        assert!(state.sell);
        assert!(!state.buy);
    }

    #[test]
    fn equal_lines_are_flat() {
        let state = SignalEvaluator::default()
            .evaluate(&candles_from(&[42.0; 12]))
            .unwrap();
        assert!(!state.buy && !state.sell);
        assert_eq!(state.fast, 42.0);
        assert_eq!(state.signal, 42.0);
    }

    #[test]
    fn empty_window_is_insufficient() {
        assert!(matches!(
            SignalEvaluator::default().evaluate(&[]),
            Err(Error::InsufficientData { .. })
        ));
    }

    #[test]
    fn as_of_is_last_open_time() {
        let candles = candles_from(&[1.0, 2.0, 3.0]);
        let state = SignalEvaluator::default().evaluate(&candles).unwrap();
        assert_eq!(state.as_of, candles[2].open_time);
    }

    #[test]
    fn two_bar_needs_agreement_on_both_bars() {
        // Long decline, then a single sharp up bar: fast crosses above signal
        // only on the last bar.
        let mut closes: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
        closes.push(260.0);
        let candles = candles_from(&closes);

        let single = SignalEvaluator::new(ema_rule(2, 5, 10), Confirmation::Single)
            .unwrap()
            .evaluate(&candles)
            .unwrap();
        let confirmed = SignalEvaluator::new(ema_rule(2, 5, 10), Confirmation::TwoBar)
            .unwrap()
            .evaluate(&candles)
            .unwrap();

        assert!(single.buy);
        assert!(!confirmed.buy && !confirmed.sell);
    }

    #[test]
    fn two_bar_with_one_candle_is_flat() {
        let eval = SignalEvaluator::new(SignalRule::default(), Confirmation::TwoBar).unwrap();
        let state = eval.evaluate(&candles_from(&[10.0])).unwrap();
        assert!(!state.buy && !state.sell);
    }

    #[test]
    fn macd_rule_needs_warm_lines() {
        let rule = SignalRule::Macd {
            fast: 3,
            slow: 6,
            signal: 3,
            kind: MaKind::Sma,
        };
        let eval = SignalEvaluator::new(rule, Confirmation::Single).unwrap();
        assert!(matches!(
            eval.evaluate(&candles_from(&[1.0, 2.0, 3.0])),
            Err(Error::InsufficientData { .. })
        ));

        let closes: Vec<f64> = (0..30).map(|i| 100.0 + (i * i) as f64).collect();
        let state = eval.evaluate(&candles_from(&closes)).unwrap();
        assert!(state.buy, "accelerating prices should put MACD above its signal");
    }

    #[test]
    fn macd_rule_rejects_inverted_periods() {
        let rule = SignalRule::Macd {
            fast: 26,
            slow: 12,
            signal: 9,
            kind: MaKind::Ema,
        };
        assert!(matches!(
            SignalEvaluator::new(rule, Confirmation::Single),
            Err(Error::Config(_))
        ));
    }
}
