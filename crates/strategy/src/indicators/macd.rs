use serde::{Deserialize, Serialize};

use common::{Candle, Error, Result};

use super::{check_period, closes};

/// MACD (Moving Average Convergence/Divergence) lines.
///
/// MACD line = MA(fast) − MA(slow), SIGNAL = MA(macd_line, signal).
/// Entries are `None` until the averages behind them have warmed up.
#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub ma_fast: Vec<Option<f64>>,
    pub ma_slow: Vec<Option<f64>>,
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
}

/// Averaging used for every MACD line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaKind {
    /// Bias-adjusted exponential mean, undefined until `span` observations.
    #[default]
    Ema,
    /// Trailing simple mean, undefined until the window is full.
    Sma,
}

pub fn compute_macd(
    candles: &[Candle],
    fast: usize,
    slow: usize,
    signal: usize,
    kind: MaKind,
) -> Result<MacdSeries> {
    if candles.is_empty() {
        return Err(Error::InsufficientData { needed: 1, got: 0 });
    }
    check_period("fast", fast)?;
    check_period("slow", slow)?;
    check_period("signal", signal)?;

    let closes: Vec<Option<f64>> = closes(candles).into_iter().map(Some).collect();
    let average = |values: &[Option<f64>], span: usize| match kind {
        MaKind::Ema => adjusted_ema(values, span),
        MaKind::Sma => sma(values, span),
    };

    let ma_fast = average(&closes, fast);
    let ma_slow = average(&closes, slow);
    let macd: Vec<Option<f64>> = ma_fast
        .iter()
        .zip(&ma_slow)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal = average(&macd, signal);

    Ok(MacdSeries {
        ma_fast,
        ma_slow,
        macd,
        signal,
    })
}

/// Trailing mean over `window` entries; `None` while the window is short or
/// contains a gap.
fn sma(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let mut sum = 0.0;
            for v in slice {
                sum += (*v)?;
            }
            Some(sum / window as f64)
        })
        .collect()
}

/// Exponential mean with weights (1−α)^k normalised by their sum, so early
/// values are not biased towards the seed. Output stays `None` until `span`
/// observations have been seen; gaps carry the previous value and still decay
/// the weights.
fn adjusted_ema(values: &[Option<f64>], span: usize) -> Vec<Option<f64>> {
    let decay = 1.0 - 2.0 / (span as f64 + 1.0);
    let mut num = 0.0;
    let mut den = 0.0;
    let mut seen = 0usize;
    let mut last: Option<f64> = None;

    values
        .iter()
        .map(|v| {
            match v {
                Some(x) => {
                    num = x + decay * num;
                    den = 1.0 + decay * den;
                    seen += 1;
                    if seen >= span {
                        last = Some(num / den);
                    }
                }
                None if seen > 0 => {
                    num *= decay;
                    den *= decay;
                }
                None => {}
            }
            if seen >= span {
                last
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::tests::candles_from;

    fn trending_up(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    #[test]
    fn sma_lines_warm_up_per_window() {
        let candles = candles_from(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let m = compute_macd(&candles, 2, 3, 2, MaKind::Sma).unwrap();

        assert_eq!(m.ma_fast[0], None);
        assert_eq!(m.ma_fast[1], Some(1.5));
        assert_eq!(m.ma_slow[1], None);
        assert_eq!(m.ma_slow[2], Some(2.0));
        assert_eq!(m.macd[1], None);
        assert_eq!(m.macd[2], Some(0.5));
        // signal needs two defined MACD values
        assert_eq!(m.signal[2], None);
        assert_eq!(m.signal[3], Some(0.5));
        assert_eq!(m.signal[5], Some(0.5));
    }

    #[test]
    fn ema_lines_respect_min_periods() {
        let candles = candles_from(&[50.0; 40]);
        let m = compute_macd(&candles, 12, 26, 9, MaKind::Ema).unwrap();

        assert!(m.ma_fast[10].is_none());
        assert!(m.ma_fast[11].is_some());
        assert!(m.ma_slow[24].is_none());
        assert!(m.macd[25].is_some());
        // first 8 defined MACD values are not enough for the signal line
        assert!(m.signal[32].is_none());
        let last = m.signal[33].unwrap();
        assert!(last.abs() < 1e-12, "flat prices should give zero MACD, got {last}");
    }

    #[test]
    fn adjusted_ema_matches_hand_computation() {
        // span 3 → decay 0.5; bar 1 = (2 + 0.5*1) / 1.5
        let out = adjusted_ema(&[Some(1.0), Some(2.0)], 1);
        assert!((out[0].unwrap() - 1.0).abs() < 1e-12);
        let out = adjusted_ema(&[Some(1.0), Some(2.0)], 3);
        assert_eq!(out, vec![None, None]);
        let out = adjusted_ema(&[Some(1.0), Some(2.0), Some(3.0)], 3);
        let expected = (3.0 + 0.5 * 2.0 + 0.25 * 1.0) / (1.0 + 0.5 + 0.25);
        assert!((out[2].unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn macd_positive_on_steady_uptrend() {
        let candles = candles_from(&trending_up(60));
        for kind in [MaKind::Ema, MaKind::Sma] {
            let m = compute_macd(&candles, 12, 26, 9, kind).unwrap();
            let last = m.macd.last().copied().flatten().unwrap();
            assert!(last > 0.0, "{kind:?}: fast average should sit above slow, got {last}");
        }
    }

    #[test]
    fn empty_input_is_insufficient() {
        assert!(matches!(
            compute_macd(&[], 12, 26, 9, MaKind::Sma),
            Err(Error::InsufficientData { .. })
        ));
    }
}
