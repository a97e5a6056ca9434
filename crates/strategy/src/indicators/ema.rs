use common::{Candle, Error, Result};

use super::{closes, check_period};

/// Fast, slow and signal EMA lines of `close`, index-aligned with the input.
#[derive(Debug, Clone, PartialEq)]
pub struct EmaSeries {
    pub fast: Vec<f64>,
    pub slow: Vec<f64>,
    pub signal: Vec<f64>,
}

impl EmaSeries {
    pub fn len(&self) -> usize {
        self.fast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fast.is_empty()
    }
}

/// Recursive exponential moving average seeded with the first observation.
///
///   bar 0  → value = price
///   bar 1+ → value = α·price + (1−α)·prev   where α = 2/(span+1)
///
/// Every entry is defined; the first `span` values lean towards the seed.
/// Evaluated as `prev + α·(price − prev)` so a constant input stays exact.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &price in values {
        let next = match prev {
            None => price,
            Some(p) => p + alpha * (price - p),
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// EMA fast/slow/signal lines over the candle closes.
pub fn compute_ema(candles: &[Candle], fast: usize, slow: usize, signal: usize) -> Result<EmaSeries> {
    if candles.is_empty() {
        return Err(Error::InsufficientData { needed: 1, got: 0 });
    }
    check_period("fast", fast)?;
    check_period("slow", slow)?;
    check_period("signal", signal)?;

    let closes = closes(candles);
    Ok(EmaSeries {
        fast: ema(&closes, fast),
        slow: ema(&closes, slow),
        signal: ema(&closes, signal),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::tests::candles_from;

    #[test]
    fn ema_seeds_with_first_close() {
        // span 3 → alpha 0.5
        let out = ema(&[10.0, 11.0, 12.0, 13.0], 3);
        let expected = [10.0, 10.5, 11.25, 12.125];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-10, "got {got}, want {want}");
        }
    }

    #[test]
    fn series_align_with_input() {
        let candles = candles_from(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let series = compute_ema(&candles, 2, 5, 3).unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(series.slow.len(), 5);
        assert_eq!(series.signal.len(), 5);
        assert_eq!(series.fast[0], 1.0);
    }

    #[test]
    fn empty_input_is_insufficient() {
        let err = compute_ema(&[], 5, 30, 10).unwrap_err();
        assert!(matches!(err, Error::InsufficientData { .. }));
    }

    #[test]
    fn zero_period_is_rejected() {
        let candles = candles_from(&[1.0]);
        assert!(matches!(
            compute_ema(&candles, 0, 30, 10),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn faster_line_leads_on_rising_prices() {
        let candles = candles_from(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]);
        let series = compute_ema(&candles, 2, 5, 10).unwrap();
        let last = series.len() - 1;
        assert!(series.fast[last] > series.slow[last]);
        assert!(series.slow[last] > series.signal[last]);
    }
}
