pub mod ema;
pub mod macd;

pub use ema::{compute_ema, EmaSeries};
pub use macd::{compute_macd, MacdSeries, MaKind};

use common::{Candle, Error, Result};

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

fn check_period(name: &str, period: usize) -> Result<()> {
    if period == 0 {
        return Err(Error::Config(format!("{name} period must be at least 1")));
    }
    Ok(())
}
