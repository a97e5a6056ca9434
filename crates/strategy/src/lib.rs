pub mod config;
pub mod evaluator;
pub mod indicators;

pub use config::StrategyFileConfig;
pub use evaluator::{Confirmation, SignalEvaluator, SignalRule};
pub use indicators::{compute_ema, compute_macd, EmaSeries, MaKind, MacdSeries};
