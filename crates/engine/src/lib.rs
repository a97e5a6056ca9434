pub mod binance;
pub mod refresher;

pub use binance::BinanceClient;
pub use refresher::{BatchRefresher, CycleReport, RefresherConfig, SymbolOutcome};
