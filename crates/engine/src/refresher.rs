use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use common::{
    Candle, CandleSource, Error, Interval, Result, SignalSnapshot, SignalState, SnapshotHandle,
};
use strategy::SignalEvaluator;

/// What the refresher pulls and how often.
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    pub symbols: Vec<String>,
    pub interval: Interval,
    pub lookback: Duration,
    pub period: Duration,
    pub fetch_timeout: Duration,
}

/// Result of refreshing one symbol in one cycle.
#[derive(Debug, Clone)]
pub enum SymbolOutcome {
    Fresh(SignalState),
    /// Expected failure (fetch or data); the previous entry is kept.
    Skipped(String),
    /// Anything else. Marks the whole cycle unhealthy.
    Fatal(String),
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcomes: Vec<(String, SymbolOutcome)>,
}

impl CycleReport {
    pub fn fresh(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Fresh(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Skipped(_)))
    }

    pub fn fatal(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Fatal(_)))
    }

    pub fn healthy(&self) -> bool {
        self.fatal() == 0
    }

    fn count(&self, pred: impl Fn(&SymbolOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Periodically re-evaluates every watched symbol and publishes the result
/// to the shared `SnapshotHandle`.
///
/// Each symbol runs in its own task, so a failing or panicking fetch only
/// affects that symbol's outcome. Only this type writes the snapshot.
pub struct BatchRefresher {
    source: Arc<dyn CandleSource>,
    evaluator: SignalEvaluator,
    config: RefresherConfig,
    snapshot: SnapshotHandle,
    cycle: u64,
}

impl BatchRefresher {
    pub fn new(
        source: Arc<dyn CandleSource>,
        evaluator: SignalEvaluator,
        config: RefresherConfig,
        snapshot: SnapshotHandle,
    ) -> Self {
        Self {
            source,
            evaluator,
            config,
            snapshot,
            cycle: 0,
        }
    }

    /// Run one full cycle and publish its snapshot.
    pub async fn run_once(&mut self) -> CycleReport {
        self.cycle += 1;
        let cycle = self.cycle;
        info!(cycle, symbols = self.config.symbols.len(), "Refresh cycle started");

        let handles: Vec<_> = self
            .config
            .symbols
            .iter()
            .map(|symbol| {
                let source = self.source.clone();
                let evaluator = self.evaluator;
                let symbol = symbol.clone();
                let interval = self.config.interval;
                let lookback = self.config.lookback;
                let timeout = self.config.fetch_timeout;
                tokio::spawn(async move {
                    refresh_symbol(source.as_ref(), &evaluator, &symbol, interval, lookback, timeout)
                        .await
                })
            })
            .collect();

        let results = join_all(handles).await;
        let outcomes: Vec<(String, SymbolOutcome)> = self
            .config
            .symbols
            .iter()
            .cloned()
            .zip(results)
            .map(|(symbol, joined)| {
                let outcome = match joined {
                    Ok(Ok(state)) => SymbolOutcome::Fresh(state),
                    Ok(Err(e)) if e.is_expected() => {
                        warn!(cycle, symbol = %symbol, error = %e, "Symbol skipped this cycle");
                        SymbolOutcome::Skipped(e.to_string())
                    }
                    Ok(Err(e)) => {
                        error!(cycle, symbol = %symbol, error = %e, "Unexpected error refreshing symbol");
                        SymbolOutcome::Fatal(e.to_string())
                    }
                    Err(e) => {
                        error!(cycle, symbol = %symbol, error = %e, "Refresh task failed");
                        SymbolOutcome::Fatal(format!("refresh task failed: {e}"))
                    }
                };
                (symbol, outcome)
            })
            .collect();

        let report = CycleReport { cycle, outcomes };
        let previous = self.snapshot.load().await;
        let next = build_snapshot(&previous, &report);
        let healthy = next.healthy;
        self.snapshot.publish(next).await;

        if healthy {
            info!(
                cycle,
                fresh = report.fresh(),
                skipped = report.skipped(),
                "Refresh cycle published"
            );
        } else {
            warn!(
                cycle,
                fatal = report.fatal(),
                "Refresh cycle unhealthy; alerts suppressed until a healthy cycle"
            );
        }
        report
    }

    /// Refresh on every period tick until `shutdown` flips to true or its
    /// sender is dropped. The first cycle runs one period after the call, so
    /// callers wanting data at startup run `run_once` first. A cycle in
    /// progress always finishes before the loop exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(period = ?self.config.period, "BatchRefresher running");
        let period = self.config.period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(cycles = self.cycle, "BatchRefresher stopped");
    }
}

/// Fetch and evaluate one symbol. An empty window is replaced by one flat
/// candle stamped now, which evaluates to no signal.
async fn refresh_symbol(
    source: &dyn CandleSource,
    evaluator: &SignalEvaluator,
    symbol: &str,
    interval: Interval,
    lookback: Duration,
    timeout: Duration,
) -> Result<SignalState> {
    let mut candles = tokio::time::timeout(timeout, source.fetch(symbol, interval, lookback))
        .await
        .map_err(|_| Error::TransientFetch(format!("{symbol}: fetch timed out after {timeout:?}")))??;

    if candles.is_empty() {
        warn!(symbol, "Exchange returned no candles, substituting a flat candle");
        candles.push(Candle::flat(Utc::now()));
    }
    evaluator.evaluate(&candles)
}

/// Fold a cycle's outcomes over the previous snapshot. Skipped and failed
/// symbols keep their last known state.
fn build_snapshot(previous: &SignalSnapshot, report: &CycleReport) -> SignalSnapshot {
    let mut states = previous.states.clone();
    let mut last_error = None;

    for (symbol, outcome) in &report.outcomes {
        match outcome {
            SymbolOutcome::Fresh(state) => {
                states.insert(symbol.clone(), state.clone());
            }
            SymbolOutcome::Skipped(_) => {}
            SymbolOutcome::Fatal(msg) => {
                if last_error.is_none() {
                    last_error = Some(format!("{symbol}: {msg}"));
                }
            }
        }
    }

    SignalSnapshot {
        states,
        healthy: last_error.is_none(),
        generated_at: Utc::now(),
        cycle: report.cycle,
        last_error,
    }
}
