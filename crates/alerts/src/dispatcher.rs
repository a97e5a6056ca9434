use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use common::{
    DedupPolicy, NotificationSink, SignalKind, SignalSnapshot, Subscription, SymbolSelector,
};

use crate::render::{alerts_table, paginate, AlertRow};

/// What one dispatcher tick did for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    /// The snapshot was unhealthy or too old; nothing was evaluated.
    pub suppressed: bool,
    /// Messages (or table pages) handed to the sink successfully.
    pub sent: usize,
    pub failed: usize,
}

/// Per-subscription de-duplication state.
///
/// Holds the last alert sent per symbol. Lives only as long as the
/// subscription's job, so a restart or re-subscribe starts from `None`.
#[derive(Debug, Clone)]
pub struct SubscriptionTracker {
    subscription: Subscription,
    policy: DedupPolicy,
    /// Snapshots and symbol verdicts older than this never alert.
    max_age: Option<Duration>,
    last_sent: HashMap<String, SignalKind>,
}

/// True when `at` lies further than `max_age` in the past. Timestamps in the
/// future count as fresh.
fn is_stale(at: DateTime<Utc>, now: DateTime<Utc>, max_age: Option<Duration>) -> bool {
    match max_age {
        Some(max_age) => (now - at).to_std().map_or(false, |age| age > max_age),
        None => false,
    }
}

impl SubscriptionTracker {
    pub fn new(subscription: Subscription, policy: DedupPolicy) -> Self {
        Self {
            subscription,
            policy,
            max_age: None,
            last_sent: HashMap::new(),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn last_sent(&self, symbol: &str) -> SignalKind {
        self.last_sent.get(symbol).copied().unwrap_or_default()
    }

    /// Symbols whose current buy/sell verdict has not been sent yet, in
    /// snapshot order. Under `ResetOnNone`, flat symbols are re-armed here.
    /// Verdicts older than the max age are ignored and leave `last_sent` alone.
    pub fn pending(&mut self, snapshot: &SignalSnapshot) -> Vec<(String, SignalKind)> {
        let now = Utc::now();
        let mut changes = Vec::new();
        for (symbol, state) in &snapshot.states {
            if !self.subscription.selector.matches(symbol) {
                continue;
            }
            if is_stale(state.refreshed_at, now, self.max_age) {
                debug!(subscription = %self.subscription, symbol = %symbol, "Skipping stale verdict");
                continue;
            }
            match state.kind() {
                SignalKind::None => {
                    if self.policy == DedupPolicy::ResetOnNone {
                        self.last_sent.remove(symbol);
                    }
                }
                kind if kind != self.last_sent(symbol) => changes.push((symbol.clone(), kind)),
                _ => {}
            }
        }
        changes
    }

    fn mark_sent(&mut self, symbol: &str, kind: SignalKind) {
        self.last_sent.insert(symbol.to_string(), kind);
    }

    /// Evaluate `snapshot` and deliver any new alerts through `sink`.
    ///
    /// Nothing happens while the snapshot is unhealthy or older than the max
    /// age. A symbol is only marked as sent once the message carrying it was
    /// accepted by the sink, so failed deliveries are attempted again next tick.
    pub async fn tick(
        &mut self,
        snapshot: &SignalSnapshot,
        sink: &dyn NotificationSink,
        max_rows: usize,
    ) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if !snapshot.healthy {
            debug!(subscription = %self.subscription, "Snapshot unhealthy, alerts suppressed");
            outcome.suppressed = true;
            return outcome;
        }
        if is_stale(snapshot.generated_at, Utc::now(), self.max_age) {
            warn!(
                subscription = %self.subscription,
                generated_at = %snapshot.generated_at,
                "Snapshot is stale, alerts suppressed"
            );
            outcome.suppressed = true;
            return outcome;
        }

        let changes = self.pending(snapshot);
        if changes.is_empty() {
            return outcome;
        }
        let subscriber = self.subscription.subscriber_id;

        if self.subscription.selector != SymbolSelector::All {
            for (symbol, kind) in changes {
                let text = format!("{} ALERT {symbol}", kind.to_string().to_uppercase());
                match sink.send(subscriber, &text, false).await {
                    Ok(()) => {
                        info!(subscriber, symbol = %symbol, %kind, "Alert sent");
                        self.mark_sent(&symbol, kind);
                        outcome.sent += 1;
                    }
                    Err(e) => {
                        warn!(subscriber, symbol = %symbol, error = %e, "Failed to deliver alert");
                        outcome.failed += 1;
                    }
                }
            }
        } else {
            let rows: Vec<AlertRow> = changes
                .iter()
                .map(|(symbol, kind)| AlertRow {
                    symbol: symbol.clone(),
                    buy: *kind == SignalKind::Buy,
                    sell: *kind == SignalKind::Sell,
                })
                .collect();
            let pages = paginate(&rows, max_rows, alerts_table);
            for (page, chunk) in pages.iter().zip(changes.chunks(max_rows.max(1))) {
                match sink.send(subscriber, page, true).await {
                    Ok(()) => {
                        for (symbol, kind) in chunk {
                            self.mark_sent(symbol, *kind);
                        }
                        outcome.sent += 1;
                    }
                    Err(e) => {
                        warn!(subscriber, rows = chunk.len(), error = %e, "Failed to deliver alert table");
                        outcome.failed += 1;
                    }
                }
            }
            if outcome.sent > 0 {
                info!(subscriber, symbols = changes.len(), pages = outcome.sent, "Alert table sent");
            }
        }
        outcome
    }
}
