use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use common::{
    DedupPolicy, NotificationSink, Result, SnapshotHandle, Subscription, SymbolSelector,
};

use crate::dispatcher::SubscriptionTracker;
use crate::store::SubscriptionStore;

/// How often each job wakes up and how it de-duplicates.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub period: Duration,
    pub policy: DedupPolicy,
    pub max_rows: usize,
    /// Snapshots or verdicts older than this are not alerted on. Two refresh
    /// periods, so one late cycle is tolerated.
    pub max_age: Duration,
}

impl DispatchSettings {
    /// A notify period shorter than the refresh period would only re-read the
    /// same snapshot, so it is raised to the refresh period.
    pub fn new(
        notify_period: Duration,
        refresh_period: Duration,
        policy: DedupPolicy,
        max_rows: usize,
    ) -> Self {
        let period = if notify_period < refresh_period {
            warn!(
                notify = ?notify_period,
                refresh = ?refresh_period,
                "Notify period below refresh period; using refresh period"
            );
            refresh_period
        } else {
            notify_period
        };
        Self {
            period,
            policy,
            max_rows: max_rows.max(1),
            max_age: refresh_period * 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    /// A job for the same pair existed and was restarted with fresh state.
    Replaced,
    /// The symbol is not on the watch-list. Nothing was stored.
    Unsupported,
}

/// Owns one notification job per live subscription.
///
/// Every mutation goes through the `jobs` lock, so the store and the job
/// table never disagree for longer than one call.
#[derive(Clone)]
pub struct AlertScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn SubscriptionStore>,
    sink: Arc<dyn NotificationSink>,
    snapshot: SnapshotHandle,
    watchlist: Vec<String>,
    settings: DispatchSettings,
    jobs: Mutex<HashMap<Subscription, JoinHandle<()>>>,
    shutdown: watch::Receiver<bool>,
}

impl AlertScheduler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        sink: Arc<dyn NotificationSink>,
        snapshot: SnapshotHandle,
        watchlist: Vec<String>,
        settings: DispatchSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                sink,
                snapshot,
                watchlist,
                settings,
                jobs: Mutex::new(HashMap::new()),
                shutdown,
            }),
        }
    }

    pub fn watchlist(&self) -> &[String] {
        &self.inner.watchlist
    }

    pub fn settings(&self) -> DispatchSettings {
        self.inner.settings
    }

    pub fn is_supported(&self, selector: &SymbolSelector) -> bool {
        match selector {
            SymbolSelector::All => true,
            SymbolSelector::Symbol(s) => self.inner.watchlist.iter().any(|w| w == s),
        }
    }

    /// Persist the pair and (re)start its job. The row is written first; if
    /// that fails no job is started.
    pub async fn subscribe(
        &self,
        subscriber_id: i64,
        selector: SymbolSelector,
    ) -> Result<SubscribeOutcome> {
        if !self.is_supported(&selector) {
            debug!(subscriber_id, %selector, "Rejected subscription to unknown symbol");
            return Ok(SubscribeOutcome::Unsupported);
        }
        let subscription = Subscription::new(subscriber_id, selector);

        let mut jobs = self.inner.jobs.lock().await;
        self.inner.store.insert(&subscription).await?;

        let replaced = match jobs.remove(&subscription) {
            Some(old) => {
                old.abort();
                true
            }
            None => false,
        };
        let handle = self.spawn_job(subscription.clone());
        info!(%subscription, replaced, "Subscription active");
        jobs.insert(subscription, handle);

        Ok(if replaced {
            SubscribeOutcome::Replaced
        } else {
            SubscribeOutcome::Subscribed
        })
    }

    /// Stop the job and delete the row. Returns false when neither existed.
    pub async fn unsubscribe(&self, subscriber_id: i64, selector: SymbolSelector) -> Result<bool> {
        let subscription = Subscription::new(subscriber_id, selector);

        let mut jobs = self.inner.jobs.lock().await;
        let deleted = self.inner.store.delete(&subscription).await?;
        let stopped = match jobs.remove(&subscription) {
            Some(job) => {
                job.abort();
                true
            }
            None => false,
        };

        if deleted || stopped {
            info!(%subscription, "Subscription removed");
        }
        Ok(deleted || stopped)
    }

    /// Start a job for every stored subscription that is not running yet.
    /// Rows naming symbols that left the watch-list are kept but not armed.
    pub async fn restore(&self) -> Result<usize> {
        let stored = self.inner.store.list_all().await?;

        let mut jobs = self.inner.jobs.lock().await;
        let mut restored = 0;
        for subscription in stored {
            if !self.is_supported(&subscription.selector) {
                warn!(%subscription, "Stored subscription names an unwatched symbol; not restored");
                continue;
            }
            if jobs.contains_key(&subscription) {
                continue;
            }
            let handle = self.spawn_job(subscription.clone());
            jobs.insert(subscription, handle);
            restored += 1;
        }

        info!(restored, "Subscriptions restored");
        Ok(restored)
    }

    pub async fn subscriptions_of(&self, subscriber_id: i64) -> Vec<SymbolSelector> {
        let jobs = self.inner.jobs.lock().await;
        let mut selectors: Vec<SymbolSelector> = jobs
            .keys()
            .filter(|s| s.subscriber_id == subscriber_id)
            .map(|s| s.selector.clone())
            .collect();
        selectors.sort();
        selectors
    }

    pub async fn active_jobs(&self) -> usize {
        self.inner.jobs.lock().await.len()
    }

    /// Abort every job. Stored rows are untouched.
    pub async fn shutdown(&self) {
        let mut jobs = self.inner.jobs.lock().await;
        for (_, job) in jobs.drain() {
            job.abort();
        }
        info!("AlertScheduler stopped");
    }

    fn spawn_job(&self, subscription: Subscription) -> JoinHandle<()> {
        let tracker = SubscriptionTracker::new(subscription, self.inner.settings.policy)
            .with_max_age(self.inner.settings.max_age);
        let first_tick = Instant::now() + self.inner.settings.period;
        tokio::spawn(run_job(
            tracker,
            first_tick,
            Arc::clone(&self.inner.sink),
            self.inner.snapshot.clone(),
            self.inner.settings,
            self.inner.shutdown.clone(),
        ))
    }
}

/// One subscription's loop. The first tick fires one period after the job
/// was armed.
async fn run_job(
    mut tracker: SubscriptionTracker,
    first_tick: Instant,
    sink: Arc<dyn NotificationSink>,
    snapshot: SnapshotHandle,
    settings: DispatchSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(first_tick, settings.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                let current = snapshot.load().await;
                let outcome = tracker.tick(&current, sink.as_ref(), settings.max_rows).await;
                if outcome.failed > 0 {
                    debug!(
                        subscription = %tracker.subscription(),
                        failed = outcome.failed,
                        "Undelivered alerts will be retried next tick"
                    );
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(subscription = %tracker.subscription(), "Notification job stopped");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use common::{SignalSnapshot, SignalState};

    use super::*;
    use crate::testing::{MemoryStore, RecordingSink};

    const PERIOD: Duration = Duration::from_millis(20);

    struct Harness {
        scheduler: AlertScheduler,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        snapshot: SnapshotHandle,
        shutdown: watch::Sender<bool>,
    }

    fn harness(store: MemoryStore) -> Harness {
        let store = Arc::new(store);
        let sink = Arc::new(RecordingSink::default());
        let snapshot = SnapshotHandle::default();
        let (shutdown, rx) = watch::channel(false);
        // Snapshots carry wall-clock stamps while the job clock is paused.
        let mut settings = DispatchSettings::new(PERIOD, PERIOD, DedupPolicy::ResetOnNone, 50);
        settings.max_age = Duration::from_secs(3_600);
        let scheduler = AlertScheduler::new(
            store.clone(),
            sink.clone(),
            snapshot.clone(),
            vec!["BTCUSDT".into(), "ETHUSDT".into()],
            settings,
            rx,
        );
        Harness {
            scheduler,
            store,
            sink,
            snapshot,
            shutdown,
        }
    }

    async fn publish_buy(snapshot: &SnapshotHandle, symbol: &str) {
        let mut snap = SignalSnapshot::empty();
        snap.cycle = 1;
        snap.states.insert(
            symbol.to_string(),
            SignalState::new(true, false, 2.0, 1.0, Utc::now()),
        );
        snapshot.publish(snap).await;
    }

    /// Move the paused clock forward and let the woken jobs run.
    async fn advance(by: Duration) {
        tokio::time::advance(by).await;
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn btc() -> SymbolSelector {
        SymbolSelector::Symbol("BTCUSDT".into())
    }

    #[test]
    fn notify_period_is_raised_to_refresh_period() {
        let s = DispatchSettings::new(
            Duration::from_secs(60),
            Duration::from_secs(600),
            DedupPolicy::ResetOnNone,
            0,
        );
        assert_eq!(s.period, Duration::from_secs(600));
        assert_eq!(s.max_rows, 1);
        assert_eq!(s.max_age, Duration::from_secs(1_200));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_persists_and_delivers() {
        let h = harness(MemoryStore::default());
        publish_buy(&h.snapshot, "BTCUSDT").await;

        let outcome = h.scheduler.subscribe(7, btc()).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Subscribed);
        assert_eq!(h.store.list_all().await.unwrap(), vec![Subscription::new(7, btc())]);

        advance(PERIOD * 4).await;
        let messages = h.sink.messages.lock().unwrap().clone();
        assert_eq!(messages, vec![(7, "BUY ALERT BTCUSDT".to_string(), false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_symbol_is_rejected_without_side_effects() {
        let h = harness(MemoryStore::default());
        let outcome = h
            .scheduler
            .subscribe(7, SymbolSelector::Symbol("DOGEUSDT".into()))
            .await
            .unwrap();

        assert_eq!(outcome, SubscribeOutcome::Unsupported);
        assert!(h.store.list_all().await.unwrap().is_empty());
        assert_eq!(h.scheduler.active_jobs().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_replaces_the_job() {
        let h = harness(MemoryStore::default());
        h.scheduler.subscribe(7, btc()).await.unwrap();
        let again = h.scheduler.subscribe(7, btc()).await.unwrap();

        assert_eq!(again, SubscribeOutcome::Replaced);
        assert_eq!(h.scheduler.active_jobs().await, 1);
        assert_eq!(h.store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_job_and_deletes_row() {
        let h = harness(MemoryStore::default());
        h.scheduler.subscribe(7, btc()).await.unwrap();
        h.scheduler.subscribe(7, SymbolSelector::All).await.unwrap();

        assert!(h.scheduler.unsubscribe(7, btc()).await.unwrap());
        assert!(!h.scheduler.unsubscribe(7, btc()).await.unwrap());
        assert_eq!(h.scheduler.subscriptions_of(7).await, vec![SymbolSelector::All]);
        assert_eq!(
            h.store.list_all().await.unwrap(),
            vec![Subscription::new(7, SymbolSelector::All)]
        );

        // The removed job must not deliver anything.
        publish_buy(&h.snapshot, "ETHUSDT").await;
        h.scheduler.unsubscribe(7, SymbolSelector::All).await.unwrap();
        advance(PERIOD * 3).await;
        assert_eq!(h.sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_rearms_stored_subscriptions() {
        let store = MemoryStore::default();
        store.insert(&Subscription::new(1, btc())).await.unwrap();
        store.insert(&Subscription::new(2, SymbolSelector::All)).await.unwrap();
        store
            .insert(&Subscription::new(3, SymbolSelector::Symbol("XRPUSDT".into())))
            .await
            .unwrap();
        let h = harness(store);

        assert_eq!(h.scheduler.restore().await.unwrap(), 2);
        assert_eq!(h.scheduler.restore().await.unwrap(), 0);
        assert_eq!(h.scheduler.subscriptions_of(1).await, vec![btc()]);
        assert!(h.scheduler.subscriptions_of(3).await.is_empty());

        publish_buy(&h.snapshot, "BTCUSDT").await;
        advance(PERIOD * 4).await;
        let mut recipients: Vec<i64> =
            h.sink.messages.lock().unwrap().iter().map(|m| m.0).collect();
        recipients.sort();
        assert_eq!(recipients, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_signal_ends_jobs() {
        let h = harness(MemoryStore::default());
        h.scheduler.subscribe(7, btc()).await.unwrap();
        h.shutdown.send(true).unwrap();
        publish_buy(&h.snapshot, "BTCUSDT").await;

        advance(PERIOD * 3).await;
        assert_eq!(h.sink.count(), 0);

        h.scheduler.shutdown().await;
        assert_eq!(h.scheduler.active_jobs().await, 0);
        assert_eq!(h.store.list_all().await.unwrap().len(), 1);
    }
}
