use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};

use alerts::SubscriptionTracker;
use common::{
    Candle, CandleSource, DedupPolicy, Error, Interval, NotificationSink, Result, SnapshotHandle,
    Subscription, SymbolSelector,
};
use engine::{BatchRefresher, RefresherConfig};
use strategy::SignalEvaluator;

/// BTCUSDT rises steadily. ETHUSDT fails until `broken` is cleared.
struct FlakySource {
    broken: Mutex<bool>,
}

#[async_trait]
impl CandleSource for FlakySource {
    async fn fetch(&self, symbol: &str, _: Interval, _: Duration) -> Result<Vec<Candle>> {
        if symbol == "ETHUSDT" && *self.broken.lock().unwrap() {
            return Err(Error::Unexpected("inconsistent kline window".into()));
        }
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Ok((100..=110)
            .enumerate()
            .map(|(i, close)| {
                let close = f64::from(close);
                Candle {
                    open_time: start + ChronoDuration::hours(i as i64),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 1.0,
                }
            })
            .collect())
    }
}

#[derive(Default)]
struct CountingSink {
    sent: Mutex<usize>,
}

#[async_trait]
impl NotificationSink for CountingSink {
    async fn send(&self, _: i64, _: &str, _: bool) -> Result<()> {
        *self.sent.lock().unwrap() += 1;
        Ok(())
    }
}

fn trackers() -> Vec<SubscriptionTracker> {
    [SymbolSelector::Symbol("BTCUSDT".into()), SymbolSelector::All]
        .into_iter()
        .enumerate()
        .map(|(i, selector)| {
            SubscriptionTracker::new(Subscription::new(i as i64 + 1, selector), DedupPolicy::ResetOnNone)
                .with_max_age(Duration::from_secs(120))
        })
        .collect()
}

#[tokio::test]
async fn fatal_symbol_silences_every_subscription_until_a_clean_cycle() {
    let source = Arc::new(FlakySource {
        broken: Mutex::new(true),
    });
    let snapshot = SnapshotHandle::default();
    let mut refresher = BatchRefresher::new(
        source.clone(),
        SignalEvaluator::default(),
        RefresherConfig {
            symbols: vec!["BTCUSDT".into(), "ETHUSDT".into()],
            interval: Interval::Hours(1),
            lookback: Duration::from_secs(240 * 3_600),
            period: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(1),
        },
        snapshot.clone(),
    );

    let report = refresher.run_once().await;
    assert_eq!(report.fresh(), 1);
    assert_eq!(report.fatal(), 1);

    let published = snapshot.load().await;
    assert!(!published.healthy);
    // The healthy symbol still carries a live buy that must not go out.
    assert!(published.get("BTCUSDT").map_or(false, |s| s.buy));

    let sink = CountingSink::default();
    let mut trackers = trackers();
    for tracker in trackers.iter_mut() {
        let outcome = tracker.tick(&published, &sink, 50).await;
        assert!(outcome.suppressed);
        assert_eq!(outcome.sent, 0);
    }
    assert_eq!(*sink.sent.lock().unwrap(), 0);

    *source.broken.lock().unwrap() = false;
    assert!(refresher.run_once().await.healthy());
    let recovered = snapshot.load().await;
    for tracker in trackers.iter_mut() {
        let outcome = tracker.tick(&recovered, &sink, 50).await;
        assert!(!outcome.suppressed);
        assert_eq!(outcome.sent, 1);
    }
    assert_eq!(*sink.sent.lock().unwrap(), 2);
}
