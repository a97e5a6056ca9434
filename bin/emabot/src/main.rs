use std::sync::Arc;

use anyhow::Context;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use alerts::{AlertScheduler, DispatchSettings, SqliteSubscriptionStore, SubscriptionStore, MIGRATOR};
use common::{CandleSource, Config, NotificationSink, SnapshotHandle};
use engine::{BatchRefresher, BinanceClient, RefresherConfig};
use strategy::StrategyFileConfig;
use telegram_ctrl::{start_bot, BotDeps, TelegramSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let signals = StrategyFileConfig::load(&cfg.strategy_config_path);
    let evaluator = signals
        .evaluator()
        .context("invalid signal rule in strategy config")?;
    info!(
        network = %cfg.exchange_network,
        symbols = signals.symbols.len(),
        interval = %signals.interval,
        "EmaBot starting"
    );

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .context("failed to connect to database")?;
    MIGRATOR.run(&db).await.context("database migration failed")?;
    info!("Database ready");

    // ── Shared state ──────────────────────────────────────────────────────────
    let snapshot = SnapshotHandle::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Refresher ─────────────────────────────────────────────────────────────
    let source: Arc<dyn CandleSource> = Arc::new(BinanceClient::new(
        cfg.exchange_network,
        cfg.binance_api_key.clone(),
    )?);
    let mut refresher = BatchRefresher::new(
        source,
        evaluator,
        RefresherConfig {
            symbols: signals.symbols.clone(),
            interval: signals.interval,
            lookback: signals.lookback(),
            period: cfg.refresh_period,
            fetch_timeout: cfg.fetch_timeout,
        },
        snapshot.clone(),
    );
    // Subscribers restored below should see real data on their first tick.
    let first = refresher.run_once().await;
    info!(fresh = first.fresh(), skipped = first.skipped(), fatal = first.fatal(), "Initial refresh done");

    // ── Alerts ────────────────────────────────────────────────────────────────
    let bot = teloxide::Bot::new(cfg.telegram_token.clone());
    let store: Arc<dyn SubscriptionStore> = Arc::new(SqliteSubscriptionStore::new(db.clone()));
    let sink: Arc<dyn NotificationSink> = Arc::new(TelegramSink::new(bot.clone()));
    let scheduler = AlertScheduler::new(
        store.clone(),
        sink,
        snapshot.clone(),
        signals.symbols.clone(),
        DispatchSettings::new(
            cfg.notify_period,
            cfg.refresh_period,
            signals.dedup,
            cfg.max_table_rows,
        ),
        shutdown_rx.clone(),
    );
    scheduler
        .restore()
        .await
        .context("failed to restore subscriptions")?;

    // ── Telegram ──────────────────────────────────────────────────────────────
    let bot_deps = BotDeps {
        scheduler: scheduler.clone(),
        snapshot: snapshot.clone(),
        allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
        refresh_period: cfg.refresh_period,
        max_table_rows: cfg.max_table_rows,
    };

    // ── Dashboard API ─────────────────────────────────────────────────────────
    let api_state = api::AppState {
        snapshot: snapshot.clone(),
        store,
        dashboard_token: cfg.dashboard_token.clone(),
    };

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    let port = cfg.dashboard_port;
    let refresher_task = tokio::spawn(refresher.run(shutdown_rx));
    tokio::spawn(start_bot(bot, bot_deps));
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "Dashboard API stopped");
        }
    });

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received.");

    let _ = shutdown_tx.send(true);
    scheduler.shutdown().await;
    if let Err(e) = refresher_task.await {
        error!(error = %e, "Refresher task ended abnormally");
    }
    db.close().await;
    info!("EmaBot stopped");
    Ok(())
}
