use std::sync::Arc;
use std::time::Duration;

use teloxide::{
    dispatching::UpdateHandler,
    payloads::SendMessageSetters,
    prelude::*,
    types::{ChatId, ParseMode},
    utils::command::BotCommands,
};
use tracing::{error, info, warn};

use alerts::render::{paginate, symbols_table, ticker_table};
use alerts::{AlertScheduler, SubscribeOutcome};
use common::{SignalSnapshot, SignalState, SnapshotHandle, SymbolSelector};

use crate::sink::pre_block;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub scheduler: AlertScheduler,
    pub snapshot: SnapshotHandle,
    /// Empty means anyone may talk to the bot.
    pub allowed_user_ids: Arc<Vec<i64>>,
    pub refresh_period: Duration,
    pub max_table_rows: usize,
}

/// Chat commands understood by the bot.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "EmaBot commands:")]
pub enum Command {
    #[command(description = "Show this help")]
    Start,
    #[command(description = "Show this help")]
    Help,
    #[command(description = "Get alerts for a symbol, or \"all\" for every watched symbol")]
    Subscribe(String),
    #[command(description = "Stop alerts for a symbol or \"all\"")]
    Unsubscribe(String),
    #[command(description = "Show engine health and your subscriptions")]
    Status,
    #[command(description = "List supported symbols")]
    List,
    #[command(description = "Show current signals for a symbol or \"all\"")]
    Ticker(String),
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(bot: Bot, deps: BotDeps) {
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(handle_help))
        .branch(case![Command::Help].endpoint(handle_help))
        .branch(case![Command::Subscribe(arg)].endpoint(handle_subscribe))
        .branch(case![Command::Unsubscribe(arg)].endpoint(handle_unsubscribe))
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::List].endpoint(handle_list))
        .branch(case![Command::Ticker(arg)].endpoint(handle_ticker));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Drop messages from users outside the allow-list, when one is configured.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.is_empty() || deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, help_text()).await?;
    Ok(())
}

async fn handle_subscribe(bot: Bot, msg: Message, arg: String, deps: Arc<BotDeps>) -> HandlerResult {
    let selector = match parse_argument(&arg) {
        Ok(selector) => selector,
        Err(reply) => {
            bot.send_message(msg.chat.id, reply).await?;
            return Ok(());
        }
    };

    let reply = match deps.scheduler.subscribe(msg.chat.id.0, selector.clone()).await {
        Ok(outcome) => subscribe_reply(outcome, &selector, deps.scheduler.watchlist()),
        Err(e) => {
            error!(chat_id = msg.chat.id.0, %selector, error = %e, "Subscribe failed");
            "Could not save the subscription, please try again later.".to_string()
        }
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_unsubscribe(
    bot: Bot,
    msg: Message,
    arg: String,
    deps: Arc<BotDeps>,
) -> HandlerResult {
    let selector = match parse_argument(&arg) {
        Ok(selector) => selector,
        Err(reply) => {
            bot.send_message(msg.chat.id, reply).await?;
            return Ok(());
        }
    };

    let reply = match deps.scheduler.unsubscribe(msg.chat.id.0, selector.clone()).await {
        Ok(removed) => unsubscribe_reply(removed, &selector),
        Err(e) => {
            error!(chat_id = msg.chat.id.0, %selector, error = %e, "Unsubscribe failed");
            "Could not remove the subscription, please try again later.".to_string()
        }
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let snapshot = deps.snapshot.load().await;
    let subscriptions = deps.scheduler.subscriptions_of(msg.chat.id.0).await;
    let text = status_text(
        &snapshot,
        &subscriptions,
        deps.refresh_period,
        deps.scheduler.settings().period,
    );
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_list(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    for page in paginate(deps.scheduler.watchlist(), deps.max_table_rows, symbols_table) {
        send_table(&bot, msg.chat.id, &page).await?;
    }
    Ok(())
}

async fn handle_ticker(bot: Bot, msg: Message, arg: String, deps: Arc<BotDeps>) -> HandlerResult {
    let selector = match parse_argument(&arg) {
        Ok(selector) => selector,
        Err(reply) => {
            bot.send_message(msg.chat.id, reply).await?;
            return Ok(());
        }
    };

    let snapshot = deps.snapshot.load().await;
    let rows = ticker_rows(&snapshot, &selector);
    if rows.is_empty() {
        bot.send_message(msg.chat.id, format!("No signal data for {selector} yet."))
            .await?;
        return Ok(());
    }
    for page in paginate(&rows, deps.max_table_rows, ticker_table) {
        send_table(&bot, msg.chat.id, &page).await?;
    }
    Ok(())
}

async fn send_table(bot: &Bot, chat: ChatId, table: &str) -> HandlerResult {
    bot.send_message(chat, pre_block(table))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

// ─── Reply texts ─────────────────────────────────────────────────────────────

fn help_text() -> String {
    format!(
        "I send a message when the fast EMA crosses its signal line.\n\n{}",
        Command::descriptions()
    )
}

/// Parse a `<symbol|all>` argument, or return the reply explaining why not.
fn parse_argument(arg: &str) -> Result<SymbolSelector, String> {
    if arg.trim().is_empty() {
        return Err("Please name a symbol, e.g. /subscribe BTCUSDT, or use \"all\".".to_string());
    }
    arg.trim()
        .parse::<SymbolSelector>()
        .map_err(|_| format!("\"{}\" is not a valid symbol.", arg.trim()))
}

fn subscribe_reply(outcome: SubscribeOutcome, selector: &SymbolSelector, watchlist: &[String]) -> String {
    match outcome {
        SubscribeOutcome::Subscribed => format!("You successfully subscribed to {selector}"),
        SubscribeOutcome::Replaced => {
            format!("You successfully subscribed to {selector} Old one was removed.")
        }
        SubscribeOutcome::Unsupported => format!(
            "{selector} is not supported. Supported symbols: {}",
            watchlist.join(", ")
        ),
    }
}

fn unsubscribe_reply(removed: bool, selector: &SymbolSelector) -> String {
    if removed {
        format!("You successfully unsubscribed from {selector}")
    } else {
        format!("You have no active signal for {selector}")
    }
}

fn status_text(
    snapshot: &SignalSnapshot,
    subscriptions: &[SymbolSelector],
    refresh_period: Duration,
    notify_period: Duration,
) -> String {
    let health = if snapshot.healthy { "healthy" } else { "unhealthy" };
    let last_cycle = if snapshot.cycle == 0 {
        "none yet".to_string()
    } else {
        format!(
            "#{} at {}",
            snapshot.cycle,
            snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    };
    let subscribed = if subscriptions.is_empty() {
        "none".to_string()
    } else {
        subscriptions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut text = format!(
        "EmaBot Status\n\
         Signals: {health}\n\
         Last cycle: {last_cycle}\n\
         Refresh every {}s, alerts every {}s\n\
         Your subscriptions: {subscribed}",
        refresh_period.as_secs(),
        notify_period.as_secs(),
    );
    if let Some(err) = &snapshot.last_error {
        text.push_str(&format!("\nLast error: {err}"));
    }
    text
}

fn ticker_rows(snapshot: &SignalSnapshot, selector: &SymbolSelector) -> Vec<(String, SignalState)> {
    snapshot
        .states
        .iter()
        .filter(|(symbol, _)| selector.matches(symbol))
        .map(|(symbol, state)| (symbol.clone(), state.clone()))
        .collect()
}
