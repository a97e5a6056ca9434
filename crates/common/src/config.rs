use std::time::Duration;

use crate::ExchangeNetwork;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange
    pub exchange_network: ExchangeNetwork,
    /// Sent as `X-MBX-APIKEY` when present. Klines are public, so optional.
    pub binance_api_key: Option<String>,

    // Telegram
    pub telegram_token: String,
    /// Empty means the bot answers everyone.
    pub telegram_allowed_user_ids: Vec<i64>,

    // Dashboard
    pub dashboard_token: String,
    pub dashboard_port: u16,

    // Scheduling
    pub refresh_period: Duration,
    pub notify_period: Duration,
    pub fetch_timeout: Duration,
    pub max_table_rows: usize,

    // Database
    pub database_url: String,

    // Watch-list / signal rule file path
    pub strategy_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let exchange_network = match optional_env("EXCHANGE_NETWORK")
            .unwrap_or_else(|| "testnet".to_string())
            .to_lowercase()
            .as_str()
        {
            "testnet" => ExchangeNetwork::Testnet,
            "mainnet" => ExchangeNetwork::Mainnet,
            other => panic!(
                "ERROR: EXCHANGE_NETWORK must be 'testnet' or 'mainnet', got: '{other}'"
            ),
        };

        let telegram_allowed_user_ids = optional_env("TELEGRAM_ALLOWED_USER_IDS")
            .map(|raw| parse_user_ids(&raw))
            .unwrap_or_default();

        let refresh_period = secs_env("REFRESH_PERIOD_SECS", 60);
        let notify_period = secs_env("NOTIFY_PERIOD_SECS", 60);

        Config {
            exchange_network,
            binance_api_key: optional_env("BINANCE_API_KEY").filter(|k| !k.is_empty()),
            telegram_token: required_env("TELEGRAM_TOKEN"),
            telegram_allowed_user_ids,
            dashboard_token: required_env("DASHBOARD_TOKEN"),
            dashboard_port: optional_env("DASHBOARD_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            refresh_period,
            notify_period,
            fetch_timeout: secs_env("FETCH_TIMEOUT_SECS", 10),
            max_table_rows: optional_env("MAX_TABLE_ROWS")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(50),
            database_url: required_env("DATABASE_URL"),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/signals.toml".to_string()),
        }
    }
}

fn parse_user_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().unwrap_or_else(|_| {
                panic!("TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{s}'")
            })
        })
        .collect()
}

fn secs_env(key: &str, default: u64) -> Duration {
    let secs = optional_env(key)
        .map(|v| {
            v.parse::<u64>()
                .unwrap_or_else(|_| panic!("'{key}' must be a whole number of seconds, got '{v}'"))
        })
        .unwrap_or(default);
    if secs == 0 {
        panic!("'{key}' must be greater than zero");
    }
    Duration::from_secs(secs)
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
