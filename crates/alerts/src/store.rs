use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use common::{Result, Subscription, SymbolSelector};

/// Schema for the subscription table. Run once at startup.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Durable (subscriber, selector) pairs. The scheduler re-arms one
/// notification job per row after a restart.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Returns false when the pair was already stored.
    async fn insert(&self, subscription: &Subscription) -> Result<bool>;

    /// Returns false when there was nothing to delete.
    async fn delete(&self, subscription: &Subscription) -> Result<bool>;

    async fn list_all(&self) -> Result<Vec<Subscription>>;
}

pub struct SqliteSubscriptionStore {
    db: SqlitePool,
}

impl SqliteSubscriptionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn insert(&self, subscription: &Subscription) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (chat_id, selector, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(chat_id, selector) DO NOTHING
            "#,
        )
        .bind(subscription.subscriber_id)
        .bind(subscription.selector.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, subscription: &Subscription) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE chat_id = ?1 AND selector = ?2")
            .bind(subscription.subscriber_id)
            .bind(subscription.selector.to_string())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query("SELECT chat_id, selector FROM subscriptions ORDER BY id")
            .fetch_all(&self.db)
            .await?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            let chat_id: i64 = row.try_get("chat_id")?;
            let raw: String = row.try_get("selector")?;
            match raw.parse::<SymbolSelector>() {
                Ok(selector) => subscriptions.push(Subscription::new(chat_id, selector)),
                Err(e) => warn!(chat_id, selector = %raw, error = %e, "Skipping unreadable subscription row"),
            }
        }
        Ok(subscriptions)
    }
}
