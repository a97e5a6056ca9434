//! In-memory doubles shared by the unit tests of this crate.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;

use common::{Error, NotificationSink, Result, Subscription};

use crate::store::SubscriptionStore;

/// Records every delivered message. Sends addressed to `fail_for` error out.
#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<(i64, String, bool)>>,
    pub fail_for: Option<i64>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, subscriber_id: i64, text: &str, is_table: bool) -> Result<()> {
        if self.fail_for == Some(subscriber_id) {
            return Err(Error::Notify(format!("chat {subscriber_id} blocked the bot")));
        }
        self.messages
            .lock()
            .unwrap()
            .push((subscriber_id, text.to_string(), is_table));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub rows: Mutex<BTreeSet<Subscription>>,
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn insert(&self, subscription: &Subscription) -> Result<bool> {
        Ok(self.rows.lock().unwrap().insert(subscription.clone()))
    }

    async fn delete(&self, subscription: &Subscription) -> Result<bool> {
        Ok(self.rows.lock().unwrap().remove(subscription))
    }

    async fn list_all(&self) -> Result<Vec<Subscription>> {
        Ok(self.rows.lock().unwrap().iter().cloned().collect())
    }
}
