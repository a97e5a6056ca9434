pub mod dispatcher;
pub mod render;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod testing;

pub use dispatcher::{SubscriptionTracker, TickOutcome};
pub use scheduler::{AlertScheduler, DispatchSettings, SubscribeOutcome};
pub use store::{SqliteSubscriptionStore, SubscriptionStore, MIGRATOR};
