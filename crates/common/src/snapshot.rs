use std::sync::Arc;

use tokio::sync::RwLock;

use crate::SignalSnapshot;

/// Shared slot holding the live `SignalSnapshot`.
///
/// Readers get an `Arc` to an immutable snapshot; the refresher replaces the
/// whole `Arc` on publish, so nobody sees a half-built cycle.
#[derive(Clone)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Arc<SignalSnapshot>>>,
}

impl SnapshotHandle {
    pub fn new(initial: SignalSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    pub async fn load(&self) -> Arc<SignalSnapshot> {
        self.inner.read().await.clone()
    }

    pub async fn publish(&self, snapshot: SignalSnapshot) {
        *self.inner.write().await = Arc::new(snapshot);
    }
}

impl Default for SnapshotHandle {
    fn default() -> Self {
        Self::new(SignalSnapshot::empty())
    }
}
