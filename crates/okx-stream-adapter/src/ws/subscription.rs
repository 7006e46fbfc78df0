/*
[INPUT]:  Subscribe/unsubscribe intents from callers
[OUTPUT]: Durable, deduplicated descriptor set replayed on every connection
[POS]:    WebSocket layer - subscription bookkeeping
[UPDATE]: When descriptor identity or replay order changes
*/

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::SubscriptionArg;

/// Desired subscriptions keyed by their canonical key.
///
/// Ordered so replays are deterministic.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    inner: Mutex<BTreeMap<String, SubscriptionArg>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the descriptor was not already present
    pub fn insert(&self, arg: SubscriptionArg) -> bool {
        self.lock().insert(arg.key(), arg).is_none()
    }

    /// Returns true if the descriptor was present
    pub fn remove(&self, arg: &SubscriptionArg) -> bool {
        self.lock().remove(&arg.key()).is_some()
    }

    pub fn contains(&self, arg: &SubscriptionArg) -> bool {
        self.lock().contains_key(&arg.key())
    }

    pub fn snapshot(&self) -> Vec<SubscriptionArg> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, SubscriptionArg>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
