//! Subscription refcounting in front of [`super::ParambusAdapter`].
//!
//! The adapter's own `subscribe_raw`/`unsubscribe_raw` register and release
//! exactly one bus subscription per call. Several callers inside the gateway
//! (the event pipeline's startup set, and `SUBSCRIBE`/`UNSUBSCRIBE` ops
//! arriving over the uplink) may all want the same event name live at once;
//! this registry makes that many-to-one relationship explicit instead of
//! leaking a raw counter through the adapter trait: for every event name
//! `e`, the parambus has an active subscription iff the local refcount for
//! `e` is ≥ 1.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc::UnboundedSender, Mutex};

use super::{AdapterError, BusEvent, ParambusAdapter};

/// Refcounted wrapper around a [`ParambusAdapter`]'s subscribe/unsubscribe
/// pair.
pub struct SubscriptionRegistry {
    adapter: Arc<dyn ParambusAdapter>,
    counts: Mutex<HashMap<String, usize>>,
}

impl SubscriptionRegistry {
    /// Build a registry fronting `adapter`. Starts with no live
    /// subscriptions.
    #[must_use]
    pub fn new(adapter: Arc<dyn ParambusAdapter>) -> Self {
        Self {
            adapter,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Increment the local refcount for `event_name`, registering the bus
    /// subscription on the 0-to-1 transition.
    ///
    /// # Errors
    /// Returns whatever [`ParambusAdapter::subscribe_raw`] returns on the
    /// first subscriber; subsequent subscribers never call the bus and
    /// cannot fail.
    pub async fn subscribe(
        &self,
        event_name: &str,
        sender: UnboundedSender<BusEvent>,
    ) -> Result<(), AdapterError> {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(event_name.to_owned()).or_insert(0);
        if *count == 0 {
            self.adapter.subscribe_raw(event_name, sender).await?;
        }
        *count += 1;
        Ok(())
    }

    /// Decrement the local refcount for `event_name`, releasing the bus
    /// subscription on the 1-to-0 transition.
    ///
    /// A decrement on a name with no live subscription is a no-op: the
    /// registry never goes negative.
    ///
    /// # Errors
    /// Returns whatever [`ParambusAdapter::unsubscribe_raw`] returns on the
    /// last subscriber's release.
    pub async fn unsubscribe(&self, event_name: &str) -> Result<(), AdapterError> {
        let mut counts = self.counts.lock().await;
        let Some(count) = counts.get_mut(event_name) else {
            return Ok(());
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            counts.remove(event_name);
            self.adapter.unsubscribe_raw(event_name).await?;
        }
        Ok(())
    }

    /// Current refcount for `event_name`, for diagnostics and tests.
    #[must_use]
    pub async fn refcount(&self, event_name: &str) -> usize {
        self.counts
            .lock()
            .await
            .get(event_name)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::parambus::mock::MockParambusAdapter;

    #[tokio::test]
    async fn first_subscribe_registers_and_last_unsubscribe_releases() {
        let adapter = Arc::new(MockParambusAdapter::new());
        adapter.open("test").await.expect("open succeeds");
        let registry = SubscriptionRegistry::new(adapter.clone());
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.subscribe("Device.Status", tx.clone()).await.expect("first subscribe");
        registry.subscribe("Device.Status", tx).await.expect("second subscribe");
        assert_eq!(registry.refcount("Device.Status").await, 2);
        assert!(adapter.is_subscribed("Device.Status").await);

        registry.unsubscribe("Device.Status").await.expect("first unsubscribe");
        assert_eq!(registry.refcount("Device.Status").await, 1);
        assert!(adapter.is_subscribed("Device.Status").await);

        registry.unsubscribe("Device.Status").await.expect("last unsubscribe");
        assert_eq!(registry.refcount("Device.Status").await, 0);
        assert!(!adapter.is_subscribed("Device.Status").await);
    }

    #[tokio::test]
    async fn unsubscribe_without_subscribe_is_a_no_op() {
        let adapter = Arc::new(MockParambusAdapter::new());
        adapter.open("test").await.expect("open succeeds");
        let registry = SubscriptionRegistry::new(adapter);
        registry.unsubscribe("Device.Status").await.expect("no-op unsubscribe");
        assert_eq!(registry.refcount("Device.Status").await, 0);
    }
}
