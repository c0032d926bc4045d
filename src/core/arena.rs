//! Arena of inner subscriptions owned by a combinator.
//!
//! Fan-in stages (merge, flat_map) register every inner subscription here and
//! refer to it by an integer handle. Cancelling siblings walks the handles;
//! inner tasks never hold a reference back to the stage that spawned them.

use tokio::task::AbortHandle;

use crate::core::subscription::Subscription;

struct Entry {
    subscription: Subscription,
    task: Option<AbortHandle>,
}

impl Entry {
    fn cancel(&self) {
        self.subscription.cancel();
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[derive(Default)]
pub(crate) struct SubscriptionArena {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    live: usize,
}

impl SubscriptionArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a subscription and return its handle.
    pub(crate) fn insert(&mut self, subscription: Subscription) -> usize {
        let entry = Some(Entry {
            subscription,
            task: None,
        });
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = entry;
                index
            }
            None => {
                self.slots.push(entry);
                self.slots.len() - 1
            }
        }
    }

    /// Attach the task draining the subscription so cancellation also stops it.
    pub(crate) fn attach_task(&mut self, handle: usize, task: AbortHandle) {
        if let Some(Some(entry)) = self.slots.get_mut(handle) {
            entry.task = Some(task);
        }
    }

    /// Forget a finished subscription. Returns false for unknown handles.
    pub(crate) fn remove(&mut self, handle: usize) -> bool {
        match self.slots.get_mut(handle).and_then(Option::take) {
            Some(_) => {
                self.free.push(handle);
                self.live -= 1;
                true
            }
            None => false,
        }
    }

    /// Cancel every registered subscription and empty the arena.
    pub(crate) fn cancel_all(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.take() {
                entry.cancel();
                self.free.push(index);
            }
        }
        self.live = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl Drop for SubscriptionArena {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::subscription::Upstream;
    use crate::sources::NeverSource;

    #[tokio::test]
    async fn test_handles_are_reused() {
        let first = Upstream::manual(Arc::new(NeverSource::<i32>::new()));
        let second = Upstream::manual(Arc::new(NeverSource::<i32>::new()));

        let mut arena = SubscriptionArena::new();
        let a = arena.insert(first.subscription().clone());
        let b = arena.insert(second.subscription().clone());
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);

        assert!(arena.remove(a));
        assert!(!arena.remove(a));
        let c = arena.insert(first.subscription().clone());
        assert_eq!(c, a);
    }

    #[tokio::test]
    async fn test_cancel_all_reaches_every_subscription() {
        let upstreams: Vec<_> = (0..3)
            .map(|_| Upstream::manual(Arc::new(NeverSource::<i32>::new())))
            .collect();
        let mut arena = SubscriptionArena::new();
        for upstream in &upstreams {
            arena.insert(upstream.subscription().clone());
        }

        arena.cancel_all();
        assert!(arena.is_empty());
        assert!(upstreams.iter().all(|u| u.subscription().is_cancelled()));
    }
}
