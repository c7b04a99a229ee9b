//! A value with a subscriber list, used for both persisted fields and derived state.

use futures::Stream;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

struct Shared<T> {
    value: T,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
}

/// Current value plus every live subscriber.
///
/// New subscribers receive the current value immediately. Assignments that do not
/// change the value are not delivered, so a subscriber never sees the same value
/// twice in a row.
pub struct Observable<T> {
    shared: Mutex<Shared<T>>,
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new(value: T) -> Self {
        Observable {
            shared: Mutex::new(Shared {
                value,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> T {
        self.lock().value.clone()
    }

    pub fn subscribe(&self) -> Observed<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.lock();
        // Cannot fail: the receiver is still held here.
        let _ = tx.send(shared.value.clone());
        shared.subscribers.push(tx);
        Observed { rx }
    }

    /// Replace the value. Returns `true` if it changed and subscribers were notified.
    pub fn set(&self, value: T) -> bool {
        self.update(|current| *current = value)
    }

    /// Apply `f` to a copy of the value and publish the result if it differs.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        let mut shared = self.lock();
        let mut next = shared.value.clone();
        f(&mut next);
        if next == shared.value {
            return false;
        }
        shared.value = next;
        let Shared { value, subscribers } = &mut *shared;
        subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// Subscription handle returned by [`Observable::subscribe`].
///
/// Ends only when the observable itself is dropped.
pub struct Observed<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Observed<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next already-delivered value, without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for Observed<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_emits_current_value() {
        let obs = Observable::new(5u32);
        let mut sub = obs.subscribe();
        assert_eq!(sub.recv().await, Some(5));
        assert_eq!(sub.try_next(), None);
    }

    #[tokio::test]
    async fn test_duplicate_assignment_is_suppressed() {
        let obs = Observable::new(String::new());
        let mut sub = obs.subscribe();
        assert_eq!(sub.recv().await.as_deref(), Some(""));

        assert!(obs.set("a".to_string()));
        assert!(!obs.set("a".to_string()));
        assert!(obs.set("b".to_string()));

        assert_eq!(sub.recv().await.as_deref(), Some("a"));
        assert_eq!(sub.recv().await.as_deref(), Some("b"));
        assert_eq!(sub.try_next(), None);
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let obs = Observable::new(false);
        let sub = obs.subscribe();
        let _kept = obs.subscribe();
        assert_eq!(obs.subscriber_count(), 2);
        drop(sub);
        obs.set(true);
        assert_eq!(obs.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_ends_when_observable_dropped() {
        use futures::StreamExt;

        let obs = Observable::new(1u8);
        let mut sub = obs.subscribe();
        drop(obs);
        assert_eq!(sub.next().await, Some(1));
        assert_eq!(sub.next().await, None);
    }
}
