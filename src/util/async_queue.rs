//! Unbounded single-producer/multi-consumer FIFO with blocking `take` and
//! sentinel-drain (spec.md §4.1).
//!
//! `take()` calls that are already parked get a dedicated oneshot channel
//! registered as a waiter; `push` either satisfies the oldest waiter
//! directly or appends to the backing deque. `drain` empties the deque and
//! resolves every currently-registered waiter with a clone of the
//! sentinel — it does not affect `take` calls made afterward.

use std::collections::VecDeque;

use tokio::sync::{oneshot, Mutex};

enum Delivery<T> {
    Value(T),
    Drained(T),
}

/// Outcome of a [`AsyncQueue::take`] call.
pub enum Taken<T> {
    Value(T),
    Drained(T),
}

struct Inner<T> {
    queue: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<Delivery<T>>>,
}

pub struct AsyncQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Enqueue an item. Never blocks. If a `take()` is already parked
    /// waiting, hands the item straight to the oldest one (preserving FIFO
    /// order across pushes).
    pub async fn push(&self, item: T) {
        let mut inner = self.inner.lock().await;
        let mut item = item;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(Delivery::Value(item)) {
                Ok(()) => return,
                // Receiver was dropped (take() future cancelled); try the next waiter.
                Err(Delivery::Value(returned)) => item = returned,
                Err(_) => unreachable!("push only ever sends Delivery::Value"),
            }
        }
        inner.queue.push_back(item);
    }

    /// Block until an item is available, or until a concurrent [`Self::drain`]
    /// resolves this call with the sentinel.
    pub async fn take(&self) -> Taken<T> {
        let rx = {
            let mut inner = self.inner.lock().await;
            if let Some(item) = inner.queue.pop_front() {
                return Taken::Value(item);
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };

        match rx.await {
            Ok(Delivery::Value(v)) => Taken::Value(v),
            Ok(Delivery::Drained(v)) => Taken::Drained(v),
            // Sender dropped without delivering: treat as an empty drain.
            Err(_) => unreachable!("AsyncQueue never drops a waiter without a reply"),
        }
    }

    /// Discard all queued items and resolve every outstanding `take()` with
    /// `sentinel`. Subsequent `take()` calls behave normally again.
    pub async fn drain(&self, sentinel: T)
    where
        T: Clone,
    {
        let mut inner = self.inner.lock().await;
        inner.queue.clear();
        while let Some(waiter) = inner.waiters.pop_front() {
            let _ = waiter.send(Delivery::Drained(sentinel.clone()));
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn push_then_take_returns_value() {
        let q: AsyncQueue<i32> = AsyncQueue::new();
        q.push(42).await;
        match q.take().await {
            Taken::Value(v) => assert_eq!(v, 42),
            Taken::Drained(_) => panic!("expected value"),
        }
    }

    #[tokio::test]
    async fn take_blocks_until_push() {
        let q = Arc::new(AsyncQueue::<i32>::new());
        let q2 = Arc::clone(&q);
        let handle = tokio::spawn(async move { q2.take().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push(7).await;

        match handle.await.unwrap() {
            Taken::Value(v) => assert_eq!(v, 7),
            Taken::Drained(_) => panic!("expected value"),
        }
    }

    #[tokio::test]
    async fn fifo_order_preserved_across_pushes() {
        let q: AsyncQueue<i32> = AsyncQueue::new();
        q.push(1).await;
        q.push(2).await;
        q.push(3).await;
        let mut out = Vec::new();
        for _ in 0..3 {
            if let Taken::Value(v) = q.take().await {
                out.push(v);
            }
        }
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn drain_resolves_all_outstanding_takers_with_sentinel() {
        let q = Arc::new(AsyncQueue::<i32>::new());
        let mut handles = Vec::new();
        for _ in 0..3 {
            let q2 = Arc::clone(&q);
            handles.push(tokio::spawn(async move { q2.take().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.drain(-1).await;

        for h in handles {
            match h.await.unwrap() {
                Taken::Drained(v) => assert_eq!(v, -1),
                Taken::Value(_) => panic!("expected drained sentinel"),
            }
        }
    }

    #[tokio::test]
    async fn drain_discards_queued_items() {
        let q: AsyncQueue<i32> = AsyncQueue::new();
        q.push(1).await;
        q.push(2).await;
        q.drain(0).await;
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn take_after_drain_behaves_normally() {
        let q: AsyncQueue<i32> = AsyncQueue::new();
        q.drain(-1).await;
        q.push(5).await;
        match q.take().await {
            Taken::Value(v) => assert_eq!(v, 5),
            Taken::Drained(_) => panic!("expected value after drain settled"),
        }
    }
}
