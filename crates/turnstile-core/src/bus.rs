//! In-process message bus connecting a dispatcher with its workers.
//!
//! The [`Bus`] is a bounded multi-producer, multi-consumer queue of tagged
//! messages. It supports two kinds of receive:
//!
//! - [`Bus::consume`] waits for the oldest message carrying one exact tag.
//!   Referral dispatchers use it to pick up the status reports addressed to
//!   their own port.
//! - [`Bus::consume_any`] waits for the oldest message of any tag. Relay
//!   workers use it, which turns the bus itself into the load balancer.
//!
//! ## Delivery
//!
//! Every published message is handed to exactly one consumer. If consumers are
//! already waiting, the message goes to the longest-waiting one whose filter
//! matches; otherwise it is queued and the next matching consumer takes it.
//! A consumer that is dropped while waiting puts any message already handed to
//! it back at the head of the queue.
//!
//! ## Capacity and teardown
//!
//! Publishing onto a full bus fails with [`PublishError::Full`], returning the
//! message. After [`Bus::close`] every waiting and future consumer observes
//! [`BusError::Closed`] and queued messages are discarded.

use crate::{BusError, PublishError, Tag};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::oneshot;

/// Cloneable handle to a shared bus.
pub struct Bus<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for Bus<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<M> {
    capacity: usize,
    state: Mutex<State<M>>,
}

struct State<M> {
    queue: VecDeque<Envelope<M>>,
    waiters: VecDeque<Waiter<M>>,
    closed: bool,
}

struct Envelope<M> {
    tag: Tag,
    message: M,
}

#[derive(Debug, Clone, Copy)]
enum Filter {
    Tag(Tag),
    Any,
}

impl Filter {
    const fn matches(self, tag: Tag) -> bool {
        match self {
            Self::Tag(want) => want == tag,
            Self::Any => true,
        }
    }
}

struct Waiter<M> {
    filter: Filter,
    tx: oneshot::Sender<Envelope<M>>,
}

impl<M> State<M> {
    /// Hands `envelope` to the longest-waiting matching consumer. Gives it
    /// back if no live consumer wants it.
    fn deliver(&mut self, mut envelope: Envelope<M>) -> Option<Envelope<M>> {
        let mut idx = 0;
        while idx < self.waiters.len() {
            if self.waiters[idx].tx.is_closed() {
                self.waiters.remove(idx);
                continue;
            }
            if !self.waiters[idx].filter.matches(envelope.tag) {
                idx += 1;
                continue;
            }
            let Some(waiter) = self.waiters.remove(idx) else {
                break;
            };
            match waiter.tx.send(envelope) {
                Ok(()) => return None,
                // The consumer went away between the check and the send.
                Err(returned) => envelope = returned,
            }
        }
        Some(envelope)
    }

    fn take(&mut self, filter: Filter) -> Option<Envelope<M>> {
        let pos = self.queue.iter().position(|e| filter.matches(e.tag))?;
        self.queue.remove(pos)
    }
}

impl<M: Send + 'static> Bus<M> {
    /// Creates a bus that holds at most `capacity` undelivered messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                state: Mutex::new(State {
                    queue: VecDeque::with_capacity(capacity.min(1024)),
                    waiters: VecDeque::new(),
                    closed: false,
                }),
            }),
        }
    }

    /// Publishes `message` under `tag`.
    ///
    /// Never waits: the message is either handed to a waiting consumer, queued,
    /// or returned inside the error.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Closed`] after [`Bus::close`].
    /// - [`PublishError::Full`] when `capacity` messages are already queued.
    pub fn publish(&self, tag: Tag, message: M) -> Result<(), PublishError<M>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PublishError::Closed(message));
        }

        let Some(envelope) = state.deliver(Envelope { tag, message }) else {
            return Ok(());
        };

        if state.queue.len() >= self.inner.capacity {
            return Err(PublishError::Full(envelope.message));
        }
        state.queue.push_back(envelope);
        Ok(())
    }

    /// Waits for the oldest message published under exactly `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] once the bus is closed.
    pub async fn consume(&self, tag: Tag) -> Result<M, BusError> {
        self.recv(Filter::Tag(tag)).await.map(|e| e.message)
    }

    /// Waits for the oldest message of any tag.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] once the bus is closed.
    pub async fn consume_any(&self) -> Result<M, BusError> {
        self.recv(Filter::Any).await.map(|e| e.message)
    }

    async fn recv(&self, filter: Filter) -> Result<Envelope<M>, BusError> {
        let rx = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            if let Some(envelope) = state.take(filter) {
                return Ok(envelope);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { filter, tx });
            rx
        };

        PendingRecv {
            rx: Some(rx),
            inner: &self.inner,
        }
        .wait()
        .await
    }

    /// Closes the bus, waking every consumer with [`BusError::Closed`].
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        tracing::debug!(
            discarded = state.queue.len(),
            waiters = state.waiters.len(),
            "closing bus"
        );
        state.closed = true;
        state.queue.clear();
        // Dropping the senders resolves every pending receive.
        state.waiters.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of queued, undelivered messages.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// A registered receive. If it is dropped after a message was already handed
/// to it, the message is put back; otherwise its waiter is unlisted.
struct PendingRecv<'a, M> {
    rx: Option<oneshot::Receiver<Envelope<M>>>,
    inner: &'a Inner<M>,
}

impl<M> PendingRecv<'_, M> {
    async fn wait(mut self) -> Result<Envelope<M>, BusError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(BusError::Closed);
        };
        let result = rx.await;
        self.rx = None;
        result.map_err(|_| BusError::Closed)
    }
}

impl<M> Drop for PendingRecv<'_, M> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();
        let envelope = rx.try_recv().ok();

        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        match envelope {
            Some(envelope) => {
                if let Some(envelope) = state.deliver(envelope) {
                    state.queue.push_front(envelope);
                }
            }
            // Nothing arrived: our waiter is still listed.
            None => state.waiters.retain(|w| !w.tx.is_closed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::{collections::HashSet, time::Duration};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn consume_filters_by_tag() {
        let bus = Bus::new(8);
        bus.publish(7, "a").unwrap();
        bus.publish(9, "b").unwrap();
        bus.publish(7, "c").unwrap();

        assert_eq!(bus.consume(9).await.unwrap(), "b");
        assert_eq!(bus.consume(7).await.unwrap(), "a");
        assert_eq!(bus.consume(7).await.unwrap(), "c");
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn consume_any_is_fifo_across_tags() {
        let bus = Bus::new(8);
        bus.publish(3, 1).unwrap();
        bus.publish(1, 2).unwrap();
        bus.publish(2, 3).unwrap();

        assert_eq!(bus.consume_any().await.unwrap(), 1);
        assert_eq!(bus.consume_any().await.unwrap(), 2);
        assert_eq!(bus.consume_any().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn tagged_waiter_is_not_woken_by_other_tags() {
        let bus = Bus::<u32>::new(8);
        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.consume(5).await })
        };
        tokio::task::yield_now().await;

        bus.publish(4, 40).unwrap();
        bus.publish(5, 50).unwrap();

        assert_eq!(timeout(WAIT, waiter).await.unwrap().unwrap(), Ok(50));
        assert_eq!(bus.consume_any().await.unwrap(), 40);
    }

    #[tokio::test]
    async fn publish_on_full_bus_returns_message() {
        let bus = Bus::new(2);
        bus.publish(1, 'a').unwrap();
        bus.publish(1, 'b').unwrap();

        let err = bus.publish(1, 'c').unwrap_err();
        assert_eq!(err.kind(), BusError::Full);
        assert_eq!(err.into_inner(), 'c');
        assert_eq!(bus.len(), 2);
    }

    #[tokio::test]
    async fn waiting_consumer_bypasses_capacity() {
        let bus = Bus::<u8>::new(0);
        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.consume_any().await })
        };
        // Let the consumer register before publishing.
        while bus.inner.state.lock().waiters.is_empty() {
            tokio::task::yield_now().await;
        }

        bus.publish(1, 9).unwrap();
        assert_eq!(timeout(WAIT, waiter).await.unwrap().unwrap(), Ok(9));
        assert_eq!(bus.publish(1, 10).unwrap_err().kind(), BusError::Full);
    }

    #[tokio::test]
    async fn close_wakes_waiters_and_rejects_publish() {
        let bus = Bus::<u8>::new(4);
        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.consume(1).await })
        };
        while bus.inner.state.lock().waiters.is_empty() {
            tokio::task::yield_now().await;
        }

        bus.close();
        assert_eq!(
            timeout(WAIT, waiter).await.unwrap().unwrap(),
            Err(BusError::Closed)
        );
        assert_eq!(bus.publish(1, 1).unwrap_err().kind(), BusError::Closed);
        assert_eq!(bus.consume_any().await, Err(BusError::Closed));
    }

    #[tokio::test]
    async fn cancelled_consumer_does_not_lose_messages() {
        let bus = Bus::<u8>::new(4);
        // A consume that times out leaves no stale waiter behind.
        assert!(
            timeout(Duration::from_millis(10), bus.consume_any())
                .await
                .is_err()
        );

        bus.publish(1, 42).unwrap();
        assert_eq!(bus.consume_any().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn timed_out_consumers_leave_no_waiters() {
        let bus = Bus::<u8>::new(4);
        for _ in 0..100 {
            assert!(
                timeout(Duration::from_millis(1), bus.consume(3))
                    .await
                    .is_err()
            );
        }
        assert!(bus.inner.state.lock().waiters.is_empty());

        bus.publish(3, 7).unwrap();
        assert_eq!(bus.consume(3).await.unwrap(), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn each_message_is_delivered_exactly_once() {
        const MESSAGES: u32 = 10_000;
        const CONSUMERS: usize = 16;

        let bus = Bus::<u32>::new(MESSAGES as usize);
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Ok(n) = bus.consume_any().await {
                        seen.push(n);
                    }
                    seen
                })
            })
            .collect();

        for n in 0..MESSAGES {
            bus.publish(crate::RELAY_REQUEST_TAG, n).unwrap();
        }
        while !bus.is_empty() {
            tokio::task::yield_now().await;
        }
        // Give in-hand deliveries time to land before tearing down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.close();

        let mut all = HashSet::new();
        let mut total = 0;
        for seen in join_all(consumers).await {
            let seen = seen.unwrap();
            total += seen.len();
            all.extend(seen);
        }
        assert_eq!(total, MESSAGES as usize);
        assert_eq!(all.len(), MESSAGES as usize);
    }
}
