//! Replies awaited by in-flight requests.
//!
//! The [`PendingResponses`] table pairs replies arriving on one transport
//! with the fan-out attempt that is waiting for them on another:
//! - A fan-out attempt calls [`await_response`](PendingResponses::await_response)
//!   and suspends on a oneshot receiver without holding the lock.
//! - The monitor loop of the replying transport calls
//!   [`deliver`](PendingResponses::deliver), which hands the reply to the
//!   oldest waiter for that id.
//!
//! A reply can overtake its waiter (the sink may answer before the attempt
//! starts waiting), so deliveries without a waiter are buffered. Buffered
//! replies nobody claims are pruned once they are older than the response
//! timeout.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use hemma_common::Message;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::allocator::CorrelationId;

/// Table of replies awaited by correlation id.
#[derive(Debug)]
pub struct PendingResponses {
    state: Mutex<PendingState>,
    stale_after: Duration,
}

#[derive(Debug, Default)]
struct PendingState {
    entries: HashMap<CorrelationId, PendingEntry>,
    /// Buffered replies by arrival, oldest first.
    arrivals: VecDeque<(Instant, CorrelationId)>,
    next_waiter: u64,
}

impl PendingState {
    /// Drop buffered replies older than `stale_after`.
    ///
    /// Only ids with an expired arrival are visited.
    fn prune(&mut self, now: Instant, stale_after: Duration) {
        while let Some(&(received, id)) = self.arrivals.front() {
            if now.duration_since(received) < stale_after {
                break;
            }
            self.arrivals.pop_front();

            if let Some(entry) = self.entries.get_mut(&id) {
                entry.drop_stale(now, stale_after);
                if entry.is_empty() {
                    self.entries.remove(&id);
                }
            }
        }
    }
}

/// At most one of the two queues is non-empty.
#[derive(Debug, Default)]
struct PendingEntry {
    waiters: VecDeque<(u64, oneshot::Sender<Message>)>,
    buffered: VecDeque<(Instant, Message)>,
}

impl PendingEntry {
    fn is_empty(&self) -> bool {
        self.waiters.is_empty() && self.buffered.is_empty()
    }

    fn drop_stale(&mut self, now: Instant, stale_after: Duration) {
        self.buffered
            .retain(|(received, _)| now.duration_since(*received) < stale_after);
    }
}

/// Removes a waiter from the table however its wait ends.
struct WaiterGuard<'a> {
    table: &'a PendingResponses,
    id: CorrelationId,
    waiter: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.table.forget_waiter(self.id, self.waiter);
    }
}

impl PendingResponses {
    /// Create a table whose unclaimed replies expire after `stale_after`.
    pub fn new(stale_after: Duration) -> Self {
        Self {
            state: Mutex::new(PendingState::default()),
            stale_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait up to `timeout` for the reply to `id`.
    ///
    /// Returns immediately when a reply is already buffered. Returns `None`
    /// on timeout. The waiter is removed from the table before returning, so
    /// a reply landing right as the timeout fires is not observed.
    pub async fn await_response(&self, id: CorrelationId, timeout: Duration) -> Option<Message> {
        let (waiter, rx) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.prune(Instant::now(), self.stale_after);

            if let Some(entry) = state.entries.get_mut(&id) {
                let buffered = entry.buffered.pop_front();
                if entry.is_empty() {
                    state.entries.remove(&id);
                }
                if let Some((_, message)) = buffered {
                    return Some(message);
                }
            }

            let waiter = state.next_waiter;
            state.next_waiter = state.next_waiter.wrapping_add(1);

            let (tx, rx) = oneshot::channel();
            state
                .entries
                .entry(id)
                .or_default()
                .waiters
                .push_back((waiter, tx));
            (waiter, rx)
        };

        let _guard = WaiterGuard {
            table: self,
            id,
            waiter,
        };

        tokio::time::timeout(timeout, rx).await.ok()?.ok()
    }

    /// Record `message` as the reply to `id`.
    ///
    /// Wakes the oldest waiter and returns `true`, or buffers the reply for
    /// a later [`await_response`](Self::await_response) and returns `false`.
    pub fn deliver(&self, id: CorrelationId, mut message: Message) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        let now = Instant::now();

        state.prune(now, self.stale_after);

        let entry = state.entries.entry(id).or_default();
        while let Some((_, waiter)) = entry.waiters.pop_front() {
            match waiter.send(message) {
                Ok(()) => {
                    if entry.is_empty() {
                        state.entries.remove(&id);
                    }
                    return true;
                }
                // Receiver gone (waiter timed out or was cancelled).
                Err(returned) => message = returned,
            }
        }

        entry.buffered.push_back((now, message));
        state.arrivals.push_back((now, id));
        false
    }

    /// Number of ids with waiters or buffered replies.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget_waiter(&self, id: CorrelationId, waiter: u64) {
        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(entry) = state.entries.get_mut(&id) {
            entry.waiters.retain(|(candidate, _)| *candidate != waiter);
            if entry.is_empty() {
                state.entries.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn id(value: u32) -> CorrelationId {
        CorrelationId::new(value).unwrap()
    }

    fn reply(value: u64) -> Message {
        Message::new().with("id", value).with("data", "ok")
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_wakes_waiter() {
        let table = Arc::new(PendingResponses::new(TIMEOUT));

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move { table.await_response(id(1), TIMEOUT).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(table.len(), 1);

        assert!(table.deliver(id(1), reply(1)));
        assert_eq!(waiter.await.unwrap(), Some(reply(1)));
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_before_wait_is_buffered() {
        let table = PendingResponses::new(TIMEOUT);

        assert!(!table.deliver(id(2), reply(2)));
        assert_eq!(table.len(), 1);

        assert_eq!(table.await_response(id(2), TIMEOUT).await, Some(reply(2)));
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_none_and_cleans_up() {
        let table = PendingResponses::new(TIMEOUT);

        let started = Instant::now();
        assert_eq!(table.await_response(id(3), TIMEOUT).await, None);
        assert!(started.elapsed() >= TIMEOUT);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_is_consumed_once() {
        let table = PendingResponses::new(TIMEOUT);

        table.deliver(id(4), reply(4));
        assert_eq!(table.await_response(id(4), TIMEOUT).await, Some(reply(4)));
        assert_eq!(table.await_response(id(4), Duration::from_secs(1)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclaimed_reply_goes_stale() {
        let table = PendingResponses::new(TIMEOUT);

        assert!(!table.deliver(id(5), reply(5)));
        tokio::time::advance(TIMEOUT).await;

        assert_eq!(table.await_response(id(5), Duration::from_secs(1)).await, None);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entries_pruned_on_delivery() {
        let table = PendingResponses::new(TIMEOUT);

        table.deliver(id(6), reply(6));
        tokio::time::advance(TIMEOUT).await;
        table.deliver(id(7), reply(7));

        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claimed_reply_does_not_expire_a_newer_one() {
        let table = PendingResponses::new(TIMEOUT);

        table.deliver(id(12), reply(1));
        assert_eq!(table.await_response(id(12), TIMEOUT).await, Some(reply(1)));

        tokio::time::advance(TIMEOUT / 2).await;
        table.deliver(id(12), reply(2));

        // The first arrival is now stale; the reply buffered after it is not.
        tokio::time::advance(TIMEOUT / 2).await;
        table.deliver(id(13), reply(3));
        assert_eq!(table.len(), 2);

        assert_eq!(table.await_response(id(12), TIMEOUT).await, Some(reply(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_expired_arrivals_are_pruned() {
        let table = PendingResponses::new(TIMEOUT);

        for value in 20..30 {
            table.deliver(id(value), reply(value as u64));
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        // Ids 20..=25 arrived at least TIMEOUT ago.
        table.deliver(id(30), reply(30));
        assert_eq!(table.len(), 5);
        assert_eq!(table.await_response(id(26), TIMEOUT).await, Some(reply(26)));
        assert_eq!(table.await_response(id(25), Duration::from_secs(1)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_ids_are_independent() {
        let table = Arc::new(PendingResponses::new(TIMEOUT));

        let slow = {
            let table = table.clone();
            tokio::spawn(async move { table.await_response(id(8), TIMEOUT).await })
        };
        let fast = {
            let table = table.clone();
            tokio::spawn(async move { table.await_response(id(9), TIMEOUT).await })
        };
        tokio::task::yield_now().await;

        table.deliver(id(9), reply(9));
        assert_eq!(fast.await.unwrap(), Some(reply(9)));
        assert_eq!(slow.await.unwrap(), None);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_delivery_serves_one_waiter() {
        let table = Arc::new(PendingResponses::new(TIMEOUT));

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let table = table.clone();
                tokio::spawn(async move { table.await_response(id(10), TIMEOUT).await })
            })
            .collect();
        tokio::task::yield_now().await;

        assert!(table.deliver(id(10), reply(1)));
        assert!(table.deliver(id(10), reply(2)));

        let mut results = Vec::new();
        for waiter in waiters {
            results.push(waiter.await.unwrap());
        }
        assert_eq!(results, vec![Some(reply(1)), Some(reply(2))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_is_removed() {
        let table = Arc::new(PendingResponses::new(TIMEOUT));

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move { table.await_response(id(11), TIMEOUT).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(table.len(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert!(table.is_empty());
    }
}
