//! In-Process Stream Broker
//!
//! Partitioned append-only streams with consumer-group cursors. Each group
//! owns a cursor per partition; a partition is claimed by at most one worker
//! of a group until that worker acknowledges the delivery, which gives
//! per-partition ordering and no duplicate delivery within a group.
//!
//! Groups attach on their first `receive`, starting at the end of every
//! partition (`latest`) or at its beginning (`earliest`).

use std::collections::HashMap;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::application::ports::{Delivery, StreamBroker, StreamError};
use crate::domain::subscription::{ConsumerGroupSubscription, StartOffset};

#[derive(Debug)]
struct GroupCursor {
    next: Vec<u64>,
    claimed: Vec<bool>,
    rotor: usize,
}

impl GroupCursor {
    fn attach(partitions: &[Vec<Vec<u8>>], start: StartOffset) -> Self {
        let next = partitions
            .iter()
            .map(|log| match start {
                StartOffset::Latest => log.len() as u64,
                StartOffset::Earliest => 0,
            })
            .collect();
        Self {
            next,
            claimed: vec![false; partitions.len()],
            rotor: 0,
        }
    }
}

#[derive(Debug)]
struct StreamState {
    partitions: Vec<Vec<Vec<u8>>>,
    groups: HashMap<String, GroupCursor>,
    publish_rotor: usize,
}

impl StreamState {
    fn claim(&mut self, stream: &str, sub: &ConsumerGroupSubscription) -> Option<Delivery> {
        let partitions = &self.partitions;
        let cursor = self
            .groups
            .entry(sub.group.clone())
            .or_insert_with(|| GroupCursor::attach(partitions, sub.start_offset));

        let count = partitions.len();
        let start = cursor.rotor;
        cursor.rotor = (cursor.rotor + 1) % count.max(1);

        (0..count).map(|i| (start + i) % count).find_map(|p| {
            let offset = cursor.next[p];
            let payload = partitions[p].get(usize::try_from(offset).ok()?)?;
            if cursor.claimed[p] {
                return None;
            }
            cursor.claimed[p] = true;
            Some(Delivery {
                stream: stream.to_string(),
                partition: u32::try_from(p).ok()?,
                offset,
                payload: payload.clone(),
            })
        })
    }
}

/// Shared in-memory broker.
#[derive(Debug, Default)]
pub struct InMemoryStreamBroker {
    streams: Mutex<HashMap<String, StreamState>>,
    arrivals: Notify,
    outage: AtomicBool,
}

impl InMemoryStreamBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name` with `partitions` partitions. Existing streams are kept.
    pub fn create_stream(&self, name: &str, partitions: usize) {
        self.streams
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| StreamState {
                partitions: vec![Vec::new(); partitions.max(1)],
                groups: HashMap::new(),
                publish_rotor: 0,
            });
    }

    /// Append to the next partition in rotation. Returns `(partition, offset)`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownStream`] if the stream was never created.
    pub fn publish(&self, stream: &str, payload: impl Into<Vec<u8>>) -> Result<(u32, u64), StreamError> {
        let partition = {
            let mut streams = self.streams.lock();
            let state = streams
                .get_mut(stream)
                .ok_or_else(|| StreamError::UnknownStream(stream.to_string()))?;
            let p = state.publish_rotor % state.partitions.len();
            state.publish_rotor = state.publish_rotor.wrapping_add(1);
            p
        };
        self.publish_to(stream, u32::try_from(partition).unwrap_or(0), payload)
    }

    /// Append to a specific partition. Returns `(partition, offset)`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownStream`] for a missing stream or
    /// partition.
    pub fn publish_to(
        &self,
        stream: &str,
        partition: u32,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(u32, u64), StreamError> {
        let offset = {
            let mut streams = self.streams.lock();
            let log = streams
                .get_mut(stream)
                .and_then(|state| state.partitions.get_mut(partition as usize))
                .ok_or_else(|| StreamError::UnknownStream(format!("{stream}/{partition}")))?;
            log.push(payload.into());
            log.len() as u64 - 1
        };
        self.arrivals.notify_waiters();
        Ok((partition, offset))
    }

    /// Messages not yet acknowledged by `group`, or `None` if the group has
    /// not attached.
    #[must_use]
    pub fn pending(&self, stream: &str, group: &str) -> Option<u64> {
        let streams = self.streams.lock();
        let state = streams.get(stream)?;
        let cursor = state.groups.get(group)?;
        Some(
            state
                .partitions
                .iter()
                .zip(&cursor.next)
                .map(|(log, next)| (log.len() as u64).saturating_sub(*next))
                .sum(),
        )
    }

    /// Make every receive fail until cleared.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
        if !down {
            self.arrivals.notify_waiters();
        }
    }

    fn try_claim(&self, sub: &ConsumerGroupSubscription) -> Result<Option<Delivery>, StreamError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StreamError::Unavailable("stream broker is not reachable".to_string()));
        }
        let mut streams = self.streams.lock();
        let state = streams
            .get_mut(&sub.stream)
            .ok_or_else(|| StreamError::UnknownStream(sub.stream.clone()))?;
        Ok(state.claim(&sub.stream, sub))
    }
}

#[async_trait]
impl StreamBroker for InMemoryStreamBroker {
    async fn receive(
        &self,
        subscription: &ConsumerGroupSubscription,
        wait: Duration,
    ) -> Result<Option<Delivery>, StreamError> {
        let deadline = Instant::now() + wait;

        loop {
            let mut arrival = pin!(self.arrivals.notified());
            arrival.as_mut().enable();

            if let Some(delivery) = self.try_claim(subscription)? {
                return Ok(Some(delivery));
            }

            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(
        &self,
        subscription: &ConsumerGroupSubscription,
        delivery: &Delivery,
    ) -> Result<(), StreamError> {
        {
            let mut streams = self.streams.lock();
            let not_outstanding = || StreamError::NotOutstanding {
                stream: delivery.stream.clone(),
                partition: delivery.partition,
                offset: delivery.offset,
            };

            let cursor = streams
                .get_mut(&subscription.stream)
                .ok_or_else(|| StreamError::UnknownStream(subscription.stream.clone()))?
                .groups
                .get_mut(&subscription.group)
                .ok_or_else(not_outstanding)?;

            let p = delivery.partition as usize;
            let outstanding = cursor.claimed.get(p).copied().unwrap_or(false)
                && cursor.next.get(p) == Some(&delivery.offset);
            if !outstanding {
                return Err(not_outstanding());
            }

            cursor.next[p] += 1;
            cursor.claimed[p] = false;
        }

        // A released partition may have more messages behind it.
        self.arrivals.notify_waiters();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
