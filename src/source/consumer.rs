//! Per-subscriber frame queues
//!
//! Every subscriber of a [`StreamSource`](super::StreamSource) gets its own
//! queue, so each downstream pipeline reads at its own pace. The producer
//! never waits on a queue: what happens when one fills up is decided by the
//! [`QueuePolicy`].
//!
//! ```text
//!                    ┌── ConsumerQueue ──► StreamConsumer ──► pipeline A
//!   StreamSource ────┼── ConsumerQueue ──► StreamConsumer ──► pipeline B
//!                    └── ConsumerQueue ──► StreamConsumer ──► pipeline C
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::{ArrayQueue, SegQueue};
use futures::Stream;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::ConfigError;
use crate::media::Frame;

/// Default time a reader waits for the next item before giving up
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Item carried by a subscriber queue
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// A decoded frame
    Frame(Frame),
    /// The producer lost its feed; frames may be missing after this point
    Gap,
}

/// What a subscriber queue does when it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Never full; memory grows with the backlog
    #[default]
    Unbounded,
    /// Keep the newest items, evicting the oldest one
    DropOldest(usize),
    /// Keep the oldest items, discarding the incoming one
    DropNewest(usize),
}

impl QueuePolicy {
    /// Check the capacity of bounded policies
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            QueuePolicy::DropOldest(0) | QueuePolicy::DropNewest(0) => {
                Err(ConfigError::ZeroQueueCapacity)
            }
            _ => Ok(()),
        }
    }

    /// Queue capacity, `None` if unbounded
    pub fn capacity(&self) -> Option<usize> {
        match self {
            QueuePolicy::Unbounded => None,
            QueuePolicy::DropOldest(cap) | QueuePolicy::DropNewest(cap) => Some(*cap),
        }
    }
}

enum Queue {
    Unbounded(SegQueue<SourceEvent>),
    Bounded(ArrayQueue<SourceEvent>),
}

struct Shared {
    queue: Queue,
    policy: QueuePolicy,
    notify: Notify,
    dropped: AtomicU64,
    reader_alive: AtomicBool,
}

impl Shared {
    fn pop(&self) -> Option<SourceEvent> {
        match &self.queue {
            Queue::Unbounded(q) => q.pop(),
            Queue::Bounded(q) => q.pop(),
        }
    }

    fn len(&self) -> usize {
        match &self.queue {
            Queue::Unbounded(q) => q.len(),
            Queue::Bounded(q) => q.len(),
        }
    }
}

/// Create a connected producer/consumer pair
///
/// Bounded policies must have a non-zero capacity; callers validate first.
pub(crate) fn channel(
    policy: QueuePolicy,
    stall_timeout: Duration,
) -> (ConsumerQueue, StreamConsumer) {
    let queue = match policy.capacity() {
        None => Queue::Unbounded(SegQueue::new()),
        Some(cap) => Queue::Bounded(ArrayQueue::new(cap.max(1))),
    };

    let shared = Arc::new(Shared {
        queue,
        policy,
        notify: Notify::new(),
        dropped: AtomicU64::new(0),
        reader_alive: AtomicBool::new(true),
    });

    (
        ConsumerQueue {
            shared: Arc::clone(&shared),
        },
        StreamConsumer {
            shared,
            stall_timeout,
        },
    )
}

/// Producer end of a subscriber queue, held by the source
pub(crate) struct ConsumerQueue {
    shared: Arc<Shared>,
}

impl ConsumerQueue {
    /// Enqueue an event without waiting
    ///
    /// Returns false if an item was dropped to make this fit, or this item
    /// was itself dropped.
    pub(crate) fn push(&self, event: SourceEvent) -> bool {
        let accepted = match (&self.shared.queue, self.shared.policy) {
            (Queue::Unbounded(q), _) => {
                q.push(event);
                true
            }
            (Queue::Bounded(q), QueuePolicy::DropNewest(_)) => q.push(event).is_ok(),
            (Queue::Bounded(q), _) => q.force_push(event).is_none(),
        };

        if !accepted {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }

        self.shared.notify.notify_one();
        accepted
    }

    /// Whether the reading end has been dropped
    pub(crate) fn is_closed(&self) -> bool {
        !self.shared.reader_alive.load(Ordering::Acquire)
    }
}

/// Reading end of a subscriber queue
///
/// Not `Clone`: a queue has exactly one reader. Reads end on a gap or when
/// nothing arrives within the stall timeout; the next read starts over.
pub struct StreamConsumer {
    shared: Arc<Shared>,
    stall_timeout: Duration,
}

impl StreamConsumer {
    /// Wait for the next queued event
    ///
    /// Returns `None` if nothing arrived within the stall timeout.
    pub async fn next_event(&mut self) -> Option<SourceEvent> {
        let deadline = Instant::now() + self.stall_timeout;

        loop {
            if let Some(event) = self.shared.pop() {
                return Some(event);
            }

            if tokio::time::timeout_at(deadline, self.shared.notify.notified())
                .await
                .is_err()
            {
                // One last look: an item may have landed right at the deadline
                return self.shared.pop();
            }
        }
    }

    /// Wait for the next frame
    ///
    /// Returns `None` when the producer signalled a gap or the queue stalled.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        match self.next_event().await {
            Some(SourceEvent::Frame(frame)) => Some(frame),
            Some(SourceEvent::Gap) => {
                tracing::debug!("Consumer reached a gap in the source");
                None
            }
            None => {
                tracing::debug!(
                    timeout_ms = self.stall_timeout.as_millis() as u64,
                    "Consumer stalled"
                );
                None
            }
        }
    }

    /// Frames up to the next gap or stall, as a lazy stream
    ///
    /// Each call starts a fresh sequence over the same queue.
    pub fn frames(&mut self) -> impl Stream<Item = Frame> + '_ {
        futures::stream::unfold(self, |consumer| async move {
            let frame = consumer.next_frame().await?;
            Some((frame, consumer))
        })
    }

    /// Items waiting in the queue
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items lost to the overflow policy
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// The overflow policy of this queue
    pub fn policy(&self) -> QueuePolicy {
        self.shared.policy
    }

    /// How long a read waits before giving up
    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }
}

impl Drop for StreamConsumer {
    fn drop(&mut self) {
        self.shared.reader_alive.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("policy", &self.shared.policy)
            .field("len", &self.len())
            .field("dropped", &self.dropped())
            .finish()
    }
}
