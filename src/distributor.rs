//! Frame distribution between the capture session and consumers.
//!
//! Two primitives, picked per consumer:
//! - `FrameQueue`: bounded queue with drop-oldest overflow. Consumers see
//!   frames in capture order without duplicates, minus whatever was evicted.
//! - `LatestFrame`: single overwrite slot with a condition signal. Consumers
//!   only ever see the newest frame and skip the rest.
//!
//! `FrameDistributor` fans each published frame out to one `LatestFrame` and
//! any number of subscribed `FrameQueue`s. Publishing never blocks on a
//! consumer; the only shared structure is guarded by short critical sections.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::frame::{Frame, SharedFrame};

/// Default number of frames a queue holds before evicting the oldest.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// FrameQueue: bounded, drop-oldest
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct QueueState {
    frames: VecDeque<SharedFrame>,
    dropped: u64,
    closed: bool,
}

/// Bounded FIFO of frames that evicts the oldest entry instead of blocking.
#[derive(Debug)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl FrameQueue {
    /// Create a queue. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                dropped: 0,
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Insert a frame without blocking. Returns the evicted frame, if any.
    pub fn publish(&self, frame: SharedFrame) -> Option<SharedFrame> {
        let evicted = {
            let mut state = lock(&self.state);
            let evicted = if state.frames.len() >= self.capacity {
                state.dropped += 1;
                state.frames.pop_front()
            } else {
                None
            };
            state.frames.push_back(frame);
            evicted
        };
        self.available.notify_one();
        evicted
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns `None` on timeout, or immediately once the queue is closed and empty.
    pub fn take(&self, timeout: Duration) -> Option<SharedFrame> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        loop {
            if let Some(frame) = state.frames.pop_front() {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = next;
        }
    }

    pub fn try_take(&self) -> Option<SharedFrame> {
        lock(&self.state).frames.pop_front()
    }

    /// Wake all waiters and make further `take` calls return once drained.
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn len(&self) -> usize {
        lock(&self.state).frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        lock(&self.state).dropped
    }
}

// ----------------------------------------------------------------------------
// LatestFrame: single overwrite slot
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SlotState {
    frame: Option<SharedFrame>,
    closed: bool,
}

/// Single-slot cell holding only the most recent frame.
#[derive(Debug, Default)]
pub struct LatestFrame {
    state: Mutex<SlotState>,
    updated: Condvar,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot and wake every waiter.
    pub fn publish(&self, frame: SharedFrame) {
        lock(&self.state).frame = Some(frame);
        self.updated.notify_all();
    }

    pub fn latest(&self) -> Option<SharedFrame> {
        lock(&self.state).frame.clone()
    }

    /// Wait up to `timeout` for a frame whose sequence is greater than `after`.
    ///
    /// Pass `0` to accept whatever is currently in the slot.
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<SharedFrame> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        loop {
            if let Some(frame) = state.frame.as_ref() {
                if frame.sequence() > after {
                    return Some(frame.clone());
                }
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _) = self
                .updated
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = next;
        }
    }

    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.updated.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

// ----------------------------------------------------------------------------
// FrameDistributor: fan-out
// ----------------------------------------------------------------------------

/// Fans published frames out to the latest-frame slot and every subscribed queue.
#[derive(Debug)]
pub struct FrameDistributor {
    latest: Arc<LatestFrame>,
    queues: Mutex<Vec<Arc<FrameQueue>>>,
    capacity: usize,
    published: AtomicU64,
}

impl FrameDistributor {
    /// `capacity` is the default size of queues handed out by [`subscribe`](Self::subscribe).
    pub fn new(capacity: usize) -> Self {
        Self {
            latest: Arc::new(LatestFrame::new()),
            queues: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            published: AtomicU64::new(0),
        }
    }

    /// Publish a frame to every consumer. Never blocks on consumers.
    pub fn publish(&self, frame: Frame) -> SharedFrame {
        let frame = Arc::new(frame);
        {
            let queues = lock(&self.queues);
            for queue in queues.iter() {
                if let Some(evicted) = queue.publish(frame.clone()) {
                    log::trace!("queue full, dropped frame {}", evicted.sequence());
                }
            }
        }
        self.latest.publish(frame.clone());
        self.published.fetch_add(1, Ordering::Relaxed);
        frame
    }

    /// New queue-backed consumer view with the default capacity.
    pub fn subscribe(&self) -> Arc<FrameQueue> {
        self.subscribe_with_capacity(self.capacity)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Arc<FrameQueue> {
        let queue = Arc::new(FrameQueue::new(capacity));
        lock(&self.queues).push(queue.clone());
        queue
    }

    /// Latest-frame consumer view.
    pub fn latest(&self) -> Arc<LatestFrame> {
        self.latest.clone()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wake every waiting consumer so it can observe shutdown.
    pub fn close(&self) {
        for queue in lock(&self.queues).iter() {
            queue.close();
        }
        self.latest.close();
    }
}

impl Default for FrameDistributor {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
