//! Bounded FIFO of received frames.
//!
//! [`FrameQueue`] decouples the UART receive loop from the frame consumer.
//! It maintains two level-triggered [`Event`]s on every mutation:
//!
//! - *data available* is set exactly when `len() > 0`
//! - *space available* is set exactly when `len() < N`
//!
//! Producers choose between dropping on overflow ([`FrameQueue::try_push`])
//! and waiting for space ([`FrameQueue::push`]).

use core::cell::RefCell;

use dfplayer_proto::RawFrame;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Deque;

use crate::event::Event;

/// Error type for queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueueError {
    /// Queue was full; the frame was dropped.
    Overflow,
    /// Queue was empty.
    Empty,
}

/// Bounded frame queue with capacity `N`.
pub struct FrameQueue<M: RawMutex, const N: usize> {
    frames: Mutex<M, RefCell<Deque<RawFrame, N>>>,
    data_available: Event<M>,
    space_available: Event<M>,
}

impl<M: RawMutex, const N: usize> FrameQueue<M, N> {
    /// Create an empty queue.
    pub fn new() -> Self {
        let queue = Self {
            frames: Mutex::new(RefCell::new(Deque::new())),
            data_available: Event::new(),
            space_available: Event::new(),
        };
        if N > 0 {
            queue.space_available.set();
        }
        queue
    }

    /// Bring both events in line with the current length.
    fn update_levels(&self, len: usize) {
        if len > 0 {
            self.data_available.set();
        } else {
            self.data_available.clear();
        }
        if len < N {
            self.space_available.set();
        } else {
            self.space_available.clear();
        }
    }

    /// Append a frame, dropping it if the queue is full.
    pub fn try_push(&self, frame: RawFrame) -> Result<(), QueueError> {
        self.frames.lock(|frames| {
            let mut frames = frames.borrow_mut();
            let result = frames.push_back(frame).map_err(|_| QueueError::Overflow);
            self.update_levels(frames.len());
            result
        })
    }

    /// Append a frame, waiting for space if the queue is full.
    pub async fn push(&self, frame: RawFrame) {
        loop {
            if self.try_push(frame).is_ok() {
                return;
            }
            self.space_available.wait().await;
        }
    }

    /// Remove the oldest frame.
    pub fn pop(&self) -> Result<RawFrame, QueueError> {
        self.frames.lock(|frames| {
            let mut frames = frames.borrow_mut();
            let frame = frames.pop_front().ok_or(QueueError::Empty);
            self.update_levels(frames.len());
            frame
        })
    }

    /// Wait for data, then remove the oldest frame.
    pub async fn receive(&self) -> RawFrame {
        loop {
            self.data_available.wait().await;
            if let Ok(frame) = self.pop() {
                return frame;
            }
        }
    }

    /// Discard every queued frame.
    pub fn clear(&self) {
        self.frames.lock(|frames| {
            let mut frames = frames.borrow_mut();
            frames.clear();
            self.update_levels(0);
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock(|frames| frames.borrow().len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[must_use]
    pub fn is_data_available(&self) -> bool {
        self.data_available.is_set()
    }

    #[must_use]
    pub fn is_space_available(&self) -> bool {
        self.space_available.is_set()
    }

    pub async fn wait_data_available(&self) {
        self.data_available.wait().await;
    }

    pub async fn wait_space_available(&self) {
        self.space_available.wait().await;
    }
}

impl<M: RawMutex, const N: usize> Default for FrameQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}
