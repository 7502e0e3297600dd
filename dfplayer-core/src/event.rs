//! Level-triggered event flag.
//!
//! Unlike [`embassy_sync::signal::Signal`], waiting does not consume the
//! event: it stays set until someone calls [`Event::clear`], and a task that
//! starts waiting while it is set returns immediately.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

/// Maximum number of distinct tasks parked on one event at a time.
///
/// Registering more wakes all current waiters, which then re-register.
pub const EVENT_WAITERS: usize = 4;

struct EventState {
    set: bool,
    wakers: MultiWakerRegistration<EVENT_WAITERS>,
}

/// A set/clear flag that tasks can wait on.
pub struct Event<M: RawMutex> {
    state: Mutex<M, RefCell<EventState>>,
}

impl<M: RawMutex> Event<M> {
    /// Create a cleared event.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(EventState {
                set: false,
                wakers: MultiWakerRegistration::new(),
            })),
        }
    }

    /// Set the event and wake every waiter.
    pub fn set(&self) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.set = true;
            s.wakers.wake();
        });
    }

    /// Clear the event.
    ///
    /// A waiter that was woken but has not run yet re-checks the flag when
    /// polled, finds it clear and keeps waiting.
    pub fn clear(&self) {
        self.state.lock(|s| s.borrow_mut().set = false);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.state.lock(|s| s.borrow().set)
    }

    /// Wait until the event is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        poll_fn(|cx| self.poll_wait(cx)).await
    }

    /// Poll form of [`wait`](Self::wait).
    pub fn poll_wait(&self, cx: &mut Context<'_>) -> Poll<()> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if s.set {
                Poll::Ready(())
            } else {
                s.wakers.register(cx.waker());
                Poll::Pending
            }
        })
    }
}

impl<M: RawMutex> Default for Event<M> {
    fn default() -> Self {
        Self::new()
    }
}
