use crate::runtime::{EventLoop, Handle};

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Creates a future that completes after `duration`.
///
/// The timer is a `call_at` on the loop running the task, armed on first
/// poll.
///
/// # Panics
///
/// Panics if polled outside of a running event loop.
///
/// # Examples
///
/// ```rust,ignore
/// sleep(Duration::from_millis(10)).await;
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    Sleep::until(Instant::now() + duration)
}

#[derive(Default)]
struct Alarm {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

/// Future returned by [`sleep`].
///
/// Dropping it before the deadline cancels the scheduled callback.
pub struct Sleep {
    deadline: Instant,
    alarm: Rc<Alarm>,
    handle: Option<Handle>,
}

impl Sleep {
    /// A sleep completing at `deadline`.
    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline,
            alarm: Rc::new(Alarm::default()),
            handle: None,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.alarm.fired.get() || Instant::now() >= this.deadline {
            return Poll::Ready(());
        }

        *this.alarm.waker.borrow_mut() = Some(cx.waker().clone());

        if this.handle.is_none() {
            let Some(event_loop) = EventLoop::current() else {
                panic!("sleep polled outside of a running event loop");
            };

            let alarm = this.alarm.clone();
            this.handle = Some(event_loop.call_at(this.deadline, move || {
                alarm.fired.set(true);
                if let Some(waker) = alarm.waker.take() {
                    waker.wake();
                }
            }));
        }

        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
    }
}
