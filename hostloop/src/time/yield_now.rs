use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Yields once to the loop.
///
/// The task re-queues itself behind every callback already scheduled, so
/// other tasks and ready fds get a turn before it continues.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }

        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
