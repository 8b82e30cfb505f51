use crate::host::{Direction, RawFd};
use crate::runtime::EventLoop;

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Default)]
struct Signal {
    ready: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

/// Resolves once `fd` is ready in `direction`.
pub(super) struct Readiness {
    event_loop: EventLoop,
    fd: RawFd,
    direction: Direction,
    signal: Rc<Signal>,
    registered: bool,
}

impl Readiness {
    pub(super) fn new(fd: RawFd, direction: Direction) -> io::Result<Self> {
        let event_loop = EventLoop::current()
            .ok_or_else(|| io::Error::other("no event loop is running on this thread"))?;

        Ok(Self {
            event_loop,
            fd,
            direction,
            signal: Rc::new(Signal::default()),
            registered: false,
        })
    }

    fn register(&mut self) -> io::Result<()> {
        let signal = self.signal.clone();
        let callback = move || {
            signal.ready.set(true);
            if let Some(waker) = signal.waker.take() {
                waker.wake();
            }
        };

        let registered = match self.direction {
            Direction::Read => self.event_loop.add_reader(self.fd, callback),
            Direction::Write => self.event_loop.add_writer(self.fd, callback),
        };
        registered.map_err(|e| io::Error::other(e.to_string()))?;

        self.registered = true;
        Ok(())
    }

    fn unregister(&mut self) {
        if !self.registered {
            return;
        }
        self.registered = false;

        match self.direction {
            Direction::Read => self.event_loop.remove_reader(self.fd),
            Direction::Write => self.event_loop.remove_writer(self.fd),
        };
    }
}

impl Future for Readiness {
    type Output = io::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.signal.ready.get() {
            this.unregister();
            return Poll::Ready(Ok(()));
        }

        *this.signal.waker.borrow_mut() = Some(cx.waker().clone());

        if !this.registered {
            this.register()?;
        }

        Poll::Pending
    }
}

impl Drop for Readiness {
    fn drop(&mut self) {
        self.unregister();
    }
}
