//! Reference host loop for Unix.
//!
//! [`PollHost`] is a small single-threaded run loop in the shape of a GUI
//! toolkit's event loop: repeating millisecond timers, per-descriptor
//! notifiers that can be enabled and disabled, a blocking `exec` and a
//! non-blocking `process_events`. It is what [`EventLoop::new`] drives when
//! no other host is supplied.
//!
//! Notifier delivery is level-triggered: an enabled notifier whose
//! descriptor is still ready is activated again on the next pass.
//!
//! [`EventLoop::new`]: crate::EventLoop::new

mod poller;
mod timer;
mod waker;

use self::poller::{Event, Interest, Poller};
use self::timer::{TimerCallback, TimerQueue};
use self::waker::WakeFd;
use crate::config::Backend;
use crate::host::{Direction, HostLoop, HostWaker, Notifier, RawFd, TimerId};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Slot = Rc<RefCell<Box<dyn FnMut(RawFd)>>>;
type WakeSlot = Rc<RefCell<Box<dyn FnMut()>>>;

/// A notifier created by [`PollHost`].
///
/// The host only keeps a weak reference, so dropping the last `Rc`
/// detaches the notifier.
pub struct PollNotifier {
    fd: RawFd,
    direction: Direction,
    enabled: Cell<bool>,
    slot: RefCell<Option<Slot>>,
}

impl Notifier for PollNotifier {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn connect(&self, slot: Box<dyn FnMut(RawFd)>) {
        *self.slot.borrow_mut() = Some(Rc::new(RefCell::new(slot)));
    }

    fn disconnect(&self) {
        self.slot.borrow_mut().take();
    }
}

impl PollNotifier {
    /// Returns the slot if the notifier should be activated right now.
    fn armed_slot(&self) -> Option<Slot> {
        if !self.enabled.get() {
            return None;
        }
        self.slot.borrow().clone()
    }
}

/// Reference single-threaded host loop backed by `epoll` or `poll(2)`.
///
/// # Examples
///
/// ```rust,ignore
/// use hostloop::{EventLoop, PollHost};
/// use std::rc::Rc;
///
/// let host = Rc::new(PollHost::new()?);
/// let event_loop = EventLoop::with_host(host);
/// ```
pub struct PollHost {
    backend: Backend,
    poller: RefCell<Poller>,
    wake: Arc<WakeFd>,
    wake_slots: RefCell<Vec<WakeSlot>>,
    timers: RefCell<TimerQueue>,
    notifiers: RefCell<Vec<Weak<PollNotifier>>>,
    events: RefCell<Vec<Event>>,
    running: Cell<bool>,
    exit_code: Cell<Option<i32>>,
}

/// Clears the running flag on every exit path of `exec`.
struct ExecGuard<'a>(&'a PollHost);

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        self.0.running.set(false);
    }
}

impl PollHost {
    /// Creates a host using the process-wide selected backend.
    pub fn new() -> io::Result<Self> {
        let backend = Backend::selected()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        Self::with_backend(backend)
    }

    /// Creates a host using `backend`.
    pub fn with_backend(backend: Backend) -> io::Result<Self> {
        let wake = WakeFd::new()?;
        let poller = Poller::new(backend, wake.fd())?;

        tracing::debug!(backend = backend.id(), "created poll host");

        Ok(Self {
            backend,
            poller: RefCell::new(poller),
            wake: Arc::new(wake),
            wake_slots: RefCell::new(Vec::new()),
            timers: RefCell::new(TimerQueue::new()),
            notifiers: RefCell::new(Vec::new()),
            events: RefCell::new(Vec::new()),
            running: Cell::new(false),
            exit_code: Cell::new(None),
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Returns `true` while [`exec`](HostLoop::exec) is running.
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Number of live timers.
    pub fn active_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Number of live notifiers, enabled or not.
    pub fn active_notifiers(&self) -> usize {
        let mut notifiers = self.notifiers.borrow_mut();
        notifiers.retain(|n| n.strong_count() > 0);
        notifiers.len()
    }

    /// Prunes dropped notifiers and merges the enabled ones per descriptor.
    fn interests(&self) -> HashMap<RawFd, Interest> {
        let mut interests: HashMap<RawFd, Interest> = HashMap::new();
        let mut notifiers = self.notifiers.borrow_mut();

        notifiers.retain(|weak| {
            let Some(notifier) = weak.upgrade() else {
                return false;
            };

            if notifier.enabled.get() && notifier.slot.borrow().is_some() {
                let interest = interests.entry(notifier.fd).or_default();
                match notifier.direction {
                    Direction::Read => interest.read = true,
                    Direction::Write => interest.write = true,
                }
            }
            true
        });

        interests
    }

    /// Runs one pass: wait for readiness, run wake slots, activate ready
    /// notifiers, then fire due timers.
    fn iterate(&self, block: bool) -> io::Result<()> {
        let interests = self.interests();

        let timeout = if !block || self.exit_code.get().is_some() {
            Some(Duration::ZERO)
        } else {
            self.timers
                .borrow_mut()
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
        };

        let mut events = self.events.take();
        let woken = self
            .poller
            .borrow_mut()
            .wait(&interests, timeout, &mut events)?;

        if woken {
            self.wake.drain();
            let slots = self.wake_slots.borrow().clone();
            for slot in slots {
                if let Ok(mut on_wake) = slot.try_borrow_mut() {
                    on_wake();
                }
            }
        }

        for event in events.drain(..) {
            if event.readable {
                self.activate(event.fd, Direction::Read);
            }
            if event.writable {
                self.activate(event.fd, Direction::Write);
            }
        }
        *self.events.borrow_mut() = events;

        self.fire_timers();
        Ok(())
    }

    fn activate(&self, fd: RawFd, direction: Direction) {
        let matching: Vec<Rc<PollNotifier>> = self
            .notifiers
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|n| n.fd == fd && n.direction == direction)
            .collect();

        for notifier in matching {
            // An earlier slot in this pass may have disabled it.
            let Some(slot) = notifier.armed_slot() else {
                continue;
            };
            if let Ok(mut slot) = slot.try_borrow_mut() {
                slot(fd);
            }
        }
    }

    fn fire_timers(&self) {
        let due = self.timers.borrow_mut().expire(Instant::now());

        for (id, callback) in due {
            if !self.timers.borrow().is_live(id) {
                continue;
            }
            if let Ok(mut callback) = callback.try_borrow_mut() {
                callback(id);
            }
        }
    }
}

impl HostLoop for PollHost {
    fn exec(&self) -> i32 {
        if self.running.get() {
            tracing::warn!("poll host is already running");
            return -1;
        }

        self.running.set(true);
        self.exit_code.set(None);
        let _guard = ExecGuard(self);

        loop {
            if let Some(code) = self.exit_code.take() {
                return code;
            }

            if let Err(err) = self.iterate(true) {
                tracing::error!(error = %err, "poll host failed to wait for events");
                return -1;
            }
        }
    }

    fn exit(&self, code: i32) {
        if self.running.get() {
            self.exit_code.set(Some(code));
        }
    }

    fn process_events(&self) {
        if let Err(err) = self.iterate(false) {
            tracing::error!(error = %err, "poll host failed to process events");
        }
    }

    fn start_timer(&self, interval_ms: u64, on_timeout: Box<dyn FnMut(TimerId)>) -> TimerId {
        let callback: TimerCallback = Rc::new(RefCell::new(on_timeout));
        self.timers
            .borrow_mut()
            .start(Duration::from_millis(interval_ms), callback)
    }

    fn kill_timer(&self, id: TimerId) {
        self.timers.borrow_mut().kill(id);
    }

    fn create_notifier(&self, fd: RawFd, direction: Direction) -> io::Result<Rc<dyn Notifier>> {
        if fd < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file descriptor {fd}"),
            ));
        }

        let notifier = Rc::new(PollNotifier {
            fd,
            direction,
            enabled: Cell::new(false),
            slot: RefCell::new(None),
        });

        self.notifiers.borrow_mut().push(Rc::downgrade(&notifier));
        Ok(notifier)
    }

    fn create_waker(&self, on_wake: Box<dyn FnMut()>) -> Arc<dyn HostWaker> {
        self.wake_slots
            .borrow_mut()
            .push(Rc::new(RefCell::new(on_wake)));
        self.wake.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::thread;

    fn backends() -> Vec<Backend> {
        Backend::registered().to_vec()
    }

    #[test]
    fn test_timer_fires_and_exits() {
        for backend in backends() {
            let host = Rc::new(PollHost::with_backend(backend).unwrap());
            let fired = Rc::new(Cell::new(0));

            let h = Rc::downgrade(&host);
            let f = fired.clone();
            host.start_timer(
                1,
                Box::new(move |id| {
                    f.set(f.get() + 1);
                    if let Some(host) = h.upgrade() {
                        host.kill_timer(id);
                        host.exit(3);
                    }
                }),
            );

            assert_eq!(host.exec(), 3);
            assert_eq!(fired.get(), 1);
            assert!(!host.is_running());
            assert_eq!(host.active_timers(), 0);
        }
    }

    #[test]
    fn test_exit_when_not_running_is_ignored() {
        let host = Rc::new(PollHost::with_backend(Backend::Poll).unwrap());
        host.exit(1);

        let h = Rc::downgrade(&host);
        host.start_timer(
            0,
            Box::new(move |id| {
                if let Some(host) = h.upgrade() {
                    host.kill_timer(id);
                    host.exit(0);
                }
            }),
        );
        assert_eq!(host.exec(), 0);
    }

    #[test]
    fn test_notifier_enable_and_drop() {
        for backend in backends() {
            let host = PollHost::with_backend(backend).unwrap();
            let (a, mut b) = UnixStream::pair().unwrap();
            a.set_nonblocking(true).unwrap();

            let notifier = host.create_notifier(a.as_raw_fd(), Direction::Read).unwrap();
            let hits = Rc::new(Cell::new(0));
            let h = hits.clone();
            notifier.connect(Box::new(move |_| h.set(h.get() + 1)));

            std::io::Write::write_all(&mut b, b"x").unwrap();

            host.process_events();
            assert_eq!(hits.get(), 0, "disabled notifiers are never activated");

            notifier.set_enabled(true);
            host.process_events();
            assert_eq!(hits.get(), 1);

            host.process_events();
            assert_eq!(hits.get(), 2, "delivery is level-triggered");

            drop(notifier);
            host.process_events();
            assert_eq!(hits.get(), 2);
            assert_eq!(host.active_notifiers(), 0);
        }
    }

    #[test]
    fn test_waker_from_other_thread() {
        for backend in backends() {
            let host = Rc::new(PollHost::with_backend(backend).unwrap());
            let h = Rc::downgrade(&host);
            let waker = host.create_waker(Box::new(move || {
                if let Some(host) = h.upgrade() {
                    host.exit(7);
                }
            }));

            let remote = thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                waker.wake();
            });

            assert_eq!(host.exec(), 7);
            remote.join().unwrap();
        }
    }

    #[test]
    fn test_invalid_descriptor_is_rejected() {
        let host = PollHost::with_backend(Backend::Poll).unwrap();
        let err = host.create_notifier(-1, Direction::Write).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
