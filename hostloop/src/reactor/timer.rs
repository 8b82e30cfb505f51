use crate::host::{HostLoop, TimerId};
use crate::runtime::Handle;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

struct TimerShared {
    host: Weak<dyn HostLoop>,
    callbacks: RefCell<HashMap<TimerId, Handle>>,
    stopped: Cell<bool>,
    debug: Cell<bool>,
}

/// Maps loop callbacks onto one-shot uses of the host's repeating timers.
///
/// Every scheduled callback arms its own host timer. The first time that
/// timer fires it is killed and the handle runs, unless it was cancelled
/// in the meantime. Callbacks sharing a delay fire in scheduling order
/// because the host orders timers with equal deadlines by start order.
pub(crate) struct TimerBridge {
    shared: Rc<TimerShared>,
}

impl TimerBridge {
    pub(crate) fn new(host: &Rc<dyn HostLoop>) -> Self {
        Self {
            shared: Rc::new(TimerShared {
                host: Rc::downgrade(host),
                callbacks: RefCell::new(HashMap::new()),
                stopped: Cell::new(false),
                debug: Cell::new(false),
            }),
        }
    }

    pub(crate) fn set_debug(&self, enabled: bool) {
        self.shared.debug.set(enabled);
    }

    /// Arms a host timer that runs `handle` once after `delay`.
    ///
    /// The delay is rounded up to whole milliseconds. After
    /// [`stop`](Self::stop) nothing is armed and the handle never runs.
    pub(crate) fn add_callback(&self, handle: Handle, delay: Duration) -> Handle {
        if self.shared.stopped.get() {
            loop_debug!(self.shared.debug.get(), "timer bridge stopped, dropping callback");
            return handle;
        }

        let Some(host) = self.shared.host.upgrade() else {
            return handle;
        };

        let millis = u64::try_from(delay.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX);
        let shared = Rc::downgrade(&self.shared);
        let host_ref = Rc::downgrade(&host);

        let id = host.start_timer(
            millis,
            Box::new(move |id| match shared.upgrade() {
                Some(shared) => shared.on_timeout(id),
                None => {
                    if let Some(host) = host_ref.upgrade() {
                        host.kill_timer(id);
                    }
                }
            }),
        );

        loop_debug!(self.shared.debug.get(), timer = id, millis, "registering timer");
        let previous = self.shared.callbacks.borrow_mut().insert(id, handle.clone());
        debug_assert!(previous.is_none(), "host reused live timer id {id}");

        handle
    }

    /// Marks the bridge stopped. Timers already armed are killed as they
    /// fire instead of running their callbacks.
    pub(crate) fn stop(&self) {
        loop_debug!(self.shared.debug.get(), "stopping timers");
        self.shared.stopped.set(true);
    }

    /// Callbacks armed but not yet fired.
    pub(crate) fn pending(&self) -> usize {
        self.shared.callbacks.borrow().len()
    }
}

impl TimerShared {
    fn on_timeout(&self, id: TimerId) {
        let handle = self.callbacks.borrow_mut().remove(&id);
        if let Some(host) = self.host.upgrade() {
            host.kill_timer(id);
        }

        if self.stopped.get() {
            return;
        }

        match handle {
            None => loop_debug!(self.debug.get(), timer = id, "timer fired with no callback"),
            Some(handle) if handle.cancelled() => {
                loop_debug!(self.debug.get(), timer = id, "handle cancelled");
            }
            Some(handle) => {
                loop_debug!(self.debug.get(), timer = id, "calling handle");
                handle.run();
            }
        }
    }
}
