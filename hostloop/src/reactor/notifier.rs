use crate::error::LoopError;
use crate::host::{Direction, Notifier, RawFd};
use crate::runtime::EventLoop;
use crate::runtime::LoopInner;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

type ReadyCallback = Rc<RefCell<Box<dyn FnMut()>>>;

struct Registration {
    id: u64,
    notifier: Rc<dyn Notifier>,
    callback: ReadyCallback,
}

type Registry = RefCell<Option<HashMap<RawFd, Registration>>>;

/// Readiness registrations keyed by descriptor, one map per direction.
///
/// A ready notifier is disabled and its callback deferred through
/// `call_soon`; it is re-enabled only after the callback returns, and only
/// if the registration it belongs to is still current. So a callback never
/// runs concurrently with itself and never for a registration that was
/// removed or replaced. Both maps become `None` on close.
pub(crate) struct Multiplexer {
    readers: Registry,
    writers: Registry,
    next_id: Cell<u64>,
}

impl Multiplexer {
    pub(crate) fn new() -> Self {
        Self {
            readers: RefCell::new(Some(HashMap::new())),
            writers: RefCell::new(Some(HashMap::new())),
            next_id: Cell::new(1),
        }
    }

    fn registry(&self, direction: Direction) -> &Registry {
        match direction {
            Direction::Read => &self.readers,
            Direction::Write => &self.writers,
        }
    }

    /// Registers `callback` for `fd`, replacing any registration in the
    /// same direction.
    pub(crate) fn add(
        &self,
        owner: &Rc<LoopInner>,
        fd: RawFd,
        direction: Direction,
        callback: Box<dyn FnMut()>,
    ) -> Result<(), LoopError> {
        check_fd(fd)?;
        if self.registry(direction).borrow().is_none() {
            return Err(LoopError::Closed);
        }

        let notifier = owner.host.create_notifier(fd, direction)?;
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let weak_owner = Rc::downgrade(owner);
        let weak_notifier = Rc::downgrade(&notifier);
        notifier.connect(Box::new(move |fd| {
            if let Some(owner) = weak_owner.upgrade() {
                on_ready(&owner, direction, fd, id, &weak_notifier);
            }
        }));

        loop_debug!(
            owner.debug.get(),
            fd = ?fd,
            ?direction,
            "adding notifier"
        );

        let replaced = {
            let mut registry = self.registry(direction).borrow_mut();
            let Some(map) = registry.as_mut() else {
                return Err(LoopError::Closed);
            };
            map.insert(
                fd,
                Registration {
                    id,
                    notifier: notifier.clone(),
                    callback: Rc::new(RefCell::new(callback)),
                },
            )
        };

        if let Some(old) = replaced {
            old.notifier.set_enabled(false);
            old.notifier.disconnect();
        }
        notifier.set_enabled(true);

        Ok(())
    }

    /// Removes the registration for `fd`.
    ///
    /// Returns `false` if there was none or the multiplexer is closed.
    pub(crate) fn remove(&self, fd: RawFd, direction: Direction) -> bool {
        let removed = {
            let mut registry = self.registry(direction).borrow_mut();
            match registry.as_mut() {
                Some(map) => map.remove(&fd),
                None => return false,
            }
        };

        match removed {
            Some(registration) => {
                registration.notifier.set_enabled(false);
                true
            }
            None => false,
        }
    }

    /// Enabled state of the notifier registered for `fd`.
    pub(crate) fn is_enabled(&self, fd: RawFd, direction: Direction) -> Option<bool> {
        self.registry(direction)
            .borrow()
            .as_ref()?
            .get(&fd)
            .map(|registration| registration.notifier.is_enabled())
    }

    fn current_id(&self, fd: RawFd, direction: Direction) -> Option<u64> {
        self.registry(direction)
            .borrow()
            .as_ref()?
            .get(&fd)
            .map(|registration| registration.id)
    }

    fn lookup(
        &self,
        fd: RawFd,
        direction: Direction,
        id: u64,
    ) -> Option<(Rc<dyn Notifier>, ReadyCallback)> {
        self.registry(direction)
            .borrow()
            .as_ref()?
            .get(&fd)
            .filter(|registration| registration.id == id)
            .map(|registration| (registration.notifier.clone(), registration.callback.clone()))
    }

    /// Disables every notifier and refuses further registrations.
    pub(crate) fn close(&self) {
        let readers = self.readers.borrow_mut().take();
        let writers = self.writers.borrow_mut().take();

        for registration in readers.into_iter().chain(writers).flat_map(HashMap::into_values) {
            registration.notifier.set_enabled(false);
            registration.notifier.disconnect();
        }
    }
}

#[cfg(unix)]
fn check_fd(fd: RawFd) -> Result<(), LoopError> {
    if fd < 0 {
        return Err(LoopError::InvalidFd(i64::from(fd)));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_fd(_fd: RawFd) -> Result<(), LoopError> {
    Ok(())
}

/// Slot connected to every notifier.
fn on_ready(
    owner: &Rc<LoopInner>,
    direction: Direction,
    fd: RawFd,
    id: u64,
    notifier: &Weak<dyn Notifier>,
) {
    let notifier = notifier.upgrade();

    if owner.notifiers.current_id(fd, direction) != Some(id) {
        tracing::warn!(
            fd = ?fd,
            ?direction,
            "notifier is ready, even though it should be disabled; not calling the callback and disabling"
        );
        if let Some(notifier) = notifier {
            notifier.set_enabled(false);
        }
        return;
    }

    loop_debug!(owner.debug.get(), fd = ?fd, ?direction, "notifier ready");
    if let Some(notifier) = notifier {
        notifier.set_enabled(false);
    }

    let weak = Rc::downgrade(owner);
    EventLoop::from_inner(owner.clone()).call_soon(move || {
        if let Some(owner) = weak.upgrade() {
            run_ready(&owner, direction, fd, id);
        }
    });
}

/// Re-enables or detaches the notifier once its callback has returned,
/// including when the callback panicked.
struct Rearm<'a> {
    owner: &'a LoopInner,
    notifier: Rc<dyn Notifier>,
    direction: Direction,
    fd: RawFd,
    id: u64,
}

impl Drop for Rearm<'_> {
    fn drop(&mut self) {
        if self.owner.notifiers.current_id(self.fd, self.direction) == Some(self.id) {
            self.notifier.set_enabled(true);
        } else {
            self.notifier.disconnect();
        }
    }
}

fn run_ready(owner: &Rc<LoopInner>, direction: Direction, fd: RawFd, id: u64) {
    let Some((notifier, callback)) = owner.notifiers.lookup(fd, direction, id) else {
        return;
    };

    let _rearm = Rearm {
        owner,
        notifier,
        direction,
        fd,
        id,
    };

    if let Ok(mut callback) = callback.try_borrow_mut() {
        (&mut **callback)();
    }
}
