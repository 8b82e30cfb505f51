use super::core::LoopInner;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

thread_local! {
    /// Every loop created on this thread, by id.
    ///
    /// Task wakers carry only a loop id so they can be sent across threads;
    /// a wake on the owning thread resolves the id here and schedules the
    /// task directly instead of going through the dispatch channel.
    static LOOPS: RefCell<HashMap<u64, Weak<LoopInner>>> = RefCell::new(HashMap::new());

    /// The loop currently running (or attached) on this thread.
    static CURRENT_LOOP: RefCell<Option<Weak<LoopInner>>> = const { RefCell::new(None) };
}

pub(crate) fn register(id: u64, inner: Weak<LoopInner>) {
    let _ = LOOPS.try_with(|loops| loops.borrow_mut().insert(id, inner));
}

pub(crate) fn unregister(id: u64) {
    let _ = LOOPS.try_with(|loops| loops.borrow_mut().remove(&id));
}

/// The loop with `id` if it lives on this thread.
pub(crate) fn local_loop(id: u64) -> Option<Rc<LoopInner>> {
    LOOPS
        .try_with(|loops| loops.borrow().get(&id).and_then(Weak::upgrade))
        .ok()
        .flatten()
}

pub(crate) fn current() -> Option<Rc<LoopInner>> {
    CURRENT_LOOP
        .try_with(|cell| cell.borrow().as_ref().and_then(Weak::upgrade))
        .ok()
        .flatten()
}

/// Restores the previously current loop when dropped.
pub(crate) struct ContextGuard {
    prev: Option<Weak<LoopInner>>,
}

/// Installs `inner` as the current loop until the guard is dropped.
pub(crate) fn enter(inner: Weak<LoopInner>) -> ContextGuard {
    let prev = CURRENT_LOOP
        .try_with(|cell| cell.replace(Some(inner)))
        .ok()
        .flatten();

    ContextGuard { prev }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        let _ = CURRENT_LOOP.try_with(|cell| cell.replace(prev));
    }
}
