//! Hooks for forcing specific interleavings in tests.
//!
//! The hooks are per thread and fire at most once, so tests running in parallel don't step on
//! each other.

use std::cell::{Cell, RefCell};

pub(crate) type TestHook = Box<dyn FnOnce()>;

thread_local! {
    /// Called right before `find` tries to unlink a deleted node.
    static BEFORE_UNLINK: RefCell<Option<TestHook>> = RefCell::new(None);

    /// How many times `find` started over from the head on this thread.
    static RESTARTS: Cell<usize> = Cell::new(0);
}

/// Sets the hook called before the next unlink attempt of `find` on this thread.
pub(crate) fn set_before_unlink_hook(hook: TestHook) {
    BEFORE_UNLINK.with(|h| {
        let mut h = h.borrow_mut();
        assert!(h.is_none(), "Before unlink hook already set");
        *h = Some(hook);
    });
}

pub(super) fn call_before_unlink_hook() {
    // Taken out first, the hook itself is free to search the list.
    let hook = BEFORE_UNLINK.with(|h| h.borrow_mut().take());
    if let Some(hook) = hook {
        hook();
    }
}

pub(super) fn record_restart() {
    RESTARTS.with(|r| r.set(r.get() + 1));
}

pub(crate) fn restarts() -> usize {
    RESTARTS.with(Cell::get)
}
