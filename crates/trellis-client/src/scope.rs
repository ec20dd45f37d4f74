//! Explicit task scoping for cross-thread correlation.
//!
//! Instrumented code needs to know which task is "current" so that child
//! events can declare the right parent. Rather than relying on implicit
//! thread-local inheritance across spawned work, the scope is an explicit
//! handle: a caller that wants work attributed to a task passes its
//! [`TaskId`] by value and enters it where the work runs.
//!
//! [`TaskScope::enter`] binds an id to the calling thread for the lifetime
//! of the returned guard; the guard restores the previous binding on every
//! exit path, including panics and early error returns. Bindings nest.

use std::cell::RefCell;
use std::marker::PhantomData;

use trellis_core::TaskId;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<TaskId>> = const { RefCell::new(Vec::new()) };
}

/// The current-task scope of the calling thread.
#[derive(Debug)]
pub struct TaskScope;

impl TaskScope {
    /// Binds `task_id` as the current scope of the calling thread.
    ///
    /// The binding lasts until the returned guard drops; scopes nest in LIFO
    /// order. The guard is deliberately not `Send`: to carry a scope to
    /// another thread, pass the id by value and `enter` it there.
    #[must_use]
    pub fn enter(task_id: impl Into<TaskId>) -> ScopeGuard {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(task_id.into()));
        ScopeGuard {
            _not_send: PhantomData,
        }
    }

    /// Returns the innermost bound task id, if any.
    ///
    /// Event emitters use this as the `parent_id` for events created on this
    /// thread.
    #[must_use]
    pub fn current() -> Option<TaskId> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

/// RAII guard restoring the previous scope binding on drop.
#[must_use = "the scope ends when the guard drops"]
#[derive(Debug)]
pub struct ScopeGuard {
    // Bindings are per-thread; the guard must drop on the thread that
    // created it.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_binds_and_drop_restores() {
        assert_eq!(TaskScope::current(), None);
        {
            let _guard = TaskScope::enter("outer_1");
            assert_eq!(TaskScope::current(), Some(TaskId::new("outer_1")));
        }
        assert_eq!(TaskScope::current(), None);
    }

    #[test]
    fn scopes_nest_in_lifo_order() {
        let _outer = TaskScope::enter("outer_1");
        {
            let _inner = TaskScope::enter("inner_1");
            assert_eq!(TaskScope::current(), Some(TaskId::new("inner_1")));
        }
        assert_eq!(TaskScope::current(), Some(TaskId::new("outer_1")));
    }

    #[test]
    fn scope_is_released_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _guard = TaskScope::enter("doomed_1");
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(TaskScope::current(), None);
    }

    #[test]
    fn ids_cross_threads_by_value() {
        let _guard = TaskScope::enter("parent_1");
        let parent = TaskScope::current().expect("bound scope");

        let handle = std::thread::spawn(move || {
            // The spawned thread starts unbound; the caller hands it the id.
            assert_eq!(TaskScope::current(), None);
            let _guard = TaskScope::enter(parent);
            TaskScope::current()
        });

        let seen = handle.join().expect("thread");
        assert_eq!(seen, Some(TaskId::new("parent_1")));
    }
}
