//! Per-thread exception context stack.
//!
//! Every active try-scope owns one context on its thread's stack. The top
//! of the stack is the active context; a throw records its exception there.
//! Contexts are popped by `TryScope` on every exit path, including unwinds.
//!
//! Scopes are only opened by [`attempt`](super::attempt), which owns the
//! resumption point every context on the stack relies on.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;

use super::engine::Exception;

struct Context {
    generation: u64,
    thrown: Option<Exception>,
}

thread_local! {
    static STACK: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
    static LAST_REASON: RefCell<String> = const { RefCell::new(String::new()) };
    static GENERATION: Cell<u64> = const { Cell::new(0) };
}

/// Handle of an active try-scope. Dropping it pops the scope's context.
///
/// Bound to the thread that created it.
#[derive(Debug)]
pub(crate) struct TryScope {
    depth: usize,
    generation: u64,
    _thread_bound: PhantomData<*const ()>,
}

impl TryScope {
    /// Push a new context and make it the active one.
    #[must_use]
    pub(crate) fn enter() -> Self {
        let generation = GENERATION.with(|next| {
            let id = next.get().wrapping_add(1);
            next.set(id);
            id
        });
        let depth = STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Context {
                generation,
                thrown: None,
            });
            stack.len()
        });
        Self {
            depth,
            generation,
            _thread_bound: PhantomData,
        }
    }

    /// 1-based position of this scope on the thread's stack.
    #[must_use]
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    // Whether this handle still owns the context at its depth. A handle
    // whose context was discarded by an outer scope owns nothing.
    fn owns(&self, stack: &[Context]) -> bool {
        stack
            .get(self.depth - 1)
            .is_some_and(|ctx| ctx.generation == self.generation)
    }

    /// Exception recorded in this scope's context, if any.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn thrown(&self) -> Option<Exception> {
        STACK.with(|stack| {
            let stack = stack.borrow();
            if !self.owns(&stack) {
                return None;
            }
            stack[self.depth - 1].thrown.clone()
        })
    }

    /// Pop this scope's context, restoring the previous one as active, and
    /// hand back whatever was thrown into it.
    pub(crate) fn exit(self) -> Option<Exception> {
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if !self.owns(&stack) {
                return None;
            }
            stack[self.depth - 1].thrown.take()
        })
    }
}

impl Drop for TryScope {
    fn drop(&mut self) {
        // Also discards contexts of inner scopes that were leaked. A stale
        // handle leaves the scopes now living at its depth alone.
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if self.owns(&stack) {
                stack.truncate(self.depth - 1);
            }
        });
    }
}

/// Push a try-scope on the calling thread.
#[must_use]
pub(crate) fn enter_try() -> TryScope {
    TryScope::enter()
}

/// Pop a try-scope, returning the exception thrown into it.
pub(crate) fn exit_try(scope: TryScope) -> Option<Exception> {
    scope.exit()
}

/// Number of active try-scopes on the calling thread.
#[must_use]
pub fn active_depth() -> usize {
    STACK.with(|stack| stack.borrow().len())
}

/// Record `exception` in the active context and return that context's
/// depth. Hands the exception back when no scope is active.
pub(crate) fn record(exception: Exception) -> Result<usize, Exception> {
    STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let depth = stack.len();
        match stack.last_mut() {
            Some(ctx) => {
                ctx.thrown = Some(exception);
                Ok(depth)
            }
            None => Err(exception),
        }
    })
}

/// Reason of the most recently caught exception on this thread, or an
/// empty string.
#[must_use]
pub fn last_reason() -> String {
    LAST_REASON.with(|reason| reason.borrow().clone())
}

pub(crate) fn set_last_reason(reason: &str) {
    LAST_REASON.with(|last| {
        let mut last = last.borrow_mut();
        last.clear();
        last.push_str(reason);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::ExceptionCode;
    use std::panic::Location;

    fn sample(message: &str) -> Exception {
        Exception::new(ExceptionCode::ERROR, message, Location::caller())
    }

    #[test]
    fn scopes_nest_and_restore() {
        assert_eq!(active_depth(), 0);
        let outer = enter_try();
        assert_eq!(outer.depth(), 1);
        {
            let inner = enter_try();
            assert_eq!(inner.depth(), 2);
            assert_eq!(active_depth(), 2);
        }
        assert_eq!(active_depth(), 1);
        assert_eq!(exit_try(outer), None);
        assert_eq!(active_depth(), 0);
    }

    #[test]
    fn record_targets_the_top_context() {
        let outer = enter_try();
        let inner = enter_try();
        assert_eq!(record(sample("inner")).unwrap(), 2);
        assert_eq!(inner.thrown().unwrap().message(), "inner");
        assert!(outer.thrown().is_none());
        assert_eq!(inner.exit().unwrap().message(), "inner");
        assert_eq!(record(sample("outer")).unwrap(), 1);
        assert_eq!(outer.exit().unwrap().message(), "outer");
    }

    #[test]
    fn record_without_scope_returns_exception() {
        let err = record(sample("orphan")).unwrap_err();
        assert_eq!(err.message(), "orphan");
    }

    #[test]
    fn dropping_outer_discards_leaked_inner() {
        let outer = enter_try();
        std::mem::forget(enter_try());
        assert_eq!(active_depth(), 2);
        drop(outer);
        assert_eq!(active_depth(), 0);
    }

    #[test]
    fn stale_handle_leaves_reused_depth_alone() {
        let outer = enter_try();
        let stale = enter_try();
        assert_eq!(stale.depth(), 2);
        // Dropping `outer` first discards the context `stale` pointed at.
        drop(outer);
        assert_eq!(active_depth(), 0);

        let first = enter_try();
        let second = enter_try();
        assert_eq!(second.depth(), stale.depth());
        assert_eq!(record(sample("kept")).unwrap(), 2);

        assert!(stale.thrown().is_none());
        drop(stale);
        assert_eq!(active_depth(), 2);
        assert_eq!(second.exit().unwrap().message(), "kept");
        drop(first);
        assert_eq!(active_depth(), 0);
    }

    #[test]
    fn stacks_are_per_thread() {
        let _scope = enter_try();
        set_last_reason("main thread");
        std::thread::spawn(|| {
            assert_eq!(active_depth(), 0);
            assert_eq!(last_reason(), "");
        })
        .join()
        .unwrap();
        assert_eq!(active_depth(), 1);
        assert_eq!(last_reason(), "main thread");
    }
}
