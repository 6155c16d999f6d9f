//! Stage-scoped logging context.
//!
//! Every log record emitted while a run is in flight is tagged with a
//! hierarchical stage path (e.g. `ITER_3 > J_3`), mirroring the original's
//! `contextvars`-backed `log_stage` context manager. Rust has no coroutine
//! scheduler to thread a context var through, but the controller is
//! single-threaded-sequential per run (§5), so a plain `thread_local!` stack
//! is sufficient: a [`StageGuard`] pushes a name on construction and pops it
//! on `Drop`, guaranteeing release on every exit path including `?`-early
//! returns and panics.

use std::cell::RefCell;

thread_local! {
    static STAGE_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Returns the current stage path, e.g. `"ITER_3 > J_3"`, or `"INIT"` when
/// no stage is active.
#[must_use]
pub fn current_stage() -> String {
    STAGE_STACK.with(|stack| {
        let stack = stack.borrow();
        if stack.is_empty() {
            "INIT".to_string()
        } else {
            stack.join(" > ")
        }
    })
}

/// An RAII guard that pushes `name` onto the thread-local stage stack and
/// pops it when dropped. Nested guards form a strict stack.
#[derive(Debug)]
#[must_use = "dropping this immediately pops the stage it just pushed"]
pub struct StageGuard {
    _private: (),
}

impl StageGuard {
    /// Enters a new stage, pushing `name` onto the stack.
    pub fn enter(name: impl Into<String>) -> Self {
        STAGE_STACK.with(|stack| stack.borrow_mut().push(name.into()));
        Self { _private: () }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        STAGE_STACK.with(|stack| {
            let _: Option<String> = stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_active_stage_reports_init() {
        assert_eq!(current_stage(), "INIT");
    }

    #[test]
    fn nested_guards_join_with_arrows() {
        let _outer = StageGuard::enter("ITER_3");
        assert_eq!(current_stage(), "ITER_3");
        {
            let _inner = StageGuard::enter("J_3");
            assert_eq!(current_stage(), "ITER_3 > J_3");
        }
        assert_eq!(current_stage(), "ITER_3");
    }

    #[test]
    fn guard_pops_on_early_return() {
        fn scoped() -> Result<(), ()> {
            let _guard = StageGuard::enter("SQL_1");
            Err(())
        }
        let _ = scoped();
        assert_eq!(current_stage(), "INIT");
    }
}
