//! try / throw / catch.
//!
//! A throw records its [`Exception`] in the active context and unwinds to
//! the nearest enclosing [`attempt`], which pops its context and offers the
//! exception to its catch clauses in order. An exception no clause takes is
//! re-thrown into the next enclosing scope when the [`Attempt`] finishes or
//! is dropped. A throw with no scope on the thread is fatal.
//!
//! Control transfer uses unwinding, so `panic = "abort"` builds cannot throw.

use std::panic::{self, AssertUnwindSafe, Location};

use cerr_membrane::{Severity, diagnostics, runtime_config};
use thiserror::Error;

use super::code::ExceptionCode;
use super::context;

/// A thrown exception, as seen by catch handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Exception {
    code: ExceptionCode,
    message: String,
    reason: String,
    location: &'static Location<'static>,
}

impl Exception {
    /// Build an exception thrown at `location`. The reason reads
    /// `Line <line>, in <file>: <message>` and is cut to the configured
    /// message capacity.
    pub fn new(
        code: ExceptionCode,
        message: impl std::fmt::Display,
        location: &'static Location<'static>,
    ) -> Self {
        let message = message.to_string();
        let mut reason = format!(
            "Line {}, in {}: {message}",
            location.line(),
            location.file()
        );
        truncate_at_boundary(&mut reason, runtime_config().message_capacity);
        Self {
            code,
            message,
            reason,
            location,
        }
    }

    #[must_use]
    pub fn code(&self) -> ExceptionCode {
        self.code
    }

    /// The message as thrown.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The message prefixed with its source location.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[must_use]
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    #[must_use]
    pub fn matches(&self, codes: &[ExceptionCode]) -> bool {
        codes.contains(&self.code)
    }
}

fn truncate_at_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// Unwind payload of a throw. The exception itself lives in the context.
struct ThrowSignal {
    depth: usize,
}

/// Throw `code` with `message` to the nearest enclosing try-scope on this
/// thread.
#[track_caller]
pub fn throw(code: ExceptionCode, message: impl std::fmt::Display) -> ! {
    rethrow(Exception::new(code, message, Location::caller()))
}

/// Throw only when `condition` holds.
#[track_caller]
pub fn throw_if(condition: bool, code: ExceptionCode, message: impl std::fmt::Display) {
    if condition {
        throw(code, message);
    }
}

/// Raise an existing exception in the nearest enclosing try-scope,
/// terminating the process when there is none.
pub fn rethrow(exception: Exception) -> ! {
    match context::record(exception) {
        Ok(depth) => {
            let diag = diagnostics();
            if diag.enabled(Severity::Debug) {
                diag.debug("throw", format!("unwinding to try-scope #{depth}"));
            }
            panic::resume_unwind(Box::new(ThrowSignal { depth }))
        }
        Err(exception) => diagnostics().fatal_at(
            exception.location(),
            "uncaught_exception",
            format!(
                "uncaught exception (code {}): {}",
                exception.code(),
                exception.message()
            ),
        ),
    }
}

/// Run `body` inside a fresh try-scope.
///
/// The scope's context is popped before this returns, whether `body`
/// finished, threw, or panicked. Panics that are not throws keep unwinding.
pub fn attempt<T, F>(body: F) -> Attempt<T>
where
    F: FnOnce() -> T,
{
    let scope = context::enter_try();
    let depth = scope.depth();
    let diag = diagnostics();
    let trace = diag.enabled(Severity::Debug);
    if trace {
        diag.debug("try_enter", format!("entered try-scope #{depth}"));
    }
    let result = panic::catch_unwind(AssertUnwindSafe(body));
    let thrown = context::exit_try(scope);
    if trace {
        diag.debug("try_exit", format!("left try-scope #{depth}"));
    }

    let payload = match result {
        // A throw swallowed by the body's own unwind handling leaves a stale
        // exception behind; the body still completed.
        Ok(value) => return Attempt::completed(value),
        Err(payload) => payload,
    };
    match payload.downcast::<ThrowSignal>() {
        Ok(signal) => match thrown {
            Some(exception) if signal.depth == depth => Attempt::thrown(exception),
            _ => diag.fatal(
                "assertion_failure",
                format!(
                    "exception context stack corrupted (signal for scope #{}, caught at #{depth})",
                    signal.depth
                ),
            ),
        },
        Err(foreign) => panic::resume_unwind(foreign),
    }
}

enum Outcome<T> {
    Completed(T),
    Thrown(Exception),
}

/// Result of an [`attempt`], awaiting catch clauses.
///
/// Dropping an `Attempt` that still holds an unhandled exception re-throws
/// it into the enclosing scope.
#[must_use = "an unhandled exception is re-thrown when the attempt is dropped"]
pub struct Attempt<T> {
    outcome: Option<Outcome<T>>,
}

impl<T> std::fmt::Debug for Attempt<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            Some(Outcome::Completed(_)) => f.write_str("Attempt::Completed"),
            Some(Outcome::Thrown(e)) => f.debug_tuple("Attempt::Thrown").field(e).finish(),
            None => f.write_str("Attempt::Finished"),
        }
    }
}

impl<T> Attempt<T> {
    fn completed(value: T) -> Self {
        Self {
            outcome: Some(Outcome::Completed(value)),
        }
    }

    fn thrown(exception: Exception) -> Self {
        Self {
            outcome: Some(Outcome::Thrown(exception)),
        }
    }

    /// The exception still waiting for a handler.
    #[must_use]
    pub fn pending(&self) -> Option<&Exception> {
        match &self.outcome {
            Some(Outcome::Thrown(e)) => Some(e),
            _ => None,
        }
    }

    fn handle<F>(mut self, accept: impl Fn(&Exception) -> bool, handler: F) -> Self
    where
        F: FnOnce(&Exception) -> T,
    {
        let outcome = match self.outcome.take() {
            Some(Outcome::Thrown(exception)) if accept(&exception) => {
                context::set_last_reason(exception.reason());
                let diag = diagnostics();
                if diag.enabled(Severity::Debug) {
                    diag.debug(
                        "catch",
                        format!("caught code {}: {}", exception.code(), exception.reason()),
                    );
                }
                Outcome::Completed(handler(&exception))
            }
            Some(outcome) => outcome,
            None => return self,
        };
        self.outcome = Some(outcome);
        self
    }

    /// Handle the exception if its code is one of `codes`. Clauses are tried
    /// in call order and only the first match runs.
    pub fn catch<F>(self, codes: &[ExceptionCode], handler: F) -> Self
    where
        F: FnOnce(&Exception) -> T,
    {
        self.handle(|e| e.matches(codes), handler)
    }

    /// Handle any exception not taken by an earlier clause.
    pub fn catch_all<F>(self, handler: F) -> Self
    where
        F: FnOnce(&Exception) -> T,
    {
        self.handle(|_| true, handler)
    }

    /// The body's or the handler's value. An unhandled exception is
    /// re-thrown into the enclosing scope.
    pub fn finish(mut self) -> T {
        match self.outcome.take() {
            Some(Outcome::Completed(value)) => value,
            Some(Outcome::Thrown(exception)) => {
                let diag = diagnostics();
                if diag.enabled(Severity::Debug) {
                    diag.debug(
                        "propagate",
                        format!("no clause for code {}", exception.code()),
                    );
                }
                rethrow(exception)
            }
            None => unreachable!("attempt outcome consumed twice"),
        }
    }

    /// Stop here: an unhandled exception becomes `Err` instead of being
    /// re-thrown.
    pub fn into_result(mut self) -> Result<T, Exception> {
        match self.outcome.take() {
            Some(Outcome::Completed(value)) => Ok(value),
            Some(Outcome::Thrown(exception)) => Err(exception),
            None => unreachable!("attempt outcome consumed twice"),
        }
    }
}

impl<T> Drop for Attempt<T> {
    fn drop(&mut self) {
        if let Some(Outcome::Thrown(exception)) = self.outcome.take() {
            if !std::thread::panicking() {
                rethrow(exception);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::active_depth;

    const OTHER: ExceptionCode = match ExceptionCode::new(2) {
        Some(code) => code,
        None => unreachable!(),
    };

    #[test]
    fn completed_body_skips_handlers() {
        let value = attempt(|| 7)
            .catch(&[ExceptionCode::ERROR], |_| panic!("no exception was thrown"))
            .catch_all(|_| panic!("no exception was thrown"))
            .finish();
        assert_eq!(value, 7);
        assert_eq!(active_depth(), 0);
    }

    #[test]
    fn matching_clause_handles_and_sets_reason() {
        let line = line!() + 1;
        let caught = attempt(|| throw(ExceptionCode::ERROR, "boom"))
            .catch(&[ExceptionCode::ERROR], |e| e.code())
            .finish();
        assert_eq!(caught, ExceptionCode::ERROR);
        let reason = context::last_reason();
        assert!(reason.contains("boom"), "{reason}");
        assert!(reason.starts_with(&format!("Line {line}, in ")), "{reason}");
        assert!(reason.contains(file!()), "{reason}");
    }

    #[test]
    fn first_matching_clause_wins() {
        let hit = attempt(|| -> &'static str { throw(OTHER, "second code") })
            .catch(&[ExceptionCode::ERROR], |_| "error")
            .catch(&[ExceptionCode::ERROR, OTHER], |_| "first match")
            .catch(&[OTHER], |_| "later match")
            .catch_all(|_| "catch all")
            .finish();
        assert_eq!(hit, "first match");
    }

    #[test]
    fn into_result_exposes_unhandled() {
        let err = attempt(|| throw(OTHER, "unhandled {}"))
            .catch(&[ExceptionCode::ERROR], |_| ())
            .into_result()
            .unwrap_err();
        assert_eq!(err.code(), OTHER);
        assert_eq!(err.message(), "unhandled {}");
        assert_eq!(err.to_string(), err.reason());
        assert_eq!(err.location().file(), file!());
    }

    #[test]
    fn throw_if_only_throws_when_true() {
        let result = attempt::<(), _>(|| {
            throw_if(false, ExceptionCode::ERROR, "not thrown");
            throw_if(true, OTHER, "thrown");
            unreachable!()
        })
        .into_result();
        assert_eq!(result.unwrap_err().message(), "thrown");
    }

    #[test]
    fn reason_is_truncated_to_capacity() {
        let long = "x".repeat(5000);
        let err = attempt::<(), _>(|| throw(ExceptionCode::ERROR, &long))
            .into_result()
            .unwrap_err();
        assert_eq!(err.reason().len(), runtime_config().message_capacity);
        assert_eq!(err.message().len(), 5000);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = String::from("aé");
        truncate_at_boundary(&mut s, 2);
        assert_eq!(s, "a");
        let mut s = String::from("short");
        truncate_at_boundary(&mut s, 64);
        assert_eq!(s, "short");
    }

    #[test]
    fn foreign_panics_pass_through() {
        let result = panic::catch_unwind(|| {
            let _ = attempt::<(), _>(|| panic!("not an exception"));
        });
        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"not an exception"));
        assert_eq!(active_depth(), 0);
    }
}
