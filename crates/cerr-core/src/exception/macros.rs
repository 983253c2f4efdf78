//! Block syntax over [`attempt`](super::attempt) and [`throw`](super::throw).

/// Throw an exception code with an optional formatted message.
///
/// ```
/// use cerr_core::{ExceptionCode, attempt, throw};
///
/// let err = attempt::<(), _>(|| throw!(ExceptionCode::ERROR, "bad input: {}", 42))
///     .into_result()
///     .unwrap_err();
/// assert_eq!(err.message(), "bad input: 42");
/// ```
#[macro_export]
macro_rules! throw {
    ($code:expr $(,)?) => {
        $crate::exception::throw($code, "")
    };
    ($code:expr, $($arg:tt)+) => {
        $crate::exception::throw($code, ::std::format_args!($($arg)+))
    };
}

/// Throw when the condition holds. The message is only formatted on throw.
#[macro_export]
macro_rules! throw_if {
    ($cond:expr, $code:expr $(, $($arg:tt)+)?) => {
        if $cond {
            $crate::throw!($code $(, $($arg)+)?);
        }
    };
}

/// try / catch block.
///
/// ```
/// use cerr_core::{ExceptionCode, try_catch};
///
/// let divisor = 0;
/// let quotient = try_catch!({
///     cerr_core::throw_if!(divisor == 0, ExceptionCode::ERROR, "Division by zero");
///     10 / divisor
/// } catch (ExceptionCode::ERROR) |_e| {
///     -1
/// });
/// assert_eq!(quotient, -1);
/// ```
///
/// The body and handlers are closures: `return` leaves the block, not the
/// enclosing function. Unmatched exceptions propagate to the enclosing
/// scope.
#[macro_export]
macro_rules! try_catch {
    (
        { $($body:tt)* }
        $(catch ($($code:expr),+ $(,)?) |$e:pat_param| $handler:block)*
        $(catch_all |$all:pat_param| $fallback:block)?
    ) => {
        $crate::exception::attempt(|| { $($body)* })
            $(.catch(&[$($code),+], |$e: &$crate::exception::Exception| $handler))*
            $(.catch_all(|$all: &$crate::exception::Exception| $fallback))?
            .finish()
    };
}
