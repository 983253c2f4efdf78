//! Structured exceptions.
//!
//! ```
//! use cerr_core::{ExceptionCode, attempt, last_reason, throw};
//!
//! let code = attempt(|| -> i32 { throw(ExceptionCode::ERROR, "boom") })
//!     .catch(&[ExceptionCode::ERROR], |e| e.code().get())
//!     .finish();
//! assert_eq!(code, 1);
//! assert!(last_reason().contains("boom"));
//! ```
//!
//! Try-scopes only open through [`attempt`], which owns the point a throw
//! resumes at. There is no free-standing scope handle:
//!
//! ```compile_fail
//! let scope = cerr_core::exception::enter_try();
//! ```

mod code;
mod context;
mod engine;
mod macros;

pub use code::ExceptionCode;
pub use context::{active_depth, last_reason};
pub use engine::{Attempt, Exception, attempt, rethrow, throw, throw_if};
