//! # cerr-core
//!
//! Structured exceptions: try-scopes pushed on a per-thread context stack,
//! `throw` transferring control to the nearest enclosing scope, and catch
//! clauses selecting on exception codes.
//!
//! Allocation tracking lives in `cerr-membrane` and is re-exported here as
//! [`membrane`].

#![deny(unsafe_code)]

pub mod exception;

pub use cerr_membrane as membrane;
pub use exception::{
    Attempt, Exception, ExceptionCode, active_depth, attempt, last_reason, rethrow, throw,
    throw_if,
};
