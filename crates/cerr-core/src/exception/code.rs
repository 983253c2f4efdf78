//! Exception codes.

use std::fmt;
use std::num::NonZeroI32;

/// Code carried by a thrown exception. Zero is reserved for "nothing
/// thrown", so it is not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExceptionCode(NonZeroI32);

impl ExceptionCode {
    /// Generic application error.
    pub const ERROR: Self = match Self::new(1) {
        Some(code) => code,
        None => unreachable!(),
    };

    /// Returns `None` for zero.
    #[must_use]
    pub const fn new(code: i32) -> Option<Self> {
        match NonZeroI32::new(code) {
            Some(code) => Some(Self(code)),
            None => None,
        }
    }

    #[must_use]
    pub const fn get(self) -> i32 {
        self.0.get()
    }
}

impl From<NonZeroI32> for ExceptionCode {
    fn from(code: NonZeroI32) -> Self {
        Self(code)
    }
}

impl TryFrom<i32> for ExceptionCode {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, i32> {
        Self::new(code).ok_or(code)
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
