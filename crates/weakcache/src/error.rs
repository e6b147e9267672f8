//! Error types for weakcache

use std::fmt;

use thiserror::Error;

/// Result type alias for weakcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The value handed to `set` has no live heap object to watch
    #[error("Invalid value type: expected a live shared reference, got {0}")]
    InvalidValueType(Rejected),
}

/// What a rejected value turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// No value at all (`None`)
    Absent,

    /// A weak reference whose target is already gone, or was never allocated
    Dangling,
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejected::Absent => write!(f, "an absent value"),
            Rejected::Dangling => write!(f, "a dangling weak reference"),
        }
    }
}
