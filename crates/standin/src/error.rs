//! User-visible error types.
//!
//! There are exactly two: [`ValidationError`] for malformed mock
//! declarations (raised synchronously at registration, never swallowed)
//! and [`PendingMockError`] for mocks still pending at assertion or reset
//! time. Transport faults and user-callable faults are logged on the
//! diagnostics channels instead of being raised.

use thiserror::Error;

/// A mock declaration failed validation.
///
/// The message aggregates every issue at once, one per line, each prefixed
/// with the dot-joined path of the offending attribute.
#[derive(Debug, Clone, Error)]
#[error("invalid mock options:\n{}", .issues.join("\n"))]
pub struct ValidationError {
    issues: Vec<String>,
}

impl ValidationError {
    pub(crate) fn new(issues: Vec<String>) -> Self {
        debug_assert!(!issues.is_empty());
        Self { issues }
    }

    /// The individual path-prefixed issues.
    pub fn issues(&self) -> &[String] {
        &self.issues
    }
}

/// One or more mocks never matched any traffic.
///
/// The message enumerates each unmatched mock using its printable form
/// (`HTTP{...}` / `TCP{...}`), verbatim.
#[derive(Debug, Clone, Error)]
#[error("{} mock(s) still pending:\n{}", .pending.len(), .pending.join("\n"))]
pub struct PendingMockError {
    pending: Vec<String>,
}

impl PendingMockError {
    pub(crate) fn new(pending: Vec<String>) -> Self {
        debug_assert!(!pending.is_empty());
        Self { pending }
    }

    /// Printable forms of the pending mocks, in registration order.
    pub fn pending(&self) -> &[String] {
        &self.pending
    }
}
