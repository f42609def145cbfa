//! Process-wide error type aliases.
//!
//! Bootstrap-time errors (socket bind, config load, CLI parsing) get backtraces and terminate
//! the process; everything past startup is either handled in place or counted on the ambient
//! metrics rather than propagated.

/// Error that can occur during startup (socket bind, config load, CLI parsing).
///
/// An alias for [`anyhow::Error`] so call sites get free `?`-conversion and backtraces.
pub type BootstrapError = anyhow::Error;

/// Result alias for [`BootstrapError`].
pub type BootstrapResult<T> = anyhow::Result<T>;
