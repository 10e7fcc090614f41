//! Error Module - zreloc Error Types
//!
//! Defines the recoverable error types of the relocation core.
//!
//! The hot paths (barrier, forwarding lookup) never return errors: "not yet
//! forwarded" is `None` and a lost insert race resolves to the winning entry.
//! Errors only surface from driver-level operations.
//!
//! # Error Categories
//!
//! ## Memory Errors
//! - `OutOfMemory` - No granules left for a page
//! - `InvalidAddress` - Offset outside the heap or not a heap reference
//!
//! ## Relocation Errors
//! - `ForwardingTableError` - Granule already claimed by another record
//! - `RelocationFailed` - Object could not be moved
//!
//! ## State / Argument Errors
//! - `Configuration` - Invalid configuration
//! - `InvalidState` - Operation not allowed in the current phase
//! - `InvalidArgument` - Invalid function argument

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all zreloc operations
///
/// # Examples
///
/// ```rust
/// use zreloc::RelocError;
///
/// fn describe(err: &RelocError) -> &'static str {
///     match err {
///         RelocError::OutOfMemory { .. } => "heap exhausted",
///         RelocError::InvalidState { .. } => "wrong phase",
///         _ => "other",
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum RelocError {
    /// Out of memory - no free granules for a new page
    ///
    /// **When returned:** Page or target allocation cannot be satisfied
    ///
    /// **Recovery strategy:** Retire finished records to free their source pages
    #[error("Out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    /// Invalid heap offset or reference
    ///
    /// **When returned:** Offset lies outside the arena or outside the page it
    /// was attributed to
    #[error("Invalid address: {address:#x}")]
    InvalidAddress { address: u64 },

    /// Forwarding table error
    ///
    /// **When returned:** Installing a record whose granules are already owned
    /// by another active record
    #[error("Forwarding table error: {0}")]
    ForwardingTableError(String),

    /// Relocation failed
    ///
    /// **When returned:** An object on a released page has no forwarding
    /// entry, or retirement found a page whose live objects were not all
    /// forwarded
    #[error("Relocation failed: {0}")]
    RelocationFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Invalid state
    ///
    /// **When returned:** Driver operation issued in the wrong phase, e.g.
    /// retiring records while the Relocate phase is still active
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Invalid argument
    ///
    /// **Example scenarios:**
    /// - Capacity not a power of two
    /// - Large page handed to the relocation driver
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation timeout
    ///
    /// **When returned:** A page was still retained after the retire spin limit
    #[error("Operation timeout: {0}")]
    Timeout(String),
}

impl RelocError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RelocError::OutOfMemory { .. } | RelocError::Timeout(_))
    }

    /// Check if this error indicates a bug in the caller or in zreloc
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            RelocError::InvalidState { .. } | RelocError::RelocationFailed(_)
        )
    }
}

/// Result type alias for zreloc operations
pub type Result<T> = std::result::Result<T, RelocError>;

/// Assertion with context for fatal invariant violations
///
/// Used where continuing would mean dereferencing corrupted addresses.
#[macro_export]
macro_rules! assert_context {
    ($cond:expr, $context:expr) => {
        if !$cond {
            panic!("Assertion failed at {}: {}", stringify!($cond), $context);
        }
    };
    ($cond:expr, $context:expr, $($arg:tt)*) => {
        if !$cond {
            panic!("Assertion failed at {}: {}", stringify!($cond), format!($context, $($arg)*));
        }
    };
}
