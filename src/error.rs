//! Error types for the access decision engine
//!
//! Every variant except [`AccessError::CacheUnavailable`] is fail-closed:
//! the engine maps it to a deny decision rather than letting it escape the
//! `decide` boundary.

use thiserror::Error;

/// Access decision engine errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    /// User snapshot lookup missed; callers must treat this as deny
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// Resource reference is structurally invalid
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// Role/group hierarchy contains a cycle or exceeds the depth bound
    #[error("Hierarchy corruption: {0}")]
    HierarchyCorruption(String),

    /// Upstream snapshot read failed or timed out
    #[error("Snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    /// Cache backing store failed; the engine degrades to recompute
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
}

/// Result type for access decision operations
pub type Result<T> = std::result::Result<T, AccessError>;
