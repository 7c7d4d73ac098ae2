//! Error types for the key-value store client.

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a key-value store implementation.
///
/// Transport failures are propagated unchanged to callers; no retry is
/// performed at this layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A command addressed a key holding the other kind of value
    /// (e.g. a set command against a hash key).
    #[error("wrong value kind for key '{key}'")]
    WrongType { key: String },

    /// The store connection failed.
    #[error("store connection failed: {0}")]
    Connection(String),
}
