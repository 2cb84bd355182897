use thiserror::Error;

/// Errors surfaced at the document boundary.
///
/// Missing dependencies while applying a remote update are *not* errors;
/// affected blocks are parked and retried on later updates.
#[derive(Debug, Error)]
pub enum Error {
    /// A local edit addressed a range the document doesn't cover.
    #[error("range at position {pos} of length {len} exceeds document length {doc_len}")]
    OutOfRange { pos: u64, len: u64, doc_len: u64 },

    /// The update bytes failed to parse. The document is unchanged.
    #[error("invalid update message: {0}")]
    InvalidUpdate(#[from] serde_json::Error),

    /// An internal invariant was violated during integration or splitting.
    /// Treat as data corruption; the current operation was aborted but blocks
    /// integrated earlier in the same call remain integrated.
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
