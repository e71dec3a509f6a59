use namedipc_resource::ResourceError;

/// Errors that can occur while exchanging messages.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Opening or creating the backing queue failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// A message did not have the fixed size both sides agreed on.
    #[error("protocol violation: expected {expected}-byte message, got {actual} bytes")]
    Protocol { expected: usize, actual: usize },

    /// A queue operation failed for a reason other than a timeout.
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        source: std::io::Error,
    },

    /// A blocking wait was abandoned because the process is shutting down.
    #[error("channel operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
