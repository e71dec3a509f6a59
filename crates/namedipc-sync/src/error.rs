use namedipc_resource::ResourceError;

/// Errors that can occur while counting holders or guarding a critical section.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The underlying named resource failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// A semaphore or segment operation failed.
    #[error("{op} on {name} failed: {source}")]
    Io {
        op: &'static str,
        name: String,
        source: std::io::Error,
    },

    /// A decrement was attempted while the shared count was already zero.
    #[error("reference count of {0} is already zero")]
    Underflow(String),

    /// The creator never finished initialising the shared segment.
    #[error("segment {0} was not initialised by its creator in time")]
    Uninitialized(String),

    /// The wait was abandoned because the process is shutting down.
    #[error("wait on {0} cancelled")]
    Cancelled(String),
}

impl SyncError {
    pub(crate) fn io(op: &'static str, name: &str, source: std::io::Error) -> Self {
        Self::Io {
            op,
            name: name.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
