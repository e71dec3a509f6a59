use crate::handle::ResourceKind;

/// Errors that can occur while opening, using or deleting a named resource.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// The name is not a valid POSIX IPC object name.
    #[error("invalid resource name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Neither the open-only call nor the create call succeeded.
    #[error("{kind} {name} unavailable: {source}")]
    Unavailable {
        kind: ResourceKind,
        name: String,
        source: std::io::Error,
    },

    /// A primitive operation on an open resource failed.
    #[error("{op} on {name} failed: {source}")]
    Io {
        op: &'static str,
        name: String,
        source: std::io::Error,
    },

    /// A message did not have the size the queue was created with.
    #[error("message size mismatch on {name}: expected {expected} bytes, got {actual}")]
    MessageSize {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A shared segment is too small for the layout placed on it.
    #[error("segment {name} holds {actual} bytes, layout needs {required}")]
    SegmentTooSmall {
        name: String,
        required: usize,
        actual: usize,
    },

    /// Deleting the name from the kernel namespace failed.
    #[error("failed to delete {kind} {name}: {source}")]
    Unlink {
        kind: ResourceKind,
        name: String,
        source: std::io::Error,
    },
}

impl ResourceError {
    pub(crate) fn io(op: &'static str, name: &str, source: std::io::Error) -> Self {
        Self::Io {
            op,
            name: name.to_string(),
            source,
        }
    }

    /// The underlying OS error, if this error wraps one.
    pub fn os_error(&self) -> Option<&std::io::Error> {
        match self {
            Self::Unavailable { source, .. }
            | Self::Io { source, .. }
            | Self::Unlink { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;
