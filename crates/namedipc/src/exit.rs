use std::fmt;
use std::io;

use namedipc_channel::ChannelError;
use namedipc_resource::ResourceError;
use namedipc_sync::SyncError;

// Normal exit, help, reset and interruption all report success.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

// io::Error's Display already carries "(os error N)".
pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(FAILURE, format!("{context}: {err}"))
}

pub fn resource_error(context: &str, err: ResourceError) -> CliError {
    CliError::new(FAILURE, format!("{context}: {err}"))
}

pub fn sync_error(context: &str, err: SyncError) -> CliError {
    match err {
        SyncError::Resource(err) => resource_error(context, err),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Resource(err) => resource_error(context, err),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}
