use std::ffi::CString;
use std::fmt;

use crate::error::{ResourceError, Result};

/// A validated POSIX IPC object name (`/name`).
///
/// Names are normalised to carry exactly one leading slash. Linux stores named
/// semaphores as `sem.<name>` under `/dev/shm`, so the usable length is
/// `NAME_MAX - 4` for every kind; the same bound is applied everywhere so one
/// name can be reused across kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceName {
    posix: String,
    c_name: CString,
}

impl ResourceName {
    /// Maximum length of the part after the leading slash.
    pub const MAX_LEN: usize = 251;

    /// Validate `name`, prefixing a slash when it is missing.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let raw = name.as_ref();
        let invalid = |reason| ResourceError::InvalidName {
            name: raw.to_string(),
            reason,
        };

        let body = raw.strip_prefix('/').unwrap_or(raw);
        if body.is_empty() {
            return Err(invalid("name is empty"));
        }
        if body.len() > Self::MAX_LEN {
            return Err(invalid("name is too long"));
        }
        if body.contains('/') {
            return Err(invalid("only a single leading '/' is allowed"));
        }
        if body == "." || body == ".." {
            return Err(invalid("'.' and '..' are reserved"));
        }

        let posix = format!("/{body}");
        let c_name = CString::new(posix.as_bytes()).map_err(|_| invalid("name contains NUL"))?;
        Ok(Self { posix, c_name })
    }

    /// Derive a companion name, e.g. `/queue` → `/queue.refs`.
    pub fn with_suffix(&self, suffix: &str) -> Result<Self> {
        Self::new(format!("{}.{suffix}", self.posix))
    }

    pub fn as_str(&self) -> &str {
        &self.posix
    }

    pub(crate) fn as_c_str(&self) -> &std::ffi::CStr {
        &self.c_name
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.posix)
    }
}

impl std::str::FromStr for ResourceName {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
