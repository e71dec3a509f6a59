//! Open-or-create handles for POSIX named IPC objects.
//!
//! Every object in the POSIX IPC namespace is addressed by a `/name` that
//! outlives the processes using it. This crate wraps the three kinds the rest
//! of namedipc builds on:
//! - message queues (Linux)
//! - named semaphores
//! - shared memory segments
//!
//! [`ResourceHandle::open_or_create`] is the single entry point: it tries an
//! open-only call first, creates exclusively on failure, and records whether
//! this process was the creator.

pub mod error;
pub mod handle;
pub mod name;

#[cfg(unix)]
pub mod deadline;
#[cfg(target_os = "linux")]
pub mod mqueue;
#[cfg(unix)]
pub mod semaphore;
#[cfg(unix)]
pub mod shm;

pub use error::{ResourceError, Result};
pub use name::ResourceName;

#[cfg(unix)]
pub use deadline::Deadline;
pub use handle::{unlink_resource, NamedResource, ResourceHandle, ResourceKind};
#[cfg(target_os = "linux")]
pub use mqueue::{MessageQueue, QueueAttrs, QueueStatus};
#[cfg(unix)]
pub use semaphore::{NamedSemaphore, SemaphoreAttrs};
#[cfg(unix)]
pub use shm::{SegmentAttrs, SharedLayout, SharedSegment};
