//! Cross-process coordination built on named POSIX objects.
//!
//! - [`RefCounter`] counts the processes attached to a shared resource,
//!   either in a counting semaphore or inside the shared segment itself.
//! - [`LifecycleGuard`] gives the hold back exactly once and lets the last
//!   process delete the names.
//! - [`NamedLock`] serialises attach and detach so a name is never deleted
//!   between a newcomer's open and its increment.
//! - [`MutualExclusionSection`] guards a critical section shared by every
//!   process using the same semaphore name.
//!
//! Long waits observe a [`CancelToken`] so a signal turns into an orderly
//! unwind instead of an exit from inside the handler.

pub mod cancel;
pub mod error;

#[cfg(unix)]
pub mod lifecycle;
#[cfg(unix)]
pub mod lock;
#[cfg(unix)]
pub mod refcount;
#[cfg(unix)]
pub mod section;

pub use cancel::CancelToken;
pub use error::{Result, SyncError};

#[cfg(unix)]
pub use lifecycle::{LifecycleGuard, OwnedName, TeardownOutcome};
#[cfg(unix)]
pub use lock::{LockHold, NamedLock};
#[cfg(unix)]
pub use refcount::{
    CountedLayout, RefCounter, SegmentHeader, SegmentRefCounter, SemaphoreRefCounter, READY_MAGIC,
};
#[cfg(unix)]
pub use section::{Entry, MutualExclusionSection, SectionConfig, SectionGuard, SectionState};
