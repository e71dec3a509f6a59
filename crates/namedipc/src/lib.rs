//! Processes that create, share and retire POSIX named IPC objects cooperatively.
//!
//! Any number of independent processes may open the same named object. The
//! first one creates it, every later one attaches, and whichever process
//! leaves last deletes it.
//!
//! # Crate Structure
//!
//! - [`resource`]: open-or-create handles for message queues, semaphores and shared memory
//! - [`sync`]: reference counting, lifecycle guards and cross-process critical sections
//! - [`channel`]: fixed-size producer/consumer exchange with bounded-then-blocking waits

/// Re-export resource types.
pub mod resource {
    pub use namedipc_resource::*;
}

/// Re-export synchronisation types.
pub mod sync {
    pub use namedipc_sync::*;
}

/// Re-export channel types.
pub mod channel {
    pub use namedipc_channel::*;
}
