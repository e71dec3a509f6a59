use std::io;

use crate::deadline::Deadline;
use crate::handle::{NamedResource, ResourceKind};
use crate::name::ResourceName;

/// Creation attributes for a named semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreAttrs {
    /// Value the semaphore starts with when this process creates it.
    pub initial_value: u32,
    /// Permission bits of the created object.
    pub mode: libc::mode_t,
}

impl SemaphoreAttrs {
    /// A counting semaphore starting at `initial_value`.
    pub fn counting(initial_value: u32) -> Self {
        Self {
            initial_value,
            ..Self::default()
        }
    }

    /// A binary semaphore used as a mutex (starts unlocked).
    pub fn binary() -> Self {
        Self::counting(1)
    }
}

impl Default for SemaphoreAttrs {
    fn default() -> Self {
        Self {
            initial_value: 0,
            mode: 0o660,
        }
    }
}

/// A POSIX named semaphore (`sem_open`).
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// SAFETY: sem_t handles returned by sem_open are process-wide and the
// sem_* functions are thread-safe.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedResource for NamedSemaphore {
    type Attrs = SemaphoreAttrs;
    const KIND: ResourceKind = ResourceKind::Semaphore;

    fn open(name: &ResourceName, _attrs: &SemaphoreAttrs) -> io::Result<Self> {
        // SAFETY: the name is a valid NUL-terminated string; no variadic
        // arguments are read without O_CREAT.
        let sem = unsafe { libc::sem_open(name.as_c_str().as_ptr(), libc::O_RDWR) };
        Self::from_raw(sem, name)
    }

    fn create(name: &ResourceName, attrs: &SemaphoreAttrs) -> io::Result<Self> {
        // SAFETY: with O_CREAT sem_open reads exactly a mode and an unsigned
        // initial value, both passed as c_uint per the varargs promotion rules.
        let sem = unsafe {
            libc::sem_open(
                name.as_c_str().as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                attrs.mode as libc::c_uint,
                attrs.initial_value as libc::c_uint,
            )
        };
        Self::from_raw(sem, name)
    }

    fn unlink(name: &ResourceName) -> io::Result<()> {
        unlink(name)
    }
}

impl NamedSemaphore {
    fn from_raw(sem: *mut libc::sem_t, name: &ResourceName) -> io::Result<Self> {
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem,
            name: name.as_str().to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Increment the semaphore, waking one waiter.
    pub fn post(&self) -> io::Result<()> {
        // SAFETY: `self.sem` came from a successful sem_open and is still open.
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Decrement without blocking. `Ok(false)` means the value was zero.
    pub fn try_wait(&self) -> io::Result<bool> {
        loop {
            // SAFETY: see `post`.
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Decrement, blocking until the value is positive.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            // SAFETY: see `post`.
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    /// Decrement, blocking at most until `deadline`. `Ok(false)` on timeout.
    #[cfg(not(target_os = "macos"))]
    pub fn wait_until(&self, deadline: &Deadline) -> io::Result<bool> {
        loop {
            // SAFETY: see `post`; the timespec outlives the call.
            if unsafe { libc::sem_timedwait(self.sem, deadline.as_timespec()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Decrement, blocking at most until `deadline`. `Ok(false)` on timeout.
    ///
    /// macOS has no `sem_timedwait`; poll with `sem_trywait` instead.
    #[cfg(target_os = "macos")]
    pub fn wait_until(&self, deadline: &Deadline) -> io::Result<bool> {
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            if deadline.has_passed() {
                return Ok(false);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    /// Current value as reported by `sem_getvalue`.
    pub fn value(&self) -> io::Result<i32> {
        let mut value: libc::c_int = 0;
        // SAFETY: see `post`; `value` is a valid out-pointer.
        if unsafe { libc::sem_getvalue(self.sem, &mut value) } == 0 {
            Ok(value)
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: closed exactly once; the name stays until unlinked.
        unsafe { libc::sem_close(self.sem) };
    }
}

impl std::fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedSemaphore")
            .field("name", &self.name)
            .finish()
    }
}

fn unlink(name: &ResourceName) -> io::Result<()> {
    // SAFETY: valid NUL-terminated name.
    if unsafe { libc::sem_unlink(name.as_c_str().as_ptr()) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
