use std::io;
use std::ptr;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{ResourceError, Result};
use crate::handle::{NamedResource, ResourceKind};
use crate::name::ResourceName;

/// How long an opener waits for the creator to size a fresh segment.
const SIZE_WAIT: Duration = Duration::from_secs(1);

/// Creation attributes for a shared memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentAttrs {
    /// Bytes mapped by every process.
    pub size: usize,
    /// Permission bits of the created object.
    pub mode: libc::mode_t,
}

impl SegmentAttrs {
    pub fn with_size(size: usize) -> Self {
        Self { size, mode: 0o660 }
    }

    /// Attributes sized for the layout `T`.
    pub fn for_layout<T: SharedLayout>() -> Self {
        Self::with_size(std::mem::size_of::<T>())
    }
}

/// Types that may be viewed in place inside a shared segment.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, valid for the all-zero bit pattern
/// (a freshly truncated segment is zero-filled), and only mutated through
/// interior atomics, since every attached process aliases the same bytes.
pub unsafe trait SharedLayout: Sync {}

/// A POSIX shared memory object mapped into this process (`shm_open` + `mmap`).
pub struct SharedSegment {
    mem: *mut u8,
    len: usize,
    name: String,
}

// SAFETY: the mapping is process-shared by construction; access to its
// contents goes through `SharedLayout` types, which are `Sync`.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl NamedResource for SharedSegment {
    type Attrs = SegmentAttrs;
    const KIND: ResourceKind = ResourceKind::SharedMemory;

    fn open(name: &ResourceName, attrs: &SegmentAttrs) -> io::Result<Self> {
        // SAFETY: valid NUL-terminated name; mode is ignored without O_CREAT.
        let fd = unsafe { libc::shm_open(name.as_c_str().as_ptr(), libc::O_RDWR, 0) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // The creator truncates right after its exclusive open; never map past
        // the end of a segment that has not been sized yet.
        let start = Instant::now();
        loop {
            let size = match file_size(fd) {
                Ok(size) => size,
                Err(err) => {
                    close(fd);
                    return Err(err);
                }
            };
            if size >= attrs.size {
                break;
            }
            if start.elapsed() >= SIZE_WAIT {
                close(fd);
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("segment holds {size} bytes, expected {}", attrs.size),
                ));
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        map(fd, attrs.size, name)
    }

    fn create(name: &ResourceName, attrs: &SegmentAttrs) -> io::Result<Self> {
        if attrs.size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        // SAFETY: valid NUL-terminated name; the mode only applies with O_CREAT.
        let fd = unsafe {
            libc::shm_open(
                name.as_c_str().as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                attrs.mode as libc::c_uint,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // The process umask may have narrowed the requested mode.
        // SAFETY: `fd` is open.
        unsafe { libc::fchmod(fd, attrs.mode) };

        // SAFETY: `fd` is open and refers to a shared memory object.
        if unsafe { libc::ftruncate(fd, attrs.size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            close(fd);
            let _ = unlink(name);
            return Err(err);
        }

        map(fd, attrs.size, name)
    }

    fn unlink(name: &ResourceName) -> io::Result<()> {
        unlink(name)
    }
}

fn file_size(fd: libc::c_int) -> io::Result<usize> {
    // SAFETY: stat is plain old data.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is open and `st` is a valid out-pointer.
    if unsafe { libc::fstat(fd, &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(st.st_size as usize)
}

fn close(fd: libc::c_int) {
    // SAFETY: closing a descriptor this module opened.
    unsafe { libc::close(fd) };
}

fn map(fd: libc::c_int, len: usize, name: &ResourceName) -> io::Result<SharedSegment> {
    // SAFETY: `fd` is open read/write and at least `len` bytes long.
    let mem = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    // The mapping keeps the object alive; the descriptor is no longer needed.
    close(fd);

    if mem == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    Ok(SharedSegment {
        mem: mem.cast::<u8>(),
        len,
        name: name.as_str().to_string(),
    })
}

impl SharedSegment {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes (zero once unmapped).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_mapped(&self) -> bool {
        !self.mem.is_null()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    /// Borrow the mapping as `T`.
    pub fn view<T: SharedLayout>(&self) -> Result<&T> {
        if !self.is_mapped() {
            return Err(ResourceError::io(
                "view",
                &self.name,
                io::Error::new(io::ErrorKind::NotConnected, "segment is not mapped"),
            ));
        }
        let required = std::mem::size_of::<T>();
        if required > self.len {
            return Err(ResourceError::SegmentTooSmall {
                name: self.name.clone(),
                required,
                actual: self.len,
            });
        }
        debug_assert_eq!(self.mem as usize % std::mem::align_of::<T>(), 0);
        // SAFETY: the mapping is page aligned, at least size_of::<T>() bytes
        // and lives as long as `&self`; `SharedLayout` guarantees any bit
        // pattern is valid and mutation only happens through atomics.
        Ok(unsafe { &*self.mem.cast::<T>() })
    }

    /// Release this process's mapping. The segment itself is untouched.
    ///
    /// Calling this on an already unmapped segment does nothing.
    pub fn unmap(&mut self) -> Result<()> {
        if self.mem.is_null() {
            return Ok(());
        }
        // SAFETY: `mem`/`len` describe a mapping created by `map`; the
        // `&mut self` receiver guarantees no outstanding views.
        let rc = unsafe { libc::munmap(self.mem.cast::<libc::c_void>(), self.len) };
        self.mem = ptr::null_mut();
        self.len = 0;
        if rc != 0 {
            return Err(ResourceError::io(
                "munmap",
                &self.name,
                io::Error::last_os_error(),
            ));
        }
        debug!(name = %self.name, "shared memory mapping released");
        Ok(())
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        let _ = self.unmap();
    }
}

impl std::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

fn unlink(name: &ResourceName) -> io::Result<()> {
    // SAFETY: valid NUL-terminated name.
    if unsafe { libc::shm_unlink(name.as_c_str().as_ptr()) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
