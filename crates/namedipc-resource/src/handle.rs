use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};

use tracing::{debug, info, warn};

use crate::error::{ResourceError, Result};
use crate::name::ResourceName;

/// The kernel object family backing a named resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    MessageQueue,
    Semaphore,
    SharedMemory,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::MessageQueue => "message queue",
            ResourceKind::Semaphore => "semaphore",
            ResourceKind::SharedMemory => "shared memory",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kernel object that lives in the POSIX IPC namespace.
///
/// Implementors provide the two raw calls `ResourceHandle::open_or_create`
/// is composed of. `open` must fail with [`io::ErrorKind::NotFound`] when the
/// name is absent and `create` must be exclusive, failing with
/// [`io::ErrorKind::AlreadyExists`] when another process got there first.
pub trait NamedResource: Sized {
    /// Creation attributes (queue geometry, initial value, segment size).
    type Attrs;

    const KIND: ResourceKind;

    fn open(name: &ResourceName, attrs: &Self::Attrs) -> io::Result<Self>;

    fn create(name: &ResourceName, attrs: &Self::Attrs) -> io::Result<Self>;

    /// Remove `name` from the namespace; `NotFound` when already gone.
    fn unlink(name: &ResourceName) -> io::Result<()>;
}

/// An open named resource plus the knowledge of who created it.
///
/// Exactly one process observes `created() == true` for a given incarnation
/// of a name; that process owns attribute initialisation.
pub struct ResourceHandle<R> {
    inner: R,
    name: ResourceName,
    kind: ResourceKind,
    created: bool,
}

impl<R: NamedResource> ResourceHandle<R> {
    /// Open `name` if it exists, otherwise create it with `attrs`.
    pub fn open_or_create(name: &ResourceName, attrs: &R::Attrs) -> Result<Self> {
        match R::open(name, attrs) {
            Ok(inner) => {
                debug!(%name, kind = %R::KIND, "attached to existing resource");
                return Ok(Self::from_parts(inner, name, false));
            }
            Err(err) => {
                debug!(%name, kind = %R::KIND, error = %err, "open failed, creating");
            }
        }

        match R::create(name, attrs) {
            Ok(inner) => {
                info!(%name, kind = %R::KIND, "resource created by this process");
                Ok(Self::from_parts(inner, name, true))
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!(%name, kind = %R::KIND, "lost creation race, opening");
                let inner = R::open(name, attrs).map_err(|source| ResourceError::Unavailable {
                    kind: R::KIND,
                    name: name.to_string(),
                    source,
                })?;
                Ok(Self::from_parts(inner, name, false))
            }
            Err(source) => Err(ResourceError::Unavailable {
                kind: R::KIND,
                name: name.to_string(),
                source,
            }),
        }
    }

    /// Open `name` only if it already exists.
    pub fn open_existing(name: &ResourceName, attrs: &R::Attrs) -> Result<Self> {
        let inner = R::open(name, attrs).map_err(|source| ResourceError::Unavailable {
            kind: R::KIND,
            name: name.to_string(),
            source,
        })?;
        Ok(Self::from_parts(inner, name, false))
    }

    fn from_parts(inner: R, name: &ResourceName, created: bool) -> Self {
        Self {
            inner,
            name: name.clone(),
            kind: R::KIND,
            created,
        }
    }
}

impl<R> ResourceHandle<R> {
    /// Whether this process created the kernel object.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R> Deref for ResourceHandle<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.inner
    }
}

impl<R> DerefMut for ResourceHandle<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R> fmt::Debug for ResourceHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("name", &self.name.as_str())
            .field("kind", &self.kind)
            .field("created", &self.created)
            .finish()
    }
}

/// Remove `name` from the kernel namespace.
///
/// Returns `Ok(false)` when the name was already gone, so concurrent or
/// repeated deletes are harmless. Processes that still hold the object open
/// keep using it; only the name disappears.
pub fn unlink_resource(kind: ResourceKind, name: &ResourceName) -> Result<bool> {
    let result = match kind {
        #[cfg(target_os = "linux")]
        ResourceKind::MessageQueue => crate::mqueue::MessageQueue::unlink(name),
        #[cfg(not(target_os = "linux"))]
        ResourceKind::MessageQueue => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "POSIX message queues are only supported on Linux",
        )),
        #[cfg(unix)]
        ResourceKind::Semaphore => crate::semaphore::NamedSemaphore::unlink(name),
        #[cfg(unix)]
        ResourceKind::SharedMemory => crate::shm::SharedSegment::unlink(name),
        #[cfg(not(unix))]
        ResourceKind::Semaphore | ResourceKind::SharedMemory => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "POSIX named IPC requires a Unix host",
        )),
    };

    match result {
        Ok(()) => {
            info!(%name, %kind, "resource deleted");
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(%name, %kind, "resource already deleted");
            Ok(false)
        }
        Err(source) => Err(ResourceError::Unlink {
            kind,
            name: name.to_string(),
            source,
        }),
    }
}
