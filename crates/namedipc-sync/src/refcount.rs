use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use namedipc_resource::{
    NamedSemaphore, ResourceHandle, ResourceName, SegmentAttrs, SemaphoreAttrs, SharedLayout,
    SharedSegment,
};
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::lock::{LockHold, NamedLock};

/// Marker the creator stores once a segment is fully initialised.
pub const READY_MAGIC: u32 = 0x4e49_5043;

/// Marker the last holder stores before the segment name is removed.
pub const RETIRED_MAGIC: u32 = 0xdead_0001;

/// How long a peer waits for the creator's ready marker.
const READY_WAIT: Duration = Duration::from_secs(1);

/// Number of processes holding a named resource, kept by the resource itself.
///
/// Every process calls [`increment`](RefCounter::increment) once after
/// attaching and [`release_with`](RefCounter::release_with) once during
/// teardown. Only the process that brings the count to zero runs the
/// retire step.
pub trait RefCounter {
    /// Record this process as a holder; returns the count afterwards.
    fn increment(&self) -> Result<u32>;

    /// Drop this process's hold; `true` iff the count is now exactly zero.
    fn decrement_and_check(&self) -> Result<bool>;

    /// Current number of holders, read from the shared object.
    fn count(&self) -> Result<u32>;

    /// Decrement and, when this was the last holder, run `retire`.
    ///
    /// Counters that can serialise attach against detach override this so
    /// `retire` runs before any new holder can attach.
    fn release_with(&self, retire: &mut dyn FnMut()) -> Result<bool> {
        let last = self.decrement_and_check()?;
        if last {
            retire();
        }
        Ok(last)
    }

    /// Release process-local state such as mappings. Called once the hold
    /// has been released, whether or not the resource was deleted.
    fn release_local(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The lock taken while opening, kept until the first count change.
///
/// Opening and counting form one step under the lock, so the last holder
/// can never retire a name between a peer's open and its increment.
#[derive(Debug)]
struct Locking {
    lock: NamedLock,
    opening: Mutex<Option<LockHold>>,
}

impl Locking {
    fn open(lock: NamedLock) -> Result<(Self, LockHold)> {
        let hold = lock.acquire()?;
        Ok((
            Self {
                lock,
                opening: Mutex::new(None),
            },
            hold,
        ))
    }

    fn keep(&self, hold: LockHold) {
        *self.opening.lock().unwrap_or_else(PoisonError::into_inner) = Some(hold);
    }

    fn hold(&self) -> Result<LockHold> {
        let pending = self
            .opening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some(hold) => Ok(hold),
            None => self.lock.acquire(),
        }
    }
}

/// Holder count kept in a named counting semaphore.
///
/// The semaphore value is the count: attaching posts, detaching trywaits.
/// Both run under the companion [`NamedLock`] `<name>.lock`, which the last
/// holder retires together with the names it deletes.
///
/// `open` returns with the lock still held; it is released by the first
/// [`increment`](RefCounter::increment). Resources that share this count
/// should be opened in between, and the increment should follow promptly.
#[derive(Debug)]
pub struct SemaphoreRefCounter {
    sem: ResourceHandle<NamedSemaphore>,
    locking: Locking,
}

impl SemaphoreRefCounter {
    /// Open or create the counting semaphore `name` (starting at zero).
    pub fn open(name: &ResourceName) -> Result<Self> {
        Self::open_with(name, NamedLock::for_resource(name)?)
    }

    /// Like [`open`](Self::open) with a configured lock (cancellation, slice).
    pub fn open_with(name: &ResourceName, lock: NamedLock) -> Result<Self> {
        let (locking, hold) = Locking::open(lock)?;
        let sem = ResourceHandle::open_or_create(name, &SemaphoreAttrs::counting(0))?;
        locking.keep(hold);
        Ok(Self { sem, locking })
    }

    pub fn lock_name(name: &ResourceName) -> Result<ResourceName> {
        NamedLock::name_for(name)
    }

    pub fn name(&self) -> &ResourceName {
        self.sem.name()
    }

    pub fn created(&self) -> bool {
        self.sem.created()
    }

    fn decrement_locked(&self) -> Result<bool> {
        let name = self.name().as_str();
        let taken = self
            .sem
            .try_wait()
            .map_err(|e| SyncError::io("sem_trywait", name, e))?;
        if !taken {
            return Err(SyncError::Underflow(name.to_string()));
        }
        let remaining = self.count()?;
        info!(name, remaining, "number of remaining processes");
        Ok(remaining == 0)
    }
}

impl RefCounter for SemaphoreRefCounter {
    fn increment(&self) -> Result<u32> {
        let _hold = self.locking.hold()?;
        debug!(name = %self.name(), "increase number of processes");
        self.sem
            .post()
            .map_err(|e| SyncError::io("sem_post", self.name().as_str(), e))?;
        self.count()
    }

    fn decrement_and_check(&self) -> Result<bool> {
        let _hold = self.locking.hold()?;
        self.decrement_locked()
    }

    fn count(&self) -> Result<u32> {
        let value = self
            .sem
            .value()
            .map_err(|e| SyncError::io("sem_getvalue", self.name().as_str(), e))?;
        Ok(value.max(0) as u32)
    }

    fn release_with(&self, retire: &mut dyn FnMut()) -> Result<bool> {
        let hold = self.locking.hold()?;
        let last = self.decrement_locked()?;
        if last {
            retire();
            hold.retire();
        }
        Ok(last)
    }
}

/// Bookkeeping words at the start of a counted segment.
#[repr(C)]
#[derive(Debug)]
pub struct SegmentHeader {
    ready: AtomicU32,
    attached: AtomicU32,
}

impl SegmentHeader {
    pub fn attached(&self) -> u32 {
        self.attached.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) == READY_MAGIC
    }
}

/// A segment layout that carries a [`SegmentHeader`].
pub trait CountedLayout: SharedLayout {
    fn header(&self) -> &SegmentHeader;
}

/// Holder count kept inside the shared segment itself.
///
/// Every attach and detach runs under the companion [`NamedLock`]
/// `<segment>.lock`. The same lock covers creation, so the creator finishes
/// initialising the segment and publishes [`READY_MAGIC`] before any peer can
/// read it, and the last holder removes the names before any newcomer can
/// attach to a segment that is about to disappear. As with
/// [`SemaphoreRefCounter`], `attach` keeps the lock until the first increment.
pub struct SegmentRefCounter<T> {
    segment: ResourceHandle<SharedSegment>,
    locking: Locking,
    _layout: PhantomData<T>,
}

impl<T: CountedLayout> SegmentRefCounter<T> {
    /// Lock name used alongside segment `name`.
    pub fn lock_name(name: &ResourceName) -> Result<ResourceName> {
        NamedLock::name_for(name)
    }

    /// Open or create segment `name`, running `init` once if this process
    /// created it. Does not count this process as a holder yet.
    pub fn attach(name: &ResourceName, init: impl FnOnce(&T)) -> Result<Self> {
        Self::attach_with(name, NamedLock::for_resource(name)?, init)
    }

    /// Like [`attach`](Self::attach) with a configured lock.
    pub fn attach_with(
        name: &ResourceName,
        lock: NamedLock,
        init: impl FnOnce(&T),
    ) -> Result<Self> {
        let (locking, hold) = Locking::open(lock)?;

        let attrs = SegmentAttrs::for_layout::<T>();
        let segment = ResourceHandle::<SharedSegment>::open_or_create(name, &attrs)?;
        let layout = segment.view::<T>()?;
        let header = layout.header();

        if segment.created() {
            init(layout);
            header.attached.store(0, Ordering::Release);
            header.ready.store(READY_MAGIC, Ordering::Release);
            info!(%name, "shared segment initialised, this process is first");
        } else {
            wait_ready(header, name)?;
        }

        locking.keep(hold);
        Ok(Self {
            segment,
            locking,
            _layout: PhantomData,
        })
    }

    /// Borrow the shared layout. Fails once the mapping has been released.
    pub fn layout(&self) -> Result<&T> {
        Ok(self.segment.view::<T>()?)
    }

    pub fn segment(&self) -> &ResourceHandle<SharedSegment> {
        &self.segment
    }

    pub fn created(&self) -> bool {
        self.segment.created()
    }

    fn decrement_locked(&self) -> Result<bool> {
        let header = self.layout()?.header();
        let name = self.segment.name().as_str();
        let current = header.attached.load(Ordering::Acquire);
        if current == 0 {
            return Err(SyncError::Underflow(name.to_string()));
        }
        let remaining = header.attached.fetch_sub(1, Ordering::AcqRel) - 1;
        info!(name, remaining, "number of remaining processes");
        if remaining == 0 {
            header.ready.store(RETIRED_MAGIC, Ordering::Release);
        }
        Ok(remaining == 0)
    }
}

fn wait_ready(header: &SegmentHeader, name: &ResourceName) -> Result<()> {
    let start = Instant::now();
    while !header.is_ready() {
        if start.elapsed() >= READY_WAIT {
            return Err(SyncError::Uninitialized(name.to_string()));
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    Ok(())
}

impl<T: CountedLayout> RefCounter for SegmentRefCounter<T> {
    fn increment(&self) -> Result<u32> {
        let _hold = self.locking.hold()?;
        let header = self.layout()?.header();
        let count = header.attached.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(name = %self.segment.name(), count, "increase number of processes");
        Ok(count)
    }

    fn decrement_and_check(&self) -> Result<bool> {
        let _hold = self.locking.hold()?;
        self.decrement_locked()
    }

    fn count(&self) -> Result<u32> {
        Ok(self.layout()?.header().attached())
    }

    fn release_with(&self, retire: &mut dyn FnMut()) -> Result<bool> {
        let hold = self.locking.hold()?;
        let last = self.decrement_locked()?;
        if last {
            retire();
            hold.retire();
        }
        Ok(last)
    }

    fn release_local(&mut self) -> Result<()> {
        info!(name = %self.segment.name(), "shared memory releasing");
        Ok(self.segment.unmap()?)
    }
}

impl<T> std::fmt::Debug for SegmentRefCounter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentRefCounter")
            .field("segment", &self.segment)
            .field("lock", self.locking.lock.name())
            .finish()
    }
}
