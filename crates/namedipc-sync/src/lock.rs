use std::io;
use std::time::{Duration, Instant};

use namedipc_resource::{
    Deadline, NamedResource, NamedSemaphore, ResourceHandle, ResourceName, SemaphoreAttrs,
};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{Result, SyncError};

/// How long a cancelled process keeps trying for the lock, so teardown still
/// gets through brief contention after Ctrl-C.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// A binary named semaphore serialising attach and detach of one resource.
///
/// A retired lock is unlinked and never posted again, so acquiring a lock
/// proves it is still the live one. Waiters reopen the name after every poll
/// slice; a waiter queued on a retired lock therefore moves to the fresh one
/// the next newcomer creates.
#[derive(Debug, Clone)]
pub struct NamedLock {
    name: ResourceName,
    cancel: Option<CancelToken>,
    poll_slice: Duration,
}

impl NamedLock {
    pub fn new(name: ResourceName) -> Self {
        Self {
            name,
            cancel: None,
            poll_slice: Duration::from_millis(200),
        }
    }

    /// The lock guarding `resource`, named `<resource>.lock`.
    pub fn for_resource(resource: &ResourceName) -> Result<Self> {
        Ok(Self::new(Self::name_for(resource)?))
    }

    pub fn name_for(resource: &ResourceName) -> Result<ResourceName> {
        Ok(resource.with_suffix("lock")?)
    }

    /// Give up waiting once `token` fires (after a short grace period).
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_poll_slice(mut self, poll_slice: Duration) -> Self {
        self.poll_slice = poll_slice;
        self
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn acquire(&self) -> Result<LockHold> {
        let mut cancelled_at: Option<Instant> = None;
        loop {
            let sem = ResourceHandle::<NamedSemaphore>::open_or_create(
                &self.name,
                &SemaphoreAttrs::binary(),
            )?;
            let op_error = |op, e| SyncError::io(op, self.name.as_str(), e);
            if sem.try_wait().map_err(|e| op_error("sem_trywait", e))? {
                return Ok(LockHold::new(sem));
            }

            if let Some(cancel) = &self.cancel {
                if cancel.is_cancelled() {
                    let since = *cancelled_at.get_or_insert_with(Instant::now);
                    if since.elapsed() >= CANCEL_GRACE {
                        return Err(SyncError::Cancelled(self.name.to_string()));
                    }
                }
            }

            let deadline = Deadline::after(self.poll_slice);
            if sem
                .wait_until(&deadline)
                .map_err(|e| op_error("sem_timedwait", e))?
            {
                return Ok(LockHold::new(sem));
            }
            debug!(name = %self.name, "lock still busy, reopening");
        }
    }
}

/// Holds a [`NamedLock`]; posts it back on drop unless retired.
#[must_use = "the lock is released as soon as the hold is dropped"]
#[derive(Debug)]
pub struct LockHold {
    sem: ResourceHandle<NamedSemaphore>,
    retired: bool,
}

impl LockHold {
    fn new(sem: ResourceHandle<NamedSemaphore>) -> Self {
        Self {
            sem,
            retired: false,
        }
    }

    /// Remove the lock name and keep the semaphore taken forever.
    pub fn retire(mut self) {
        self.retired = true;
        match NamedSemaphore::unlink(self.sem.name()) {
            Ok(()) => debug!(name = %self.sem.name(), "lock retired"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(name = %self.sem.name(), error = %err, "failed to remove lock"),
        }
    }
}

impl Drop for LockHold {
    fn drop(&mut self) {
        if self.retired {
            return;
        }
        if let Err(err) = self.sem.post() {
            tracing::error!(name = %self.sem.name(), error = %err, "failed to release lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refcount::tests::unique_name;

    fn cleanup(lock: &NamedLock) {
        let _ = namedipc_resource::unlink_resource(
            namedipc_resource::ResourceKind::Semaphore,
            lock.name(),
        );
    }

    #[test]
    fn second_acquire_waits_for_release() {
        let lock = NamedLock::new(unique_name("lock")).with_poll_slice(Duration::from_millis(20));
        let hold = lock.acquire().unwrap();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| lock.acquire().map(drop));
            std::thread::sleep(Duration::from_millis(80));
            assert!(!waiter.is_finished());
            drop(hold);
            waiter.join().unwrap().unwrap();
        });
        cleanup(&lock);
    }

    #[test]
    fn retired_lock_hands_waiters_a_fresh_one() {
        let lock = NamedLock::new(unique_name("lockretire"))
            .with_poll_slice(Duration::from_millis(20));
        let hold = lock.acquire().unwrap();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| lock.acquire().map(drop));
            std::thread::sleep(Duration::from_millis(60));
            hold.retire();
            let start = Instant::now();
            waiter.join().unwrap().unwrap();
            assert!(start.elapsed() < Duration::from_secs(1));
        });

        // The fresh lock is free again once the waiter let go.
        drop(lock.acquire().unwrap());
        cleanup(&lock);
    }

    #[test]
    fn cancellation_ends_wait_on_abandoned_lock() {
        let token = CancelToken::new();
        let lock = NamedLock::new(unique_name("lockdead"))
            .with_poll_slice(Duration::from_millis(20))
            .with_cancel(token.clone());
        // A holder that never lets go, like a peer that died inside.
        std::mem::forget(lock.acquire().unwrap());

        token.cancel();
        let start = Instant::now();
        assert!(matches!(lock.acquire(), Err(SyncError::Cancelled(_))));
        assert!(start.elapsed() >= CANCEL_GRACE);
        assert!(start.elapsed() < CANCEL_GRACE + Duration::from_secs(1));
        cleanup(&lock);
    }
}
