use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use namedipc_resource::{Deadline, NamedSemaphore, ResourceHandle, ResourceName, SemaphoreAttrs};
use tracing::{debug, error};

use crate::cancel::CancelToken;
use crate::error::{Result, SyncError};

/// Tuning for blocking entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionConfig {
    /// Length of each bounded wait between cancellation checks.
    pub poll_slice: Duration,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            poll_slice: Duration::from_millis(200),
        }
    }
}

/// Where this process stands relative to the critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionState {
    Unlocked = 0,
    /// A non-blocking attempt failed; a blocking wait is in progress.
    Contended = 1,
    Locked = 2,
}

impl SectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Contended,
            2 => Self::Locked,
            _ => Self::Unlocked,
        }
    }
}

/// How the section was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// The non-blocking attempt succeeded.
    Uncontended,
    /// Another process held the section; this one waited.
    Contended,
}

/// A critical section shared by every process using the same semaphore name.
///
/// Backed by a binary named semaphore. At most one process is inside at any
/// instant. Entry is not reentrant: entering again from the holder without
/// leaving first blocks forever (or until cancelled).
pub struct MutualExclusionSection {
    sem: ResourceHandle<NamedSemaphore>,
    cancel: Option<CancelToken>,
    config: SectionConfig,
    state: AtomicU8,
}

impl MutualExclusionSection {
    /// Open or create the binary semaphore `name` (created unlocked).
    pub fn open(name: &ResourceName) -> Result<Self> {
        let sem = ResourceHandle::open_or_create(name, &SemaphoreAttrs::binary())?;
        Ok(Self::from_handle(sem))
    }

    pub fn from_handle(sem: ResourceHandle<NamedSemaphore>) -> Self {
        Self {
            sem,
            cancel: None,
            config: SectionConfig::default(),
            state: AtomicU8::new(SectionState::Unlocked as u8),
        }
    }

    /// Make blocking entry give up once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_config(mut self, config: SectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &ResourceName {
        self.sem.name()
    }

    pub fn created(&self) -> bool {
        self.sem.created()
    }

    pub fn state(&self) -> SectionState {
        SectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Enter without blocking. `None` means another process is inside.
    pub fn try_enter(&self) -> Result<Option<SectionGuard<'_>>> {
        let acquired = self
            .sem
            .try_wait()
            .map_err(|e| SyncError::io("sem_trywait", self.name().as_str(), e))?;
        if !acquired {
            return Ok(None);
        }
        self.set_state(SectionState::Locked);
        Ok(Some(SectionGuard::new(self, Entry::Uncontended)))
    }

    /// Enter, blocking until the section is free.
    ///
    /// With a cancellation token the wait is split into bounded slices and
    /// fails with [`SyncError::Cancelled`] once the token fires.
    pub fn enter_blocking(&self) -> Result<SectionGuard<'_>> {
        self.set_state(SectionState::Contended);
        if let Err(err) = self.wait_blocking() {
            self.set_state(SectionState::Unlocked);
            return Err(err);
        }
        self.set_state(SectionState::Locked);
        Ok(SectionGuard::new(self, Entry::Contended))
    }

    fn wait_blocking(&self) -> Result<()> {
        let name = self.name().as_str();
        let Some(cancel) = &self.cancel else {
            return self.sem.wait().map_err(|e| SyncError::io("sem_wait", name, e));
        };

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled(name.to_string()));
            }
            let deadline = Deadline::after(self.config.poll_slice);
            let acquired = self
                .sem
                .wait_until(&deadline)
                .map_err(|e| SyncError::io("sem_timedwait", name, e))?;
            if acquired {
                return Ok(());
            }
        }
    }

    /// Try first; if the section is busy, wait for it.
    pub fn enter(&self) -> Result<SectionGuard<'_>> {
        if let Some(guard) = self.try_enter()? {
            debug!(name = %self.name(), "entered critical section");
            return Ok(guard);
        }

        debug!(name = %self.name(), "critical section busy, waiting");
        let guard = self.enter_blocking()?;
        debug!(name = %self.name(), "entered critical section after waiting");
        Ok(guard)
    }

    fn release(&self) -> Result<()> {
        self.set_state(SectionState::Unlocked);
        self.sem
            .post()
            .map_err(|e| SyncError::io("sem_post", self.name().as_str(), e))
    }
}

impl std::fmt::Debug for MutualExclusionSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutualExclusionSection")
            .field("sem", &self.sem)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

/// Proof of being inside a [`MutualExclusionSection`]. Leaves on drop.
#[must_use = "the section is left as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SectionGuard<'a> {
    section: &'a MutualExclusionSection,
    entry: Entry,
    released: bool,
}

impl<'a> SectionGuard<'a> {
    fn new(section: &'a MutualExclusionSection, entry: Entry) -> Self {
        Self {
            section,
            entry,
            released: false,
        }
    }

    pub fn entry(&self) -> Entry {
        self.entry
    }

    /// Leave the section, reporting a failed release.
    pub fn leave(mut self) -> Result<()> {
        self.released = true;
        self.section.release()
    }
}

impl Drop for SectionGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.section.release() {
            error!(error = %err, "failed to leave critical section");
        }
    }
}
