use namedipc_resource::{unlink_resource, ResourceKind, ResourceName};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::refcount::RefCounter;

/// A name this guard deletes when its process turns out to be the last holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedName {
    pub kind: ResourceKind,
    pub name: ResourceName,
}

impl OwnedName {
    pub fn new(kind: ResourceKind, name: ResourceName) -> Self {
        Self { kind, name }
    }
}

/// What a call to [`LifecycleGuard::teardown`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Other holders remain; nothing was deleted.
    Detached,
    /// This process was last. `names` lists the names actually removed;
    /// names another process already removed are left out.
    Deleted { names: Vec<ResourceName> },
    /// Teardown had already run.
    AlreadyTornDown,
    /// The count could not be released. Names were left in place.
    Failed,
}

/// Attachment to a shared resource that is released exactly once.
///
/// `attach` counts this process as a holder. `teardown` (or dropping the
/// guard) releases local state, gives the hold back and, when this process
/// was the last holder, deletes every owned name. Teardown errors are logged
/// and never propagate, since they happen on the way out.
pub struct LifecycleGuard<C: RefCounter> {
    counter: C,
    owned: Vec<OwnedName>,
    torn_down: bool,
}

impl<C: RefCounter> LifecycleGuard<C> {
    pub fn attach(counter: C, owned: Vec<OwnedName>) -> Result<Self> {
        let count = counter.increment()?;
        info!(count, "attached to shared resource");
        Ok(Self {
            counter,
            owned,
            torn_down: false,
        })
    }

    pub fn counter(&self) -> &C {
        &self.counter
    }

    pub fn owned(&self) -> &[OwnedName] {
        &self.owned
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn teardown(&mut self) -> TeardownOutcome {
        if self.torn_down {
            debug!("teardown already ran");
            return TeardownOutcome::AlreadyTornDown;
        }
        self.torn_down = true;

        let owned = &self.owned;
        let mut deleted = Vec::new();
        let mut retire = || {
            for entry in owned {
                match unlink_resource(entry.kind, &entry.name) {
                    Ok(true) => deleted.push(entry.name.clone()),
                    Ok(false) => {}
                    Err(err) => error!(error = %err, "failed to delete resource"),
                }
            }
        };

        let released = self.counter.release_with(&mut retire);

        if let Err(err) = self.counter.release_local() {
            warn!(error = %err, "failed to release process-local state");
        }

        match released {
            Ok(true) => {
                info!(deleted = deleted.len(), "last process, resources deleted");
                TeardownOutcome::Deleted { names: deleted }
            }
            Ok(false) => TeardownOutcome::Detached,
            Err(err) => {
                error!(error = %err, "failed to release reference count");
                TeardownOutcome::Failed
            }
        }
    }
}

impl<C: RefCounter> Drop for LifecycleGuard<C> {
    fn drop(&mut self) {
        if !self.torn_down {
            self.teardown();
        }
    }
}

impl<C: RefCounter + std::fmt::Debug> std::fmt::Debug for LifecycleGuard<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleGuard")
            .field("counter", &self.counter)
            .field("owned", &self.owned)
            .field("torn_down", &self.torn_down)
            .finish()
    }
}
