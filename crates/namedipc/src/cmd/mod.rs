use clap::{Args, Subcommand};
use namedipc_resource::{unlink_resource, ResourceKind, ResourceName};
use namedipc_sync::{NamedLock, OwnedName, TeardownOutcome};
use tracing::info;

use crate::config::AppContext;
use crate::exit::{resource_error, sync_error, CliResult, SUCCESS};

#[cfg(target_os = "linux")]
pub mod queue;
pub mod semaphore;
pub mod shm;
pub mod status;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Message queue: the creating process produces, every other one consumes.
    Queue(QueueArgs),
    /// Two semaphores: a shared critical section plus a process counter.
    Semaphore(SemaphoreArgs),
    /// Shared memory: every process increments one global counter.
    Shm(ShmArgs),
    /// Show which named objects exist and their current counts.
    Status(StatusArgs),
}

pub fn run(command: Command, ctx: &AppContext) -> CliResult<i32> {
    match command {
        #[cfg(target_os = "linux")]
        Command::Queue(args) => queue::run(args, ctx),
        #[cfg(not(target_os = "linux"))]
        Command::Queue(_) => Err(crate::exit::CliError::new(
            crate::exit::FAILURE,
            "POSIX message queues are only supported on Linux",
        )),
        Command::Semaphore(args) => semaphore::run(args, ctx),
        Command::Shm(args) => shm::run(args, ctx),
        Command::Status(args) => status::run(args, ctx),
    }
}

#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Delete the queue and its process counter, then exit.
    #[arg(short = 'r', long)]
    pub reset: bool,
    /// Stop after producing (or consuming) N messages.
    #[arg(long, value_name = "N")]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct SemaphoreArgs {
    /// Delete both semaphores, then exit.
    #[arg(short = 'r', long)]
    pub reset: bool,
    /// Stop after N critical/non-critical rounds.
    #[arg(long, value_name = "N")]
    pub rounds: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ShmArgs {
    /// Delete the segment and its lock, then exit.
    #[arg(short = 'r', long)]
    pub reset: bool,
    /// Stop after N increments.
    #[arg(long, value_name = "N")]
    pub iterations: Option<u64>,
}

#[derive(Args, Debug, Default)]
pub struct StatusArgs {}

/// Companion lock serialising attach and detach of `resource`.
pub(crate) fn lock_name(resource: &ResourceName) -> CliResult<ResourceName> {
    NamedLock::name_for(resource).map_err(|err| sync_error("invalid resource name", err))
}

/// The lock for `resource`, giving up shortly after the run is cancelled.
pub(crate) fn attach_lock(resource: &ResourceName, ctx: &AppContext) -> CliResult<NamedLock> {
    Ok(NamedLock::new(lock_name(resource)?)
        .with_cancel(ctx.cancel.clone())
        .with_poll_slice(ctx.config.poll_slice))
}

/// Remove every name a program owns plus the lock of its counter, whether or
/// not anyone is attached.
pub(crate) fn reset(owned: &[OwnedName], counted: &ResourceName) -> CliResult<i32> {
    let lock = OwnedName::new(ResourceKind::Semaphore, lock_name(counted)?);
    for entry in owned.iter().chain(std::iter::once(&lock)) {
        unlink_resource(entry.kind, &entry.name)
            .map_err(|err| resource_error("reset failed", err))?;
    }
    info!(count = owned.len() + 1, "named objects cleaned");
    Ok(SUCCESS)
}

pub(crate) fn log_teardown(outcome: &TeardownOutcome) {
    match outcome {
        TeardownOutcome::Deleted { names } => {
            info!(deleted = names.len(), "this process was last, named objects removed");
        }
        TeardownOutcome::Detached => info!("detached, other processes remain"),
        TeardownOutcome::AlreadyTornDown | TeardownOutcome::Failed => {}
    }
}

/// Whether a loop bounded by `limit` should run another pass.
pub(crate) fn within(limit: Option<u64>, done: u64) -> bool {
    limit.is_none_or(|n| done < n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_loops_always_continue() {
        assert!(within(None, u64::MAX));
        assert!(within(Some(2), 1));
        assert!(!within(Some(2), 2));
        assert!(!within(Some(0), 0));
    }
}
