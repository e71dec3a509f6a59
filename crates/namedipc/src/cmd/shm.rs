use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use namedipc_resource::{
    ResourceError, ResourceHandle, ResourceKind, ResourceName, SegmentAttrs, SharedLayout,
    SharedSegment,
};
use namedipc_sync::{
    CancelToken, CountedLayout, LifecycleGuard, OwnedName, SegmentHeader, SegmentRefCounter,
};
use tracing::{debug, info};

use crate::cmd::{attach_lock, log_teardown, reset, within, ShmArgs};
use crate::config::AppContext;
use crate::exit::{resource_error, sync_error, CliResult, SUCCESS};
use crate::output::Progress;

/// Increments between pauses.
const PAUSE_EVERY: i64 = 100;

/// Layout of the shared segment.
#[repr(C)]
pub struct SharedCounters {
    header: SegmentHeader,
    pub counter: AtomicI64,
}

// SAFETY: repr(C), atomics only, all-zero is a valid (not yet ready) state.
unsafe impl SharedLayout for SharedCounters {}

impl CountedLayout for SharedCounters {
    fn header(&self) -> &SegmentHeader {
        &self.header
    }
}

pub fn run(args: ShmArgs, ctx: &AppContext) -> CliResult<i32> {
    let config = &ctx.config;
    let owned = vec![OwnedName::new(
        ResourceKind::SharedMemory,
        config.shm_name.clone(),
    )];

    if args.reset {
        info!(name = %config.shm_name, "clean shared memory");
        return reset(&owned, &config.shm_name);
    }

    let lock = attach_lock(&config.shm_name, ctx)?;
    let counter =
        SegmentRefCounter::<SharedCounters>::attach_with(&config.shm_name, lock, |layout| {
            layout.counter.store(0, Ordering::Release);
        })
        .map_err(|err| sync_error("unable to attach shared memory", err))?;
    if counter.created() {
        info!(name = %config.shm_name, "segment created, this process is first");
    }

    let mut guard = LifecycleGuard::attach(counter, owned)
        .map_err(|err| sync_error("unable to increase number of processes", err))?;
    info!("shared memory attached");

    let mut progress = Progress::stdout(ctx.cancel.clone());
    let result = match guard.counter().layout() {
        Ok(layout) => count(
            layout,
            &mut progress,
            config.shm_pause,
            args.iterations,
            &ctx.cancel,
        ),
        Err(err) => Err(sync_error("shared memory not mapped", err)),
    };
    let _ = progress.finish();

    info!("final cleaning");
    log_teardown(&guard.teardown());
    result.map(|()| SUCCESS)
}

fn count<W: Write>(
    layout: &SharedCounters,
    progress: &mut Progress<W>,
    pause: Duration,
    limit: Option<u64>,
    cancel: &CancelToken,
) -> CliResult<()> {
    let mut old = layout.counter.load(Ordering::Acquire);
    debug!(counter = old, "current global counter");

    let mut done: u64 = 0;
    while within(limit, done) && !cancel.is_cancelled() {
        let current = layout.counter.load(Ordering::Acquire);
        if current != old {
            progress.line(&format!(
                "Another process changed global counter. Difference={}",
                current - old
            ))?;
        }

        let new = layout.counter.fetch_add(1, Ordering::AcqRel) + 1;
        old = new;
        progress.update(&format!("New value of global counter {new}"))?;
        done += 1;

        if new % PAUSE_EVERY == 0 {
            std::thread::sleep(pause);
        }
    }
    Ok(())
}

/// Read-only view used by `status`; does not count as a holder.
pub(crate) fn peek(name: &ResourceName) -> CliResult<Option<(u32, i64)>> {
    let segment = match ResourceHandle::<SharedSegment>::open_existing(
        name,
        &SegmentAttrs::for_layout::<SharedCounters>(),
    ) {
        Ok(segment) => segment,
        Err(err) if is_not_found(&err) => return Ok(None),
        Err(err) => return Err(resource_error("unable to open shared memory", err)),
    };
    let layout = segment
        .view::<SharedCounters>()
        .map_err(|err| resource_error("unable to view shared memory", err))?;
    Ok(Some((
        layout.header().attached(),
        layout.counter.load(Ordering::Acquire),
    )))
}

pub(crate) fn is_not_found(err: &ResourceError) -> bool {
    err.os_error()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use std::io;

    use namedipc_resource::unlink_resource;

    use super::*;
    use crate::cmd::lock_name;

    /// Output that bumps the shared counter on every flush, standing in for
    /// a second process incrementing between our updates.
    struct Meddler<'a> {
        out: Vec<u8>,
        counter: &'a AtomicI64,
    }

    impl Write for Meddler<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.out.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.counter.fetch_add(5, Ordering::AcqRel);
            Ok(())
        }
    }

    fn unique_name(tag: &str) -> ResourceName {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos();
        ResourceName::new(format!("/namedipc-cli-{tag}-{}-{nanos}", std::process::id())).unwrap()
    }

    fn cleanup(name: &ResourceName) {
        let _ = unlink_resource(ResourceKind::SharedMemory, name);
        let _ = unlink_resource(ResourceKind::Semaphore, &lock_name(name).unwrap());
    }

    #[test]
    fn counts_from_the_shared_value() {
        let name = unique_name("count");
        let counter = SegmentRefCounter::<SharedCounters>::attach(&name, |l| {
            l.counter.store(0, Ordering::Release)
        })
        .unwrap();
        let layout = counter.layout().unwrap();
        layout.counter.store(10, Ordering::Release);

        let mut buf = Vec::new();
        let mut progress = Progress::new(&mut buf, CancelToken::new(), false);
        count(
            layout,
            &mut progress,
            Duration::from_millis(1),
            Some(3),
            &CancelToken::new(),
        )
        .unwrap();

        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "New value of global counter 11\nNew value of global counter 12\nNew value of global counter 13\n"
        );
        assert_eq!(layout.counter.load(Ordering::Acquire), 13);
        drop(counter);
        cleanup(&name);
    }

    #[test]
    fn reports_increments_made_by_other_processes() {
        let name = unique_name("foreign");
        let counter = SegmentRefCounter::<SharedCounters>::attach(&name, |l| {
            l.counter.store(0, Ordering::Release)
        })
        .unwrap();
        let layout = counter.layout().unwrap();

        let mut out = Meddler {
            out: Vec::new(),
            counter: &layout.counter,
        };
        let mut progress = Progress::new(&mut out, CancelToken::new(), false);
        count(
            layout,
            &mut progress,
            Duration::from_millis(1),
            Some(3),
            &CancelToken::new(),
        )
        .unwrap();
        drop(progress);

        let text = String::from_utf8(out.out).unwrap();
        assert_eq!(
            text,
            "New value of global counter 1\n\
             Another process changed global counter. Difference=5\n\
             New value of global counter 12\n\
             Another process changed global counter. Difference=5\n\
             New value of global counter 23\n"
        );
        assert_eq!(layout.counter.load(Ordering::Acquire), 28);
        drop(counter);
        cleanup(&name);
    }

    #[test]
    fn peek_reports_holders_without_attaching() {
        let name = unique_name("peek");
        assert!(peek(&name).unwrap().is_none());

        let counter = SegmentRefCounter::<SharedCounters>::attach(&name, |_| {}).unwrap();
        let mut guard = LifecycleGuard::attach(
            counter,
            vec![OwnedName::new(ResourceKind::SharedMemory, name.clone())],
        )
        .unwrap();
        assert_eq!(peek(&name).unwrap(), Some((1, 0)));

        guard.teardown();
        assert!(peek(&name).unwrap().is_none());
        cleanup(&name);
    }

    #[test]
    fn reset_of_missing_names_succeeds() {
        let name = unique_name("reset");
        let owned = vec![OwnedName::new(ResourceKind::SharedMemory, name.clone())];
        assert_eq!(reset(&owned, &name).unwrap(), SUCCESS);
    }
}
