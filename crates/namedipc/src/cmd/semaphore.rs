use std::io::Write;
use std::time::Duration;

use namedipc_resource::ResourceKind;
use namedipc_sync::{
    CancelToken, Entry, LifecycleGuard, MutualExclusionSection, OwnedName, SemaphoreRefCounter,
    SyncError,
};
use tracing::{debug, info};

use crate::cmd::{attach_lock, log_teardown, reset, within, SemaphoreArgs};
use crate::config::AppContext;
use crate::exit::{sync_error, CliResult, SUCCESS};
use crate::output::Progress;

/// Ticks drawn per stretch.
const STRETCH_TICKS: usize = 50;

pub fn run(args: SemaphoreArgs, ctx: &AppContext) -> CliResult<i32> {
    let config = &ctx.config;
    let owned = vec![
        OwnedName::new(ResourceKind::Semaphore, config.counter_name.clone()),
        OwnedName::new(ResourceKind::Semaphore, config.mutex_name.clone()),
    ];

    if args.reset {
        info!("clean semaphores");
        return reset(&owned, &config.counter_name);
    }

    let lock = attach_lock(&config.counter_name, ctx)?;
    let counter = SemaphoreRefCounter::open_with(&config.counter_name, lock)
        .map_err(|err| sync_error("unable to open process counter", err))?;
    let section = MutualExclusionSection::open(&config.mutex_name)
        .map_err(|err| sync_error("unable to open critical section", err))?
        .with_config(config.section_config())
        .with_cancel(ctx.cancel.clone());
    if counter.created() || section.created() {
        info!("semaphores created");
    }

    let mut guard = LifecycleGuard::attach(counter, owned)
        .map_err(|err| sync_error("unable to increase number of processes", err))?;

    let mut progress = Progress::stdout(ctx.cancel.clone());
    let result = rounds(&section, &mut progress, config.tick, args.rounds, &ctx.cancel);
    let _ = progress.finish();

    info!("final cleaning");
    log_teardown(&guard.teardown());
    result.map(|()| SUCCESS)
}

fn rounds<W: Write>(
    section: &MutualExclusionSection,
    progress: &mut Progress<W>,
    tick: Duration,
    limit: Option<u64>,
    cancel: &CancelToken,
) -> CliResult<()> {
    let mut done: u64 = 0;
    while within(limit, done) && !cancel.is_cancelled() {
        debug!("try to enter critical section");
        let guard = match section.enter() {
            Ok(guard) => guard,
            Err(SyncError::Cancelled(_)) => break,
            Err(err) => return Err(sync_error("unable to enter critical section", err)),
        };
        if guard.entry() == Entry::Contended {
            debug!("critical section was occupied, waited for it");
        }
        debug!("process is now in critical section");

        let finished = stretch(progress, "CRITICAL SECTION:  ", '-', tick, cancel)?;

        debug!("leaving critical section");
        guard
            .leave()
            .map_err(|err| sync_error("unable to unlock critical section", err))?;
        if !finished {
            break;
        }

        if !stretch(progress, "Counting      : ", '+', tick, cancel)? {
            break;
        }
        done += 1;
    }
    Ok(())
}

/// Draw one bar; `false` if cancelled part way through.
fn stretch<W: Write>(
    progress: &mut Progress<W>,
    label: &str,
    mark: char,
    tick: Duration,
    cancel: &CancelToken,
) -> CliResult<bool> {
    progress.partial(label)?;
    for _ in 0..STRETCH_TICKS {
        if cancel.is_cancelled() {
            progress.line("")?;
            return Ok(false);
        }
        progress.partial(mark.encode_utf8(&mut [0u8; 4]))?;
        std::thread::sleep(tick);
    }
    progress.line("")?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use namedipc_resource::{unlink_resource, ResourceName};

    use super::*;

    fn unique_name(tag: &str) -> ResourceName {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos();
        ResourceName::new(format!("/namedipc-cli-{tag}-{}-{nanos}", std::process::id())).unwrap()
    }

    #[test]
    fn one_round_draws_both_bars() {
        let name = unique_name("bars");
        let section = MutualExclusionSection::open(&name).unwrap();
        let mut buf = Vec::new();
        let mut progress = Progress::new(&mut buf, CancelToken::new(), false);

        rounds(
            &section,
            &mut progress,
            Duration::from_millis(1),
            Some(1),
            &CancelToken::new(),
        )
        .unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("CRITICAL SECTION:  {}", "-".repeat(50)));
        assert_eq!(lines[1], format!("Counting      : {}", "+".repeat(50)));
        assert!(section.try_enter().unwrap().is_some(), "section released");

        let _ = unlink_resource(ResourceKind::Semaphore, &name);
    }

    #[test]
    fn cancelled_run_draws_nothing() {
        let name = unique_name("cancel");
        let section = MutualExclusionSection::open(&name).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let mut buf = Vec::new();
        let mut progress = Progress::new(&mut buf, CancelToken::new(), false);

        rounds(&section, &mut progress, Duration::from_millis(1), None, &token).unwrap();
        assert!(buf.is_empty());

        let _ = unlink_resource(ResourceKind::Semaphore, &name);
    }
}
