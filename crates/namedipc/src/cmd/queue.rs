use namedipc_channel::{
    open_queue, ChannelError, Delivery, ProducerConsumerChannel, QueueBackend,
};
use namedipc_resource::{ResourceKind, ResourceName};
use namedipc_sync::{CancelToken, LifecycleGuard, OwnedName, SemaphoreRefCounter};
use tracing::{debug, info};

use crate::cmd::{attach_lock, log_teardown, reset, within, QueueArgs};
use crate::config::AppContext;
use crate::exit::{channel_error, resource_error, sync_error, CliResult, SUCCESS};
use crate::output::Progress;

/// Companion semaphore counting the processes attached to `queue`.
pub fn refs_name(queue: &ResourceName) -> CliResult<ResourceName> {
    queue
        .with_suffix("refs")
        .map_err(|err| resource_error("invalid queue name", err))
}

pub fn run(args: QueueArgs, ctx: &AppContext) -> CliResult<i32> {
    let config = &ctx.config;
    let refs = refs_name(&config.queue_name)?;
    let owned = vec![
        OwnedName::new(ResourceKind::MessageQueue, config.queue_name.clone()),
        OwnedName::new(ResourceKind::Semaphore, refs.clone()),
    ];

    if args.reset {
        info!(name = %config.queue_name, "clean message queue");
        return reset(&owned, &refs);
    }

    // The counter keeps its lock until the guard increments it, so the last
    // process cannot delete the queue between our open and our attach.
    let counter = SemaphoreRefCounter::open_with(&refs, attach_lock(&refs, ctx)?)
        .map_err(|err| sync_error("unable to open process counter", err))?;
    let queue = open_queue::<i32>(&config.queue_name, config.queue_depth)
        .map_err(|err| channel_error("unable to open message queue", err))?;
    let producer = queue.created();
    if producer {
        info!(
            name = %config.queue_name,
            "this process created the message queue and works as producer"
        );
    } else {
        info!(name = %config.queue_name, "attached to message queue, working as consumer");
    }

    let mut guard = LifecycleGuard::attach(counter, owned)
        .map_err(|err| sync_error("unable to attach", err))?;

    let channel = ProducerConsumerChannel::<_, i32>::new(queue, config.channel_config())
        .map_err(|err| channel_error("message queue is not usable", err))?
        .with_cancel(ctx.cancel.clone());
    let mut progress = Progress::stdout(ctx.cancel.clone());

    let result = if producer {
        produce(&channel, &mut progress, args.count, &ctx.cancel)
    } else {
        consume(&channel, &mut progress, args.count, &ctx.cancel)
    };
    let _ = progress.finish();

    info!("final cleaning");
    log_teardown(&guard.teardown());
    result.map(|()| SUCCESS)
}

fn produce<Q: QueueBackend>(
    channel: &ProducerConsumerChannel<Q, i32>,
    progress: &mut Progress<std::io::Stdout>,
    count: Option<u64>,
    cancel: &CancelToken,
) -> CliResult<()> {
    let mut produced: u64 = 0;
    while within(count, produced) && !cancel.is_cancelled() {
        // Values only need to be distinguishable; wrap like a small counter.
        let value = (produced % 1000) as i32;
        debug!(value, "sending message with timeout");
        match channel.send(&value) {
            Ok(Delivery::Bounded) => {}
            Ok(Delivery::Fallback) => debug!("message sent without timeout"),
            Err(ChannelError::Cancelled) => break,
            Err(err) => return Err(channel_error("unable to send message", err)),
        }
        produced += 1;
        progress.update(&format!("Produced {produced}"))?;
    }
    Ok(())
}

fn consume<Q: QueueBackend>(
    channel: &ProducerConsumerChannel<Q, i32>,
    progress: &mut Progress<std::io::Stdout>,
    count: Option<u64>,
    cancel: &CancelToken,
) -> CliResult<()> {
    let mut consumed: u64 = 0;
    while within(count, consumed) && !cancel.is_cancelled() {
        debug!("receiving message with timeout");
        match channel.receive() {
            Ok((value, delivery)) => debug!(value, ?delivery, "message received"),
            Err(ChannelError::Cancelled) => break,
            Err(err) => return Err(channel_error("unable to receive message", err)),
        }
        consumed += 1;
        progress.update(&format!("Consumed {consumed} messages"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_semaphore_sits_next_to_the_queue() {
        let queue = ResourceName::new("/mq_example").unwrap();
        assert_eq!(refs_name(&queue).unwrap().as_str(), "/mq_example.refs");
    }
}
