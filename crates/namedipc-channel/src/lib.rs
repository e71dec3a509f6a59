//! Fixed-size producer/consumer exchange between processes.
//!
//! A [`ProducerConsumerChannel`] sends and receives [`FixedMessage`]s through
//! any [`QueueBackend`], in practice a POSIX message queue. Each call first
//! waits a bounded time; if the queue stays full (or empty) it falls back to
//! a blocking call, so fullness and emptiness never surface as errors.

pub mod codec;
pub mod error;

#[cfg(unix)]
pub mod channel;

pub use codec::{check_size, FixedMessage};
pub use error::{ChannelError, Result};

#[cfg(unix)]
pub use channel::{ChannelConfig, Delivery, ProducerConsumerChannel, QueueBackend};

/// Open or create a queue sized for `M`, holding at most `depth` messages.
#[cfg(target_os = "linux")]
pub fn open_queue<M: FixedMessage>(
    name: &namedipc_resource::ResourceName,
    depth: usize,
) -> Result<namedipc_resource::ResourceHandle<namedipc_resource::MessageQueue>> {
    let attrs = namedipc_resource::QueueAttrs::fixed(depth, M::SIZE);
    Ok(namedipc_resource::ResourceHandle::open_or_create(name, &attrs)?)
}
