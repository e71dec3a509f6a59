use std::io;
use std::marker::PhantomData;
use std::time::Duration;

use namedipc_resource::{Deadline, ResourceHandle};
use namedipc_sync::CancelToken;
use tracing::{debug, warn};

use crate::codec::{check_size, FixedMessage};
use crate::error::{ChannelError, Result};

/// The timed and blocking queue calls a channel is built from.
///
/// `*_until` report a timeout as `Ok(false)` / `Ok(None)`; every other
/// failure is an `Err`.
pub trait QueueBackend {
    /// Size of every message the queue carries.
    fn message_size(&self) -> usize;

    fn send_until(&self, msg: &[u8], deadline: &Deadline) -> io::Result<bool>;

    fn send_blocking(&self, msg: &[u8]) -> io::Result<()>;

    fn receive_until(&self, buf: &mut [u8], deadline: &Deadline) -> io::Result<Option<usize>>;

    fn receive_blocking(&self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<Q: QueueBackend + ?Sized> QueueBackend for &Q {
    fn message_size(&self) -> usize {
        (**self).message_size()
    }

    fn send_until(&self, msg: &[u8], deadline: &Deadline) -> io::Result<bool> {
        (**self).send_until(msg, deadline)
    }

    fn send_blocking(&self, msg: &[u8]) -> io::Result<()> {
        (**self).send_blocking(msg)
    }

    fn receive_until(&self, buf: &mut [u8], deadline: &Deadline) -> io::Result<Option<usize>> {
        (**self).receive_until(buf, deadline)
    }

    fn receive_blocking(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).receive_blocking(buf)
    }
}

impl<Q: QueueBackend> QueueBackend for ResourceHandle<Q> {
    fn message_size(&self) -> usize {
        (**self).message_size()
    }

    fn send_until(&self, msg: &[u8], deadline: &Deadline) -> io::Result<bool> {
        (**self).send_until(msg, deadline)
    }

    fn send_blocking(&self, msg: &[u8]) -> io::Result<()> {
        (**self).send_blocking(msg)
    }

    fn receive_until(&self, buf: &mut [u8], deadline: &Deadline) -> io::Result<Option<usize>> {
        (**self).receive_until(buf, deadline)
    }

    fn receive_blocking(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).receive_blocking(buf)
    }
}

#[cfg(target_os = "linux")]
impl QueueBackend for namedipc_resource::MessageQueue {
    fn message_size(&self) -> usize {
        namedipc_resource::MessageQueue::message_size(self)
    }

    fn send_until(&self, msg: &[u8], deadline: &Deadline) -> io::Result<bool> {
        namedipc_resource::MessageQueue::send_until(self, msg, deadline)
    }

    fn send_blocking(&self, msg: &[u8]) -> io::Result<()> {
        self.send(msg)
    }

    fn receive_until(&self, buf: &mut [u8], deadline: &Deadline) -> io::Result<Option<usize>> {
        namedipc_resource::MessageQueue::receive_until(self, buf, deadline)
    }

    fn receive_blocking(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.receive(buf)
    }
}

/// Timing policy for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// How long the bounded tier of `send` and `receive` waits.
    pub send_deadline: Duration,
    /// Pause between a timed-out receive and the blocking retry.
    pub receive_backoff: Duration,
    /// Slice length for blocking waits that watch a cancellation token.
    pub poll_slice: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            send_deadline: Duration::from_secs(1),
            receive_backoff: Duration::from_millis(500),
            poll_slice: Duration::from_millis(200),
        }
    }
}

/// Which tier completed an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Finished within the bounded wait.
    Bounded,
    /// The bounded wait timed out; the blocking retry finished it.
    Fallback,
}

/// Fixed-size message exchange with a bounded-then-blocking discipline.
///
/// Neither a full queue on `send` nor an empty queue on `receive` is ever
/// reported as an error: after the bounded attempt times out the call blocks
/// until a peer makes room or sends something. A cancellation token, when
/// set, is the only way out of that blocking tier.
pub struct ProducerConsumerChannel<Q, M> {
    queue: Q,
    config: ChannelConfig,
    cancel: Option<CancelToken>,
    _message: PhantomData<fn() -> M>,
}

impl<Q: QueueBackend, M: FixedMessage> ProducerConsumerChannel<Q, M> {
    /// Wrap `queue`. Fails if its message size differs from `M::SIZE`.
    pub fn new(queue: Q, config: ChannelConfig) -> Result<Self> {
        check_size(M::SIZE, queue.message_size())?;
        Ok(Self {
            queue,
            config,
            cancel: None,
            _message: PhantomData,
        })
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn send(&self, message: &M) -> Result<Delivery> {
        let mut buf = vec![0u8; M::SIZE];
        message.encode(&mut buf);
        self.send_bytes(&buf)
    }

    /// Send an already encoded message.
    pub fn send_bytes(&self, bytes: &[u8]) -> Result<Delivery> {
        check_size(M::SIZE, bytes.len())?;

        let deadline = Deadline::after(self.config.send_deadline);
        let sent = self
            .queue
            .send_until(bytes, &deadline)
            .map_err(|e| self.map_io("mq_timedsend", bytes.len(), e))?;
        if sent {
            return Ok(Delivery::Bounded);
        }

        warn!(
            timeout_ms = self.config.send_deadline.as_millis() as u64,
            "queue full, falling back to blocking send"
        );
        self.send_unbounded(bytes)?;
        Ok(Delivery::Fallback)
    }

    fn send_unbounded(&self, bytes: &[u8]) -> Result<()> {
        let Some(cancel) = &self.cancel else {
            return self
                .queue
                .send_blocking(bytes)
                .map_err(|e| self.map_io("mq_send", bytes.len(), e));
        };
        loop {
            if cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            let deadline = Deadline::after(self.config.poll_slice);
            if self
                .queue
                .send_until(bytes, &deadline)
                .map_err(|e| self.map_io("mq_timedsend", bytes.len(), e))?
            {
                return Ok(());
            }
        }
    }

    pub fn receive(&self) -> Result<(M, Delivery)> {
        let len = self.queue.message_size().max(M::SIZE);
        let mut buf = vec![0u8; len];

        let deadline = Deadline::after(self.config.send_deadline);
        let received = self
            .queue
            .receive_until(&mut buf, &deadline)
            .map_err(|e| self.map_io("mq_timedreceive", len, e))?;
        if let Some(n) = received {
            return Ok((M::decode(&buf[..n])?, Delivery::Bounded));
        }

        debug!(
            backoff_ms = self.config.receive_backoff.as_millis() as u64,
            "queue empty, backing off before blocking receive"
        );
        self.pause(self.config.receive_backoff)?;
        let n = self.receive_unbounded(&mut buf)?;
        Ok((M::decode(&buf[..n])?, Delivery::Fallback))
    }

    fn receive_unbounded(&self, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        let Some(cancel) = &self.cancel else {
            return self
                .queue
                .receive_blocking(buf)
                .map_err(|e| self.map_io("mq_receive", len, e));
        };
        loop {
            if cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            let deadline = Deadline::after(self.config.poll_slice);
            if let Some(n) = self
                .queue
                .receive_until(buf, &deadline)
                .map_err(|e| self.map_io("mq_timedreceive", len, e))?
            {
                return Ok(n);
            }
        }
    }

    fn pause(&self, total: Duration) -> Result<()> {
        let Some(cancel) = &self.cancel else {
            std::thread::sleep(total);
            return Ok(());
        };
        let deadline = Deadline::after(total);
        while !deadline.has_passed() {
            if cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            std::thread::sleep(deadline.remaining().min(self.config.poll_slice));
        }
        Ok(())
    }

    fn map_io(&self, op: &'static str, len: usize, err: io::Error) -> ChannelError {
        if err.raw_os_error() == Some(libc::EMSGSIZE) {
            return ChannelError::Protocol {
                expected: self.queue.message_size(),
                actual: len,
            };
        }
        ChannelError::Io { op, source: err }
    }
}

impl<Q: std::fmt::Debug, M> std::fmt::Debug for ProducerConsumerChannel<Q, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerConsumerChannel")
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Condvar, Mutex};
    use std::time::Instant;

    use super::*;

    /// In-process bounded queue with the same timeout semantics as mq_*.
    #[derive(Debug)]
    struct MemQueue {
        capacity: usize,
        size: usize,
        slots: Mutex<VecDeque<Vec<u8>>>,
        changed: Condvar,
    }

    impl MemQueue {
        fn new(capacity: usize, size: usize) -> Self {
            Self {
                capacity,
                size,
                slots: Mutex::new(VecDeque::new()),
                changed: Condvar::new(),
            }
        }

        fn push_raw(&self, msg: Vec<u8>) {
            self.slots.lock().unwrap().push_back(msg);
            self.changed.notify_all();
        }

        fn len(&self) -> usize {
            self.slots.lock().unwrap().len()
        }
    }

    impl QueueBackend for MemQueue {
        fn message_size(&self) -> usize {
            self.size
        }

        fn send_until(&self, msg: &[u8], deadline: &Deadline) -> io::Result<bool> {
            let mut slots = self.slots.lock().unwrap();
            while slots.len() >= self.capacity {
                let left = deadline.remaining();
                if left.is_zero() {
                    return Ok(false);
                }
                slots = self.changed.wait_timeout(slots, left).unwrap().0;
            }
            slots.push_back(msg.to_vec());
            self.changed.notify_all();
            Ok(true)
        }

        fn send_blocking(&self, msg: &[u8]) -> io::Result<()> {
            let mut slots = self.slots.lock().unwrap();
            while slots.len() >= self.capacity {
                slots = self.changed.wait(slots).unwrap();
            }
            slots.push_back(msg.to_vec());
            self.changed.notify_all();
            Ok(())
        }

        fn receive_until(&self, buf: &mut [u8], deadline: &Deadline) -> io::Result<Option<usize>> {
            let mut slots = self.slots.lock().unwrap();
            loop {
                if let Some(msg) = slots.pop_front() {
                    buf[..msg.len()].copy_from_slice(&msg);
                    self.changed.notify_all();
                    return Ok(Some(msg.len()));
                }
                let left = deadline.remaining();
                if left.is_zero() {
                    return Ok(None);
                }
                slots = self.changed.wait_timeout(slots, left).unwrap().0;
            }
        }

        fn receive_blocking(&self, buf: &mut [u8]) -> io::Result<usize> {
            let mut slots = self.slots.lock().unwrap();
            loop {
                if let Some(msg) = slots.pop_front() {
                    buf[..msg.len()].copy_from_slice(&msg);
                    self.changed.notify_all();
                    return Ok(msg.len());
                }
                slots = self.changed.wait(slots).unwrap();
            }
        }
    }

    fn fast() -> ChannelConfig {
        ChannelConfig {
            send_deadline: Duration::from_millis(50),
            receive_backoff: Duration::from_millis(30),
            poll_slice: Duration::from_millis(10),
        }
    }

    #[test]
    fn defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.send_deadline, Duration::from_secs(1));
        assert_eq!(config.receive_backoff, Duration::from_millis(500));
        assert_eq!(config.poll_slice, Duration::from_millis(200));
    }

    #[test]
    fn rejects_queue_with_other_message_size() {
        let queue = MemQueue::new(8, 8);
        let err = ProducerConsumerChannel::<_, i32>::new(&queue, fast()).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol {
                expected: 4,
                actual: 8
            }
        ));
    }

    #[test]
    fn bounded_tier_when_room_and_data() {
        let queue = MemQueue::new(8, 4);
        let chan = ProducerConsumerChannel::<_, i32>::new(&queue, fast()).unwrap();
        assert_eq!(chan.send(&41).unwrap(), Delivery::Bounded);
        assert_eq!(chan.send(&42).unwrap(), Delivery::Bounded);
        assert_eq!(chan.receive().unwrap(), (41, Delivery::Bounded));
        assert_eq!(chan.receive().unwrap(), (42, Delivery::Bounded));
    }

    #[test]
    fn full_queue_falls_back_instead_of_failing() {
        let queue = MemQueue::new(1, 4);
        let chan = ProducerConsumerChannel::<_, i32>::new(&queue, fast()).unwrap();
        chan.send(&1).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(150));
                let mut buf = [0u8; 4];
                queue.receive_blocking(&mut buf).unwrap();
            });
            let start = Instant::now();
            assert_eq!(chan.send(&2).unwrap(), Delivery::Fallback);
            assert!(start.elapsed() >= Duration::from_millis(140));
        });
        assert_eq!(queue.len(), 1);
        assert_eq!(chan.receive().unwrap(), (2, Delivery::Bounded));
    }

    #[test]
    fn empty_queue_backs_off_then_blocks() {
        let queue = MemQueue::new(8, 4);
        let chan = ProducerConsumerChannel::<_, i32>::new(&queue, fast()).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(200));
                queue.push_raw(7i32.to_ne_bytes().to_vec());
            });
            let start = Instant::now();
            assert_eq!(chan.receive().unwrap(), (7, Delivery::Fallback));
            assert!(start.elapsed() >= Duration::from_millis(190));
        });
    }

    #[test]
    fn message_arriving_during_backoff_is_a_fallback_delivery() {
        let queue = MemQueue::new(8, 4);
        let config = ChannelConfig {
            receive_backoff: Duration::from_millis(200),
            ..fast()
        };
        let chan = ProducerConsumerChannel::<_, i32>::new(&queue, config).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(100));
                queue.push_raw(9i32.to_ne_bytes().to_vec());
            });
            let start = Instant::now();
            assert_eq!(chan.receive().unwrap(), (9, Delivery::Fallback));
            assert!(start.elapsed() >= Duration::from_millis(240));
        });
    }

    #[test]
    fn wrong_size_is_fatal_both_ways() {
        let queue = MemQueue::new(8, 4);
        let chan = ProducerConsumerChannel::<_, i32>::new(&queue, fast()).unwrap();
        assert!(matches!(
            chan.send_bytes(&[1, 2]),
            Err(ChannelError::Protocol { actual: 2, .. })
        ));
        assert_eq!(queue.len(), 0);

        queue.push_raw(vec![1, 2, 3]);
        assert!(matches!(
            chan.receive(),
            Err(ChannelError::Protocol {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn cancellation_ends_blocking_tiers() {
        let queue = MemQueue::new(1, 4);
        let token = CancelToken::new();
        token.cancel();
        let chan = ProducerConsumerChannel::<_, i32>::new(&queue, fast())
            .unwrap()
            .with_cancel(token);

        assert!(matches!(chan.receive(), Err(ChannelError::Cancelled)));
        chan.send(&1).unwrap();
        assert!(matches!(chan.send(&2), Err(ChannelError::Cancelled)));
    }

    #[test]
    fn cancel_while_blocked_returns_promptly() {
        let queue = MemQueue::new(8, 4);
        let token = CancelToken::new();
        let chan = ProducerConsumerChannel::<_, i32>::new(&queue, fast())
            .unwrap()
            .with_cancel(token.clone());

        let start = Instant::now();
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(200));
                token.cancel();
            });
            assert!(matches!(chan.receive(), Err(ChannelError::Cancelled)));
        });
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[cfg(target_os = "linux")]
    mod posix {
        use std::sync::atomic::{AtomicUsize, Ordering};

        use namedipc_resource::{
            unlink_resource, MessageQueue, QueueAttrs, ResourceKind, ResourceName,
        };

        use super::*;

        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        fn unique_name(tag: &str) -> ResourceName {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            ResourceName::new(format!("/namedipc-chan-{tag}-{}-{n}", std::process::id()))
                .unwrap()
        }

        #[test]
        fn prefilled_queue_send_returns_after_fallback() {
            let name = unique_name("prefill");
            let attrs = QueueAttrs::fixed(2, 4);
            let producer =
                ResourceHandle::<MessageQueue>::open_or_create(&name, &attrs).unwrap();
            let consumer =
                ResourceHandle::<MessageQueue>::open_or_create(&name, &attrs).unwrap();
            let tx = ProducerConsumerChannel::<_, i32>::new(producer, ChannelConfig::default())
                .unwrap();
            let rx = ProducerConsumerChannel::<_, i32>::new(consumer, ChannelConfig::default())
                .unwrap();
            tx.send(&1).unwrap();
            tx.send(&2).unwrap();

            std::thread::scope(|s| {
                s.spawn(|| {
                    std::thread::sleep(Duration::from_millis(1200));
                    assert_eq!(rx.receive().unwrap(), (1, Delivery::Bounded));
                });
                let start = Instant::now();
                assert_eq!(tx.send(&3).unwrap(), Delivery::Fallback);
                assert!(start.elapsed() >= Duration::from_millis(1000));
            });

            assert_eq!(rx.receive().unwrap().0, 2);
            assert_eq!(rx.receive().unwrap().0, 3);
            let _ = unlink_resource(ResourceKind::MessageQueue, &name);
        }

        #[test]
        fn queue_of_other_width_is_rejected() {
            let name = unique_name("width");
            let queue =
                ResourceHandle::<MessageQueue>::open_or_create(&name, &QueueAttrs::fixed(2, 8))
                    .unwrap();
            assert!(matches!(
                ProducerConsumerChannel::<_, i32>::new(queue, fast()),
                Err(ChannelError::Protocol { actual: 8, .. })
            ));
            let _ = unlink_resource(ResourceKind::MessageQueue, &name);
        }
    }
}
