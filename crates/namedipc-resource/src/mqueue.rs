use std::io;

use crate::deadline::Deadline;
use crate::handle::{NamedResource, ResourceKind};
use crate::name::ResourceName;

/// Creation attributes for a message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAttrs {
    /// Queue depth: unread messages the kernel holds before senders block.
    pub max_messages: usize,
    /// Size of every message in bytes.
    pub message_size: usize,
    /// Permission bits of the created object.
    pub mode: libc::mode_t,
}

impl QueueAttrs {
    /// A queue carrying fixed `message_size`-byte records.
    pub fn fixed(max_messages: usize, message_size: usize) -> Self {
        Self {
            max_messages,
            message_size,
            mode: 0o660,
        }
    }
}

impl Default for QueueAttrs {
    fn default() -> Self {
        Self::fixed(8, std::mem::size_of::<i32>())
    }
}

/// Snapshot of `mq_getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub max_messages: usize,
    pub message_size: usize,
    /// Messages currently waiting in the queue.
    pub pending: usize,
}

/// A POSIX message queue descriptor (`mq_open`).
pub struct MessageQueue {
    mqd: libc::mqd_t,
    name: String,
    message_size: usize,
}

// SAFETY: message queue descriptors are process-wide and the mq_* calls are
// thread-safe.
unsafe impl Send for MessageQueue {}
unsafe impl Sync for MessageQueue {}

impl NamedResource for MessageQueue {
    type Attrs = QueueAttrs;
    const KIND: ResourceKind = ResourceKind::MessageQueue;

    fn open(name: &ResourceName, _attrs: &QueueAttrs) -> io::Result<Self> {
        // SAFETY: valid NUL-terminated name; no varargs are read without O_CREAT.
        let mqd = unsafe { libc::mq_open(name.as_c_str().as_ptr(), libc::O_RDWR) };
        Self::from_raw(mqd, name)
    }

    fn create(name: &ResourceName, attrs: &QueueAttrs) -> io::Result<Self> {
        // SAFETY: mq_attr is plain old data (it carries private padding).
        let mut mqa: libc::mq_attr = unsafe { std::mem::zeroed() };
        mqa.mq_maxmsg = attrs.max_messages as _;
        mqa.mq_msgsize = attrs.message_size as _;

        // SAFETY: with O_CREAT mq_open reads a mode (promoted to c_uint) and
        // a pointer to an mq_attr that outlives the call.
        let mqd = unsafe {
            libc::mq_open(
                name.as_c_str().as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                attrs.mode as libc::c_uint,
                &mqa as *const libc::mq_attr,
            )
        };
        Self::from_raw(mqd, name)
    }

    fn unlink(name: &ResourceName) -> io::Result<()> {
        unlink(name)
    }
}

impl MessageQueue {
    fn from_raw(mqd: libc::mqd_t, name: &ResourceName) -> io::Result<Self> {
        if mqd == -1 {
            return Err(io::Error::last_os_error());
        }
        let mut queue = Self {
            mqd,
            name: name.as_str().to_string(),
            message_size: 0,
        };
        // The creator's attributes win; read back what the kernel holds.
        queue.message_size = queue.status()?.message_size;
        Ok(queue)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Message size the queue was created with.
    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// Current queue attributes and depth.
    pub fn status(&self) -> io::Result<QueueStatus> {
        // SAFETY: mq_attr is plain old data.
        let mut mqa: libc::mq_attr = unsafe { std::mem::zeroed() };
        // SAFETY: `self.mqd` is open and `mqa` is a valid out-pointer.
        if unsafe { libc::mq_getattr(self.mqd, &mut mqa) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(QueueStatus {
            max_messages: mqa.mq_maxmsg as usize,
            message_size: mqa.mq_msgsize as usize,
            pending: mqa.mq_curmsgs as usize,
        })
    }

    /// Enqueue `msg`, waiting at most until `deadline` for room.
    /// `Ok(false)` means the queue stayed full.
    pub fn send_until(&self, msg: &[u8], deadline: &Deadline) -> io::Result<bool> {
        loop {
            // SAFETY: `msg` is valid for `msg.len()` bytes; the timespec
            // outlives the call.
            let rc = unsafe {
                libc::mq_timedsend(
                    self.mqd,
                    msg.as_ptr().cast::<libc::c_char>(),
                    msg.len(),
                    0,
                    deadline.as_timespec(),
                )
            };
            if rc == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Enqueue `msg`, blocking until there is room.
    pub fn send(&self, msg: &[u8]) -> io::Result<()> {
        loop {
            // SAFETY: see `send_until`.
            let rc = unsafe {
                libc::mq_send(
                    self.mqd,
                    msg.as_ptr().cast::<libc::c_char>(),
                    msg.len(),
                    0,
                )
            };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    /// Dequeue into `buf`, waiting at most until `deadline`.
    /// `Ok(None)` means the queue stayed empty.
    pub fn receive_until(&self, buf: &mut [u8], deadline: &Deadline) -> io::Result<Option<usize>> {
        loop {
            // SAFETY: `buf` is writable for `buf.len()` bytes; priority is not
            // requested.
            let n = unsafe {
                libc::mq_timedreceive(
                    self.mqd,
                    buf.as_mut_ptr().cast::<libc::c_char>(),
                    buf.len(),
                    std::ptr::null_mut(),
                    deadline.as_timespec(),
                )
            };
            if n >= 0 {
                return Ok(Some(n as usize));
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(None),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Dequeue into `buf`, blocking until a message arrives.
    pub fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: see `receive_until`.
            let n = unsafe {
                libc::mq_receive(
                    self.mqd,
                    buf.as_mut_ptr().cast::<libc::c_char>(),
                    buf.len(),
                    std::ptr::null_mut(),
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        // SAFETY: closed exactly once.
        unsafe { libc::mq_close(self.mqd) };
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("name", &self.name)
            .field("message_size", &self.message_size)
            .finish()
    }
}

fn unlink(name: &ResourceName) -> io::Result<()> {
    // SAFETY: valid NUL-terminated name.
    if unsafe { libc::mq_unlink(name.as_c_str().as_ptr()) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::handle::{unlink_resource, ResourceHandle};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_name(tag: &str) -> ResourceName {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        ResourceName::new(format!("/namedipc-mq-{tag}-{}-{n}", std::process::id())).unwrap()
    }

    #[test]
    fn opener_inherits_creator_geometry() {
        let name = unique_name("geometry");
        let creator =
            ResourceHandle::<MessageQueue>::open_or_create(&name, &QueueAttrs::fixed(4, 8))
                .expect("create");
        assert!(creator.created());

        let peer = ResourceHandle::<MessageQueue>::open_or_create(&name, &QueueAttrs::default())
            .expect("open");
        assert!(!peer.created());
        assert_eq!(peer.message_size(), 8);
        assert_eq!(peer.status().unwrap().max_messages, 4);

        assert!(unlink_resource(ResourceKind::MessageQueue, &name).unwrap());
    }

    #[test]
    fn fifo_between_handles() {
        let name = unique_name("fifo");
        let attrs = QueueAttrs::default();
        let tx = ResourceHandle::<MessageQueue>::open_or_create(&name, &attrs).expect("create");
        let rx = ResourceHandle::<MessageQueue>::open_or_create(&name, &attrs).expect("open");

        for v in [1i32, 2, 3] {
            tx.send(&v.to_ne_bytes()).unwrap();
        }
        assert_eq!(rx.status().unwrap().pending, 3);

        let mut buf = [0u8; 4];
        for expected in [1i32, 2, 3] {
            assert_eq!(rx.receive(&mut buf).unwrap(), 4);
            assert_eq!(i32::from_ne_bytes(buf), expected);
        }
        let _ = unlink_resource(ResourceKind::MessageQueue, &name);
    }

    #[test]
    fn timed_calls_report_timeouts() {
        let name = unique_name("timeout");
        let queue = ResourceHandle::<MessageQueue>::open_or_create(&name, &QueueAttrs::fixed(1, 4))
            .expect("create");

        let mut buf = [0u8; 4];
        let start = Instant::now();
        let got = queue
            .receive_until(&mut buf, &Deadline::after(Duration::from_millis(100)))
            .unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_millis(90));

        assert!(queue
            .send_until(&7i32.to_ne_bytes(), &Deadline::after(Duration::from_millis(50)))
            .unwrap());
        assert!(!queue
            .send_until(&8i32.to_ne_bytes(), &Deadline::after(Duration::from_millis(50)))
            .unwrap());

        let _ = unlink_resource(ResourceKind::MessageQueue, &name);
    }

    #[test]
    fn oversized_message_is_rejected_by_kernel() {
        let name = unique_name("oversize");
        let queue = ResourceHandle::<MessageQueue>::open_or_create(&name, &QueueAttrs::default())
            .expect("create");
        let err = queue.send(&[0u8; 16]).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EMSGSIZE));
        let _ = unlink_resource(ResourceKind::MessageQueue, &name);
    }
}
