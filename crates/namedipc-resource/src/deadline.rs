use std::time::{Duration, Instant};

/// An absolute point in time for the `*_timed*` POSIX calls.
///
/// POSIX message queue and semaphore timeouts are absolute `CLOCK_REALTIME`
/// timestamps. The monotonic instant is kept alongside so callers can ask how
/// much of the wait is left without touching the wall clock again.
#[derive(Clone, Copy)]
pub struct Deadline {
    realtime: libc::timespec,
    instant: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        // SAFETY: timespec is plain old data; all-zero is a valid value.
        let mut realtime: libc::timespec = unsafe { std::mem::zeroed() };
        // SAFETY: `realtime` is a valid, writable timespec; CLOCK_REALTIME always exists.
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut realtime) };

        let nanos = realtime.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
        realtime.tv_sec +=
            timeout.as_secs() as libc::time_t + (nanos / 1_000_000_000) as libc::time_t;
        realtime.tv_nsec = (nanos % 1_000_000_000) as _;

        Self {
            realtime,
            instant: Instant::now() + timeout,
        }
    }

    pub fn as_timespec(&self) -> &libc::timespec {
        &self.realtime
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.instant.saturating_duration_since(Instant::now())
    }

    pub fn has_passed(&self) -> bool {
        Instant::now() >= self.instant
    }
}

impl std::fmt::Debug for Deadline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deadline")
            .field("tv_sec", &self.realtime.tv_sec)
            .field("tv_nsec", &self.realtime.tv_nsec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nanoseconds_stay_normalised() {
        for ms in [0u64, 1, 999, 1000, 1500, 2999] {
            let deadline = Deadline::after(Duration::from_millis(ms));
            let ts = deadline.as_timespec();
            assert!(ts.tv_nsec >= 0 && ts.tv_nsec < 1_000_000_000);
        }
    }

    #[test]
    fn remaining_shrinks_to_zero() {
        let deadline = Deadline::after(Duration::from_millis(20));
        assert!(deadline.remaining() <= Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(30));
        assert!(deadline.has_passed());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
