use std::time::Duration;

use clap::Args;
use namedipc_channel::ChannelConfig;
use namedipc_resource::ResourceName;
use namedipc_sync::{CancelToken, SectionConfig};

use crate::output::OutputFormat;

/// Names and timings shared by every subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub queue_name: ResourceName,
    pub mutex_name: ResourceName,
    pub counter_name: ResourceName,
    pub shm_name: ResourceName,
    pub queue_depth: usize,
    pub send_timeout: Duration,
    pub recv_backoff: Duration,
    pub poll_slice: Duration,
    /// Delay between ticks of a critical or non-critical stretch.
    pub tick: Duration,
    /// Pause taken every 100 increments of the shared counter.
    pub shm_pause: Duration,
}

pub const DEFAULT_QUEUE_NAME: &str = "/mq_example";
pub const DEFAULT_MUTEX_NAME: &str = "/sem_mutex";
pub const DEFAULT_COUNTER_NAME: &str = "/sem_counter";
pub const DEFAULT_SHM_NAME: &str = "/shm_example";

fn default_name(raw: &'static str) -> ResourceName {
    match ResourceName::new(raw) {
        Ok(name) => name,
        Err(err) => unreachable!("built-in name {raw} is invalid: {err}"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_name: default_name(DEFAULT_QUEUE_NAME),
            mutex_name: default_name(DEFAULT_MUTEX_NAME),
            counter_name: default_name(DEFAULT_COUNTER_NAME),
            shm_name: default_name(DEFAULT_SHM_NAME),
            queue_depth: 8,
            send_timeout: Duration::from_secs(1),
            recv_backoff: Duration::from_millis(500),
            poll_slice: Duration::from_millis(200),
            tick: Duration::from_millis(20),
            shm_pause: Duration::from_millis(250),
        }
    }
}

impl Config {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            send_deadline: self.send_timeout,
            receive_backoff: self.recv_backoff,
            poll_slice: self.poll_slice,
        }
    }

    pub fn section_config(&self) -> SectionConfig {
        SectionConfig {
            poll_slice: self.poll_slice,
        }
    }
}

/// Global flags (and their environment variables) that override [`Config`].
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Message queue name.
    #[arg(long, env = "NAMEDIPC_QUEUE_NAME", global = true, default_value = DEFAULT_QUEUE_NAME)]
    pub queue_name: ResourceName,

    /// Semaphore guarding the critical section.
    #[arg(long, env = "NAMEDIPC_MUTEX_NAME", global = true, default_value = DEFAULT_MUTEX_NAME)]
    pub mutex_name: ResourceName,

    /// Semaphore counting the processes of the semaphore program.
    #[arg(long, env = "NAMEDIPC_COUNTER_NAME", global = true, default_value = DEFAULT_COUNTER_NAME)]
    pub counter_name: ResourceName,

    /// Shared memory segment name.
    #[arg(long, env = "NAMEDIPC_SHM_NAME", global = true, default_value = DEFAULT_SHM_NAME)]
    pub shm_name: ResourceName,

    /// Messages the queue holds before senders block (used on creation only).
    #[arg(long, env = "NAMEDIPC_QUEUE_DEPTH", global = true, default_value_t = 8,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub queue_depth: u16,

    /// Bounded wait before send/receive fall back to blocking (e.g. 1s, 500ms).
    #[arg(long, env = "NAMEDIPC_SEND_TIMEOUT", global = true, default_value = "1s",
          value_parser = parse_duration)]
    pub send_timeout: Duration,

    /// Pause after an empty receive before blocking.
    #[arg(long, env = "NAMEDIPC_RECV_BACKOFF", global = true, default_value = "500ms",
          value_parser = parse_duration)]
    pub recv_backoff: Duration,

    /// How often blocked waits check for Ctrl-C.
    #[arg(long, env = "NAMEDIPC_POLL_SLICE", global = true, default_value = "200ms",
          value_parser = parse_duration)]
    pub poll_slice: Duration,

    /// Delay between ticks of the semaphore program's bars.
    #[arg(long, env = "NAMEDIPC_TICK", global = true, default_value = "20ms",
          value_parser = parse_duration)]
    pub tick: Duration,

    /// Pause of the shared memory program every 100 increments.
    #[arg(long, env = "NAMEDIPC_SHM_PAUSE", global = true, default_value = "250ms",
          value_parser = parse_duration)]
    pub shm_pause: Duration,
}

impl From<ConfigArgs> for Config {
    fn from(args: ConfigArgs) -> Self {
        Self {
            queue_name: args.queue_name,
            mutex_name: args.mutex_name,
            counter_name: args.counter_name,
            shm_name: args.shm_name,
            queue_depth: usize::from(args.queue_depth),
            send_timeout: args.send_timeout,
            recv_backoff: args.recv_backoff,
            poll_slice: args.poll_slice,
            tick: args.tick,
            shm_pause: args.shm_pause,
        }
    }
}

/// Everything a subcommand needs, passed explicitly.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: Config,
    pub cancel: CancelToken,
    pub format: OutputFormat,
}

/// Parse `500ms`, `1s`, `2m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = input.strip_suffix('m') {
        (num, "m")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {input}"))?;

    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        _ => Err(format!("unsupported duration unit: {unit}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn defaults_match_library_defaults() {
        let config = Config::default();
        assert_eq!(config.queue_name.as_str(), "/mq_example");
        assert_eq!(config.mutex_name.as_str(), "/sem_mutex");
        assert_eq!(config.counter_name.as_str(), "/sem_counter");
        assert_eq!(config.shm_name.as_str(), "/shm_example");
        assert_eq!(config.queue_depth, 8);
        assert_eq!(config.channel_config(), ChannelConfig::default());
        assert_eq!(config.section_config(), SectionConfig::default());
    }
}
