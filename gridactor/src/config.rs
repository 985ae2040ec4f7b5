//! Runtime tunables.

use std::time::Duration;

/// Tunables for one runtime instance.
///
/// Defaults match the production values; tests shrink the intervals with
/// the `with_*` setters.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Idle time after which a non-daemon actor asks to be hibernated.
    pub idle_expiry: Duration,

    /// Interval of the per-actor idle check.
    pub tick_interval: Duration,

    /// Longest time an actor may stay hibernated before it is terminated.
    pub max_sleep: Duration,

    /// Interval of the supervisor's hibernation sweep.
    pub sleep_sweep_interval: Duration,

    /// TTL of the node liveness lease. The lease is refreshed at half this.
    pub node_lease_ttl: Duration,

    /// Default deadline for `call`, local or remote.
    pub call_timeout: Duration,

    /// Interval of the pending-RPC timeout sweep.
    pub rpc_sweep_interval: Duration,

    /// Poll interval of `stop()` while waiting for actors to drain.
    pub shutdown_poll_interval: Duration,

    /// Fixed backoff before retrying a failed watch, keepalive or pool task.
    pub retry_backoff: Duration,

    /// Deadline for opening a node-to-node stream.
    pub connect_timeout: Duration,

    /// Bounded capacity of each actor mailbox.
    pub mailbox_capacity: usize,

    /// Worker pool size.
    pub worker_count: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_expiry: Duration::from_secs(600),
            tick_interval: Duration::from_secs(60),
            max_sleep: Duration::from_secs(30),
            sleep_sweep_interval: Duration::from_secs(10),
            node_lease_ttl: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            rpc_sweep_interval: Duration::from_secs(1),
            shutdown_poll_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            mailbox_capacity: 128,
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl RuntimeConfig {
    /// Override the idle expiry and the idle check interval.
    pub fn with_idle(mut self, tick_interval: Duration, idle_expiry: Duration) -> Self {
        self.tick_interval = tick_interval;
        self.idle_expiry = idle_expiry;
        self
    }

    /// Override the hibernation ceiling and sweep interval.
    pub fn with_sleep(mut self, sweep_interval: Duration, max_sleep: Duration) -> Self {
        self.sleep_sweep_interval = sweep_interval;
        self.max_sleep = max_sleep;
        self
    }

    /// Override the default call timeout and the RPC sweep interval.
    pub fn with_call_timeout(mut self, call_timeout: Duration, sweep_interval: Duration) -> Self {
        self.call_timeout = call_timeout;
        self.rpc_sweep_interval = sweep_interval;
        self
    }

    /// Override the node lease TTL.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.node_lease_ttl = ttl;
        self
    }

    /// Override the retry backoff and the shutdown poll interval.
    pub fn with_retry(mut self, backoff: Duration, shutdown_poll: Duration) -> Self {
        self.retry_backoff = backoff;
        self.shutdown_poll_interval = shutdown_poll;
        self
    }

    /// Override the worker pool size.
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    /// Interval at which the node record is refreshed under its lease.
    pub(crate) fn lease_refresh_interval(&self) -> Duration {
        self.node_lease_ttl / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.idle_expiry, Duration::from_secs(600));
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.max_sleep, Duration::from_secs(30));
        assert_eq!(config.sleep_sweep_interval, Duration::from_secs(10));
        assert_eq!(config.node_lease_ttl, Duration::from_secs(5));
        assert_eq!(config.rpc_sweep_interval, Duration::from_secs(1));
        assert_eq!(config.mailbox_capacity, 128);
        assert!(config.worker_count >= 1);
    }

    #[test]
    fn test_overrides() {
        let config = RuntimeConfig::default()
            .with_call_timeout(Duration::from_millis(200), Duration::from_millis(50))
            .with_lease_ttl(Duration::from_secs(2))
            .with_workers(0);
        assert_eq!(config.call_timeout, Duration::from_millis(200));
        assert_eq!(config.rpc_sweep_interval, Duration::from_millis(50));
        assert_eq!(config.lease_refresh_interval(), Duration::from_secs(1));
        assert_eq!(config.worker_count, 1);
    }
}
