use std::time::Duration;

/// Engine tunables. The binary fills these from flags and `FORGEPLANE_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Concurrent reconciles per kind.
    pub workers: usize,
    /// Requeue delay after a successful cycle.
    pub poll_interval: Duration,
    /// Upper bound on one cycle.
    pub deadline: Duration,
    pub backoff_base: Duration,
    pub backoff_ceiling: Duration,
    /// How long in-flight cycles may run after a shutdown signal.
    pub shutdown_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(600),
            deadline: Duration::from_secs(120),
            backoff_base: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}
