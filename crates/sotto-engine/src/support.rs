use std::time::Duration;

const DEFAULT_START_TIMEOUT_SEC: u64 = 20;
const DEFAULT_HEALTH_POLL_MS: u64 = 300;
const DEFAULT_KILL_GRACE_SEC: u64 = 5;

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

pub(crate) fn start_timeout() -> Duration {
    Duration::from_secs(
        env_u64("SOTTO_START_TIMEOUT_SEC")
            .map(|v| v.clamp(1, 120))
            .unwrap_or(DEFAULT_START_TIMEOUT_SEC),
    )
}

pub(crate) fn health_poll_interval() -> Duration {
    Duration::from_millis(
        env_u64("SOTTO_HEALTH_POLL_MS")
            .map(|v| v.clamp(50, 5000))
            .unwrap_or(DEFAULT_HEALTH_POLL_MS),
    )
}

pub(crate) fn kill_grace() -> Duration {
    Duration::from_secs(
        env_u64("SOTTO_KILL_GRACE_SEC")
            .map(|v| v.clamp(1, 60))
            .unwrap_or(DEFAULT_KILL_GRACE_SEC),
    )
}

/// Timing knobs for the supervisor. Production code takes the environment
/// defaults via [`Tunables::from_env`]; tests construct their own values.
#[derive(Clone, Copy, Debug)]
pub struct Tunables {
    /// How long `start` waits for the service to pass health checks.
    pub start_timeout: Duration,
    /// Sleep between health probes while waiting.
    pub health_poll_interval: Duration,
    /// How long a stopped process may linger before SIGKILL escalation.
    pub kill_grace: Duration,
}

impl Tunables {
    pub fn from_env() -> Self {
        Self {
            start_timeout: start_timeout(),
            health_poll_interval: health_poll_interval(),
            kill_grace: kill_grace(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        // These env vars stay unset in the test environment, so the
        // defaults must hold.
        let t = Tunables::from_env();
        assert_eq!(t.start_timeout, Duration::from_secs(20));
        assert_eq!(t.health_poll_interval, Duration::from_millis(300));
        assert_eq!(t.kill_grace, Duration::from_secs(5));
    }

    #[test]
    fn env_u64_rejects_garbage() {
        assert_eq!(env_u64("SOTTO_UNSET_FOR_TESTS"), None);
    }
}
