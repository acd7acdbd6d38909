use chrono::{DateTime, Utc};

/// Lifecycle state of the managed speech-engine runtime.
///
/// Exactly one value holds at any instant; only the supervisor's own
/// operations mutate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    NotInstalled,
    Installing,
    Installed,
    Starting,
    Running,
    Unhealthy,
    Stopped,
    Failed,
}

impl RuntimeStatus {
    /// Terminal until a new `start` or `reinstall` call is made.
    pub fn is_terminal(self) -> bool {
        matches!(self, RuntimeStatus::Stopped | RuntimeStatus::Failed)
    }
}

/// Outcome of a single health probe. Never persisted; consumed by the
/// supervisor's wait loop and by UI-initiated one-shot checks.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthResult {
    pub is_healthy: bool,
    pub status_code: Option<u16>,
    pub message: Option<String>,
    /// True only when the responder also proved it is the expected speech
    /// service, not just something listening on the port.
    pub is_service_confirmed: bool,
}

impl HealthResult {
    pub fn confirmed() -> Self {
        Self {
            is_healthy: true,
            status_code: Some(200),
            message: None,
            is_service_confirmed: true,
        }
    }

    pub fn unhealthy(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            status_code,
            message: Some(message.into()),
            is_service_confirmed: false,
        }
    }
}

/// Read-only view of the supervisor state, safe to hand to UI layers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeSnapshot {
    pub status: RuntimeStatus,
    pub pid: Option<u32>,
    pub installed_version: Option<String>,
    pub restart_attempts: u32,
    pub last_error: Option<String>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub started_at_unix_ms: Option<u64>,
}
