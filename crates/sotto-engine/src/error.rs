use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures surfaced by the installer and supervisor.
///
/// Every variant is mirrored into the supervisor's observable `last_error`
/// before being returned; nothing is swallowed. The one non-error is an
/// intentional stop, which is ordinary termination and never lands here.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `uv` was not found on PATH or in any of the known install locations.
    #[error("uv not found in PATH or known install locations (install from https://astral.sh/uv)")]
    ToolMissing,

    /// The service carries no authentication, so only loopback hosts are accepted.
    #[error("refusing non-loopback host {0:?}; use 127.0.0.1, localhost, or ::1")]
    InvalidHost(String),

    #[error("install failed at step \"{step}\"{}", fmt_output(.output))]
    InstallFailed { step: &'static str, output: String },

    #[error("speech engine runtime is not installed")]
    RuntimeNotInstalled,

    #[error("failed to start speech service: {0}")]
    StartupFailed(String),

    #[error("speech service did not become healthy before the startup timeout")]
    StartTimedOut,

    #[error("health check failed: {0}")]
    HealthCheckFailed(String),
}

fn fmt_output(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(": {output}")
    }
}
