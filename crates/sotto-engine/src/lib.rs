//! Managed runtime for sotto's locally hosted speech-synthesis service.
//!
//! Installs an isolated Python environment holding the Kokoro service,
//! launches it as a supervised subprocess, verifies it is actually the
//! expected service (not just something on the port), and recovers from
//! crashes with a bounded, backed-off restart policy. UI layers observe
//! through [`Supervisor::snapshot`] and [`Supervisor::tail_logs`]; nothing
//! in here depends on how they render it.

pub mod error;
mod health;
mod installer;
mod logbuf;
pub mod paths;
pub mod supervisor;
mod support;

#[cfg(test)]
mod testutil;

pub use error::{EngineError, Result};
pub use logbuf::LogBuffer;
pub use paths::RuntimePaths;
pub use sotto_runtime::{HealthResult, RuntimeSnapshot, RuntimeStatus};
pub use supervisor::{
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_VOICE, ServerLaunchConfig, Supervisor,
};
pub use support::Tunables;
