use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use sotto_runtime::RuntimeStatus;
use tokio::process::Command;

use crate::{
    error::{EngineError, Result},
    paths::RuntimePaths,
    supervisor::Supervisor,
};

/// Minimum interpreter the service package supports.
const PYTHON_MIN: (u32, u32) = (3, 10);

/// Version specifier handed to `uv venv --python`.
const PYTHON_SPEC: &str = "3.10";

/// Package installed into the venv; provides the `kokoro` console script.
const PACKAGE: &str = "kokoro-fastapi";

#[cfg(unix)]
const UV_BIN_NAME: &str = "uv";
#[cfg(windows)]
const UV_BIN_NAME: &str = "uv.exe";

const VERSION_PROBE: &str =
    "import sys; print(f\"{sys.version_info.major}.{sys.version_info.minor}\")";

/// Locate `uv`: PATH first, then the usual install locations for users whose
/// GUI session doesn't inherit a shell PATH.
pub(crate) fn find_uv() -> Option<PathBuf> {
    if let Ok(path) = which::which(UV_BIN_NAME) {
        return Some(path);
    }
    for dir in fallback_dirs() {
        let candidate = dir.join(UV_BIN_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn fallback_dirs() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = dirs::home_dir() {
        out.push(home.join(".local/bin"));
        out.push(home.join(".cargo/bin"));
    }
    out.push(PathBuf::from("/opt/homebrew/bin"));
    out.push(PathBuf::from("/usr/local/bin"));
    out
}

/// First two dot-separated numbers of the interpreter's version report.
pub(crate) fn parse_major_minor(raw: &str) -> Option<(u32, u32)> {
    let first = raw.trim().lines().next()?.trim();
    let mut it = first.split('.');
    let major = it.next()?.trim().parse().ok()?;
    let minor = it.next()?.trim().parse().ok()?;
    Some((major, minor))
}

pub(crate) fn meets_minimum(version: (u32, u32)) -> bool {
    version.0 > PYTHON_MIN.0 || (version.0 == PYTHON_MIN.0 && version.1 >= PYTHON_MIN.1)
}

fn combined_output(out: &std::process::Output) -> String {
    let mut s = String::from_utf8_lossy(&out.stdout).into_owned();
    let err = String::from_utf8_lossy(&out.stderr);
    if !err.is_empty() {
        if !s.is_empty() && !s.ends_with('\n') {
            s.push('\n');
        }
        s.push_str(&err);
    }
    s.trim().to_string()
}

/// Run one install step to completion, capturing combined output. Non-zero
/// exit or a failed spawn both surface as `InstallFailed` naming the step.
async fn run_step<I, S>(program: &Path, args: I, step: &'static str) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let out = Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|err| EngineError::InstallFailed {
            step,
            output: err.to_string(),
        })?;

    let output = combined_output(&out);
    if !out.status.success() {
        return Err(EngineError::InstallFailed { step, output });
    }
    Ok(output)
}

async fn python_version(python: &Path) -> Result<(u32, u32)> {
    let raw = run_step(python, ["-c", VERSION_PROBE], "verify python version").await?;
    parse_major_minor(&raw).ok_or(EngineError::InstallFailed {
        step: "verify python version",
        output: raw,
    })
}

/// Remove a pre-existing venv before recreating it. A failure here leaves
/// the directory intact; no partial overwrite is attempted.
pub(crate) async fn remove_existing_venv(paths: &RuntimePaths) -> Result<()> {
    let venv = paths.venv_dir();
    if !venv.exists() {
        return Ok(());
    }
    tokio::fs::remove_dir_all(&venv)
        .await
        .map_err(|err| EngineError::InstallFailed {
            step: "remove incompatible venv",
            output: err.to_string(),
        })
}

async fn query_package_version(python: &Path) -> Option<String> {
    let probe = format!("from importlib.metadata import version; print(version('{PACKAGE}'))");
    run_step(python, ["-c", probe.as_str()], "query package version")
        .await
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Supervisor {
    /// Keep a compatible existing environment as-is. Anything else,
    /// including a present-but-incompatible venv, becomes a full reinstall.
    pub async fn install_if_needed(&self) -> Result<()> {
        if self.paths().is_installed() {
            match python_version(&self.paths().python_bin()).await {
                Ok(version) if meets_minimum(version) => {
                    let pkg = query_package_version(&self.paths().python_bin()).await;
                    let mut inner = self.state().lock().await;
                    inner.installed_version = pkg;
                    inner.status = RuntimeStatus::Installed;
                    return Ok(());
                }
                Ok(version) => {
                    tracing::warn!(
                        found = %format!("{}.{}", version.0, version.1),
                        required = PYTHON_SPEC,
                        "existing venv interpreter too old, reinstalling"
                    );
                }
                Err(err) => {
                    tracing::warn!(error = %err, "existing venv failed version probe, reinstalling");
                }
            }
        }
        self.reinstall().await
    }

    /// Tear down and rebuild the isolated environment, then install or
    /// upgrade the service package inside it.
    pub async fn reinstall(&self) -> Result<()> {
        {
            let mut inner = self.state().lock().await;
            inner.status = RuntimeStatus::Installing;
            inner.last_error = None;
        }

        match self.reinstall_steps().await {
            Ok(()) => {
                self.state().lock().await.status = RuntimeStatus::Installed;
                tracing::info!(venv = %self.paths().venv_dir().display(), "speech engine installed");
                Ok(())
            }
            Err(err) => {
                self.fail(&err).await;
                Err(err)
            }
        }
    }

    async fn reinstall_steps(&self) -> Result<()> {
        let uv = find_uv().ok_or(EngineError::ToolMissing)?;
        let venv = self.paths().venv_dir();

        remove_existing_venv(self.paths()).await?;

        if let Some(parent) = venv.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| EngineError::InstallFailed {
                    step: "create venv",
                    output: err.to_string(),
                })?;
        }
        run_step(
            &uv,
            [
                OsStr::new("venv"),
                venv.as_os_str(),
                OsStr::new("--python"),
                OsStr::new(PYTHON_SPEC),
            ],
            "create venv",
        )
        .await?;

        // uv may silently fall back to whatever interpreter it can find;
        // trust nothing until the venv's python reports an acceptable version.
        let python = self.paths().python_bin();
        let version = python_version(&python).await?;
        if !meets_minimum(version) {
            return Err(EngineError::InstallFailed {
                step: "verify python version",
                output: format!(
                    "venv python is {}.{}, need at least {}.{}",
                    version.0, version.1, PYTHON_MIN.0, PYTHON_MIN.1
                ),
            });
        }

        run_step(
            &uv,
            [
                OsStr::new("pip"),
                OsStr::new("install"),
                OsStr::new("--python"),
                python.as_os_str(),
                OsStr::new("--upgrade"),
                OsStr::new(PACKAGE),
            ],
            "install kokoro-fastapi",
        )
        .await?;

        // Best effort: a failed introspection records "unknown", not an error.
        let pkg = query_package_version(&python).await;
        self.state().lock().await.installed_version = pkg;

        Ok(())
    }
}
