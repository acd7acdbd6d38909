use std::path::{Path, PathBuf};

/// Console script installed into the venv by the service package.
pub const SERVICE_BIN_NAME: &str = "kokoro";

/// Filesystem layout of the managed runtime, derived from a single base
/// directory. Pure: every accessor recomputes from the base path, nothing
/// is cached or mutated.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    base: PathBuf,
}

impl RuntimePaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Base directory from `SOTTO_DATA_ROOT`, made absolute against the
    /// current directory when relative.
    pub fn from_env() -> Self {
        let raw = std::env::var("SOTTO_DATA_ROOT").unwrap_or_else(|_| "./data".to_string());
        let p = PathBuf::from(raw);
        let abs = if p.is_absolute() {
            p
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(p)
        };

        // Best-effort canonicalization: don't fail if the directory doesn't exist yet.
        Self::new(std::fs::canonicalize(&abs).unwrap_or(abs))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.base.join("venv")
    }

    #[cfg(unix)]
    fn venv_bin_dir(&self) -> PathBuf {
        self.venv_dir().join("bin")
    }

    #[cfg(windows)]
    fn venv_bin_dir(&self) -> PathBuf {
        self.venv_dir().join("Scripts")
    }

    #[cfg(unix)]
    pub fn python_bin(&self) -> PathBuf {
        self.venv_bin_dir().join("python")
    }

    #[cfg(windows)]
    pub fn python_bin(&self) -> PathBuf {
        self.venv_bin_dir().join("python.exe")
    }

    #[cfg(unix)]
    pub fn service_bin(&self) -> PathBuf {
        self.venv_bin_dir().join(SERVICE_BIN_NAME)
    }

    #[cfg(windows)]
    pub fn service_bin(&self) -> PathBuf {
        self.venv_bin_dir().join(format!("{SERVICE_BIN_NAME}.exe"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join("server.log")
    }

    /// Both the interpreter and the service console script must be present
    /// for the runtime to count as installed. Version compatibility is
    /// checked separately by the installer.
    pub fn is_installed(&self) -> bool {
        self.python_bin().exists() && self.service_bin().exists()
    }
}
