use std::{process::Stdio, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sotto_runtime::{HealthResult, RuntimeSnapshot, RuntimeStatus};
use tokio::{
    process::{Child, Command},
    sync::{Mutex, mpsc},
};

use crate::{
    error::{EngineError, Result},
    health,
    logbuf::{self, CHUNK_CHANNEL_CAPACITY, LogBuffer, LogSink},
    paths::RuntimePaths,
    support::Tunables,
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_VOICE: &str = "af_heart";

/// The service carries no authentication, so only these hosts are accepted.
const LOOPBACK_HOSTS: [&str; 3] = ["127.0.0.1", "localhost", "::1"];

/// Fixed backoff schedule for automatic restarts, indexed by the attempt
/// counter before it is incremented.
const RESTART_DELAYS_SEC: [u64; 5] = [1, 2, 5, 5, 5];

pub(crate) const MAX_RESTART_ATTEMPTS: u32 = 5;

fn is_loopback_host(host: &str) -> bool {
    LOOPBACK_HOSTS.iter().any(|h| host.eq_ignore_ascii_case(h))
}

fn normalize_voice(voice: &str) -> String {
    let voice = voice.trim();
    if voice.is_empty() {
        DEFAULT_VOICE.to_string()
    } else {
        voice.to_string()
    }
}

fn restart_delay(attempts: u32) -> Duration {
    Duration::from_secs(RESTART_DELAYS_SEC[attempts.min(4) as usize])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryAction {
    GiveUp,
    RestartAfter(Duration),
}

/// Crash-recovery decision for one unexpected termination. Only the
/// termination watcher consults this, and only when the stop was not
/// requested by a caller.
fn recovery_action(auto_restart: bool, attempts: u32) -> RecoveryAction {
    if !auto_restart || attempts >= MAX_RESTART_ATTEMPTS {
        RecoveryAction::GiveUp
    } else {
        RecoveryAction::RestartAfter(restart_delay(attempts))
    }
}

fn unix_ms_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(unix)]
fn terminate_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_group(_pid: u32) {}

#[cfg(unix)]
fn kill_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // If the supervising process dies, make sure the service goes with it.
    // Rust 2024: `unsafe fn` bodies still need explicit unsafe blocks.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

/// Parameters captured at `start`, retained only so automatic restarts can
/// relaunch with the same shape. An explicit stop clears them.
#[derive(Debug, Clone)]
pub struct ServerLaunchConfig {
    pub host: String,
    pub port: u16,
    pub voice: String,
    pub auto_restart: bool,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) status: RuntimeStatus,
    /// Bumped every time a new subprocess is spawned. Watchers, restart
    /// schedulers, and kill escalations compare against it so a stale task
    /// never touches a newer instance's state.
    pub(crate) generation: u64,
    pub(crate) child_pid: Option<u32>,
    pub(crate) launch: Option<ServerLaunchConfig>,
    pub(crate) intentional_stop: bool,
    pub(crate) restart_attempts: u32,
    pub(crate) installed_version: Option<String>,
    pub(crate) last_error: Option<String>,
    pub(crate) last_health_check_at: Option<DateTime<Utc>>,
    pub(crate) started_at_unix_ms: Option<u64>,
    pub(crate) log_tx: Option<mpsc::Sender<String>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            status: RuntimeStatus::NotInstalled,
            generation: 0,
            child_pid: None,
            launch: None,
            intentional_stop: false,
            restart_attempts: 0,
            installed_version: None,
            last_error: None,
            last_health_check_at: None,
            started_at_unix_ms: None,
            log_tx: None,
        }
    }
}

/// Owner of the managed speech-service subprocess: at most one instance at
/// any time. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Mutex<Inner>>,
    logs: Arc<Mutex<LogBuffer>>,
    paths: RuntimePaths,
    tunables: Tunables,
}

impl Supervisor {
    pub fn new(paths: RuntimePaths) -> Self {
        Self::with_tunables(paths, Tunables::from_env())
    }

    pub fn with_tunables(paths: RuntimePaths, tunables: Tunables) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            logs: Arc::new(Mutex::new(LogBuffer::default())),
            paths,
            tunables,
        }
    }

    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    pub(crate) fn state(&self) -> &Arc<Mutex<Inner>> {
        &self.inner
    }

    /// Read-only view for UI layers; cheap enough to poll.
    pub async fn snapshot(&self) -> RuntimeSnapshot {
        let inner = self.inner.lock().await;
        RuntimeSnapshot {
            status: inner.status,
            pid: inner.child_pid,
            installed_version: inner.installed_version.clone(),
            restart_attempts: inner.restart_attempts,
            last_error: inner.last_error.clone(),
            last_health_check_at: inner.last_health_check_at,
            started_at_unix_ms: inner.started_at_unix_ms,
        }
    }

    /// Recent service log lines after `cursor` (0 means "the most recent
    /// `limit` lines"), plus the cursor to resume from.
    pub async fn tail_logs(&self, cursor: u64, limit: usize) -> (Vec<String>, u64) {
        self.logs.lock().await.tail_after(cursor, limit)
    }

    pub(crate) async fn record_error(&self, err: &EngineError) {
        self.inner.lock().await.last_error = Some(err.to_string());
    }

    pub(crate) async fn fail(&self, err: &EngineError) {
        let mut inner = self.inner.lock().await;
        inner.status = RuntimeStatus::Failed;
        inner.last_error = Some(err.to_string());
    }

    /// Launch the service and wait until it proves healthy.
    ///
    /// Any instance currently owned is stopped first; the single-instance
    /// invariant holds no matter how often this is called. On success the
    /// status is `Running` and the restart-attempt counter is reset.
    pub async fn start(
        &self,
        host: &str,
        port: u16,
        voice: &str,
        auto_restart: bool,
    ) -> Result<()> {
        let host = host.trim().to_string();
        if !is_loopback_host(&host) {
            let err = EngineError::InvalidHost(host);
            self.record_error(&err).await;
            return Err(err);
        }
        let voice = normalize_voice(voice);

        if !self.paths.is_installed() {
            let err = EngineError::RuntimeNotInstalled;
            self.record_error(&err).await;
            return Err(err);
        }

        self.stop().await;

        let log_file = self.paths.log_file();
        let file = match self.open_log_file().await {
            Ok(file) => file,
            Err(err) => {
                let err =
                    EngineError::StartupFailed(format!("open {}: {err}", log_file.display()));
                self.fail(&err).await;
                return Err(err);
            }
        };

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        tokio::spawn(logbuf::run_log_writer(rx, file, self.logs.clone()));
        let sink = LogSink::new(tx.clone());

        let generation;
        {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            generation = inner.generation;
            // The bumped generation detaches any predecessor's watcher, so
            // its pid must not linger here.
            inner.child_pid = None;
            inner.started_at_unix_ms = None;
            inner.intentional_stop = false;
            inner.status = RuntimeStatus::Starting;
            inner.last_error = None;
            inner.launch = Some(ServerLaunchConfig {
                host: host.clone(),
                port,
                voice: voice.clone(),
                auto_restart,
            });
            inner.log_tx = Some(tx.clone());
        }

        sink.emit(format!(
            "[sotto-engine] start requested: host={host} port={port} voice={voice}"
        ))
        .await;

        let bin = self.paths.service_bin();
        let mut cmd = Command::new(&bin);
        cmd.arg("serve")
            .arg("--host")
            .arg(&host)
            .arg("--port")
            .arg(port.to_string())
            .arg("--voice")
            .arg(&voice)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    set_parent_death_signal()?;
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                let err = EngineError::StartupFailed(format!("spawn {}: {err}", bin.display()));
                sink.emit(format!("[sotto-engine] start failed: {err}")).await;
                let mut inner = self.inner.lock().await;
                inner.status = RuntimeStatus::Failed;
                inner.last_error = Some(err.to_string());
                inner.launch = None;
                inner.log_tx = None;
                return Err(err);
            }
        };

        let pid = child.id();
        if let Some(out) = child.stdout.take() {
            tokio::spawn(logbuf::pump_stream(out, sink.sender()));
        }
        if let Some(errs) = child.stderr.take() {
            tokio::spawn(logbuf::pump_stream(errs, sink.sender()));
        }

        {
            let mut inner = self.inner.lock().await;
            inner.child_pid = pid;
            inner.started_at_unix_ms = Some(unix_ms_now());
        }

        tokio::spawn(self.clone().watch_child(child, generation, sink.clone()));

        let base_url = format!("http://{host}:{port}");
        let healthy = self.wait_for_healthy(&base_url, generation).await;

        if healthy {
            let confirmed = {
                let mut inner = self.inner.lock().await;
                if inner.generation == generation && inner.child_pid.is_some() {
                    inner.status = RuntimeStatus::Running;
                    inner.restart_attempts = 0;
                    true
                } else {
                    false
                }
            };
            if confirmed {
                sink.emit(format!(
                    "[sotto-engine] service healthy on {base_url} (voice {voice})"
                ))
                .await;
                tracing::info!(host = %host, port, voice = %voice, "speech service running");
                return Ok(());
            }
        }

        // Deadline expired with a live but unconfirmed process: put it down.
        // If the process already exited, the watcher has applied crash policy
        // and this start must not overwrite its verdict.
        let err = EngineError::StartTimedOut;
        let mut killed = false;
        {
            let mut inner = self.inner.lock().await;
            if inner.generation == generation
                && let Some(pid) = inner.child_pid
            {
                inner.intentional_stop = true;
                inner.launch = None;
                inner.log_tx = None;
                inner.status = RuntimeStatus::Failed;
                inner.last_error = Some(err.to_string());
                terminate_group(pid);
                self.spawn_kill_escalation(generation, pid);
                killed = true;
            }
        }
        if killed {
            sink.emit(format!("[sotto-engine] start failed: {err}")).await;
        }
        Err(err)
    }

    /// Caller-requested stop: ordinary termination, never an error and never
    /// a trigger for crash recovery. Idempotent. Does not wait for the
    /// process to exit; the termination watcher finishes the cleanup, and a
    /// detached task escalates to SIGKILL if the process lingers.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.intentional_stop = true;
        inner.launch = None;
        inner.log_tx = None;
        inner.status = RuntimeStatus::Stopped;
        if let Some(pid) = inner.child_pid {
            terminate_group(pid);
            self.spawn_kill_escalation(inner.generation, pid);
        }
    }

    /// Stop, then start with the given parameters. Not atomic with respect
    /// to other concurrent `start` callers.
    pub async fn restart(
        &self,
        host: &str,
        port: u16,
        voice: &str,
        auto_restart: bool,
    ) -> Result<()> {
        self.stop().await;
        self.start(host, port, voice, auto_restart).await
    }

    /// One-shot health probe of the given endpoint, for UI-initiated checks.
    pub async fn probe_health(&self, host: &str, port: u16) -> Result<HealthResult> {
        let result = health::health_check(&format!("http://{}:{port}", host.trim())).await;
        self.inner.lock().await.last_health_check_at = Some(Utc::now());

        if result.is_healthy && result.is_service_confirmed {
            Ok(result)
        } else {
            let message = result
                .message
                .unwrap_or_else(|| "service is not healthy".to_string());
            let err = EngineError::HealthCheckFailed(message);
            self.record_error(&err).await;
            Err(err)
        }
    }

    /// Poll the service until it is confirmed healthy, the process exits,
    /// or the start timeout expires. Cancellation is cooperative: dropping
    /// this future between probes leaves the subprocess untouched.
    async fn wait_for_healthy(&self, base_url: &str, generation: u64) -> bool {
        let deadline = tokio::time::Instant::now() + self.tunables.start_timeout;
        loop {
            {
                let inner = self.inner.lock().await;
                if inner.generation != generation || inner.child_pid.is_none() {
                    return false;
                }
            }

            let result = health::health_check(base_url).await;
            self.inner.lock().await.last_health_check_at = Some(Utc::now());
            if result.is_healthy && result.is_service_confirmed {
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.tunables.health_poll_interval).await;
        }
    }

    /// Runs once per spawned process; the sole entry point of the
    /// crash-recovery policy.
    async fn watch_child(self, mut child: Child, generation: u64, sink: LogSink) {
        let exit = child.wait().await;
        let exit_desc = match &exit {
            Ok(status) => match status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            },
            Err(err) => format!("wait failed: {err}"),
        };
        sink.emit(format!("[sotto-engine] service exited ({exit_desc})"))
            .await;

        let delay;
        let attempt;
        let cfg;
        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                // A newer start owns the state now.
                return;
            }
            inner.child_pid = None;
            inner.started_at_unix_ms = None;

            if inner.intentional_stop {
                return;
            }

            inner.log_tx = None;
            inner.last_error = Some(format!("service exited unexpectedly ({exit_desc})"));

            let Some(launch) = inner.launch.clone() else {
                inner.status = RuntimeStatus::Failed;
                return;
            };
            match recovery_action(launch.auto_restart, inner.restart_attempts) {
                RecoveryAction::GiveUp => {
                    inner.status = RuntimeStatus::Failed;
                    tracing::warn!(exit = %exit_desc, "speech service down, not restarting");
                    return;
                }
                RecoveryAction::RestartAfter(d) => {
                    inner.status = RuntimeStatus::Unhealthy;
                    delay = d;
                    inner.restart_attempts += 1;
                    attempt = inner.restart_attempts;
                    cfg = launch;
                }
            }
        }

        sink.emit(format!(
            "[sotto-engine] restart scheduled in {}s (attempt {attempt}/{MAX_RESTART_ATTEMPTS})",
            delay.as_secs()
        ))
        .await;
        tracing::warn!(
            attempt,
            delay_s = delay.as_secs(),
            "speech service crashed, restart scheduled"
        );

        let sup = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let inner = sup.inner.lock().await;
                // A concurrent caller may have claimed the supervisor while
                // this retry slept.
                if inner.generation != generation
                    || inner.child_pid.is_some()
                    || inner.intentional_stop
                    || inner.status != RuntimeStatus::Unhealthy
                {
                    return;
                }
            }
            // Route the recursive restart through `start_boxed`, whose
            // concrete `Pin<Box<dyn Future + Send>>` return breaks the
            // opaque-type auto-trait cycle (start spawns watch_child which
            // spawns start). Without the erasure the compiler cannot prove
            // this task is Send.
            if let Err(err) = sup.start_boxed(cfg).await {
                // If the relaunch spawned and crashed again, its own watcher
                // owns the verdict (generation moved on). Anything that
                // failed before spawning ends the recovery cycle here.
                let mut inner = sup.inner.lock().await;
                if inner.generation == generation && inner.child_pid.is_none() {
                    inner.status = RuntimeStatus::Failed;
                    inner.last_error = Some(err.to_string());
                }
            }
        });
    }

    /// Concrete, `Send`, `'static` wrapper around the recursive `start`
    /// future. Used only by the restart scheduler in `watch_child`; the type
    /// erasure breaks the opaque-future auto-trait cycle between `start` (which
    /// spawns `watch_child`) and `watch_child` (which spawns `start`).
    fn start_boxed(
        &self,
        cfg: ServerLaunchConfig,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>> {
        let sup = self.clone();
        Box::pin(async move {
            sup.start(&cfg.host, cfg.port, &cfg.voice, cfg.auto_restart)
                .await
        })
    }

    async fn open_log_file(&self) -> std::io::Result<tokio::fs::File> {
        tokio::fs::create_dir_all(self.paths.log_dir()).await?;
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.paths.log_file())
            .await
    }

    fn spawn_kill_escalation(&self, generation: u64, pid: u32) {
        let sup = self.clone();
        let grace = self.tunables.kill_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let inner = sup.inner.lock().await;
            if inner.generation == generation && inner.child_pid == Some(pid) {
                kill_group(pid);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::HttpStub;
    use serde_json::json;

    fn fast_tunables() -> Tunables {
        Tunables {
            start_timeout: Duration::from_secs(3),
            health_poll_interval: Duration::from_millis(50),
            kill_grace: Duration::from_secs(1),
        }
    }

    fn test_supervisor(dir: &std::path::Path) -> Supervisor {
        Supervisor::with_tunables(RuntimePaths::new(dir), fast_tunables())
    }

    #[cfg(unix)]
    fn install_fake_service(paths: &RuntimePaths, script_body: &str) {
        use std::os::unix::fs::PermissionsExt;

        let bin = paths.service_bin();
        std::fs::create_dir_all(bin.parent().unwrap()).unwrap();
        std::fs::write(paths.python_bin(), b"").unwrap();
        std::fs::write(&bin, script_body).unwrap();
        let mut perms = std::fs::metadata(&bin).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&bin, perms).unwrap();
    }

    async fn healthy_stub() -> HttpStub {
        HttpStub::serve(vec![
            ("/health", 200, json!({ "status": "healthy" }).to_string()),
            (
                "/openapi.json",
                200,
                json!({
                    "info": { "title": "Kokoro TTS API" },
                    "paths": { "/v1/audio/speech": {} }
                })
                .to_string(),
            ),
        ])
        .await
    }

    #[test]
    fn loopback_hosts_only() {
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("::1"));
        assert!(!is_loopback_host("0.0.0.0"));
        assert!(!is_loopback_host("93.184.216.34"));
        assert!(!is_loopback_host("example.com"));
    }

    #[test]
    fn empty_voice_falls_back_to_default() {
        assert_eq!(normalize_voice(""), DEFAULT_VOICE);
        assert_eq!(normalize_voice("   "), DEFAULT_VOICE);
        assert_eq!(normalize_voice(" af_bella "), "af_bella");
    }

    #[test]
    fn restart_delays_follow_fixed_schedule() {
        let delays: Vec<u64> = (0..6).map(|a| restart_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 5, 5, 5, 5]);
    }

    #[test]
    fn recovery_gives_up_at_attempt_ceiling() {
        assert_eq!(recovery_action(false, 0), RecoveryAction::GiveUp);
        for attempts in 0..MAX_RESTART_ATTEMPTS {
            assert!(matches!(
                recovery_action(true, attempts),
                RecoveryAction::RestartAfter(_)
            ));
        }
        assert_eq!(
            recovery_action(true, MAX_RESTART_ATTEMPTS),
            RecoveryAction::GiveUp
        );
    }

    #[tokio::test]
    async fn invalid_hosts_are_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let sup = test_supervisor(dir.path());

        for host in ["0.0.0.0", "93.184.216.34"] {
            let err = sup.start(host, DEFAULT_PORT, "", true).await.unwrap_err();
            assert!(matches!(err, EngineError::InvalidHost(_)), "host {host}");
        }

        let snap = sup.snapshot().await;
        assert_eq!(snap.pid, None);
        assert!(snap.last_error.unwrap().contains("non-loopback"));
    }

    #[tokio::test]
    async fn start_requires_an_installed_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let sup = test_supervisor(dir.path());

        let err = sup
            .start(DEFAULT_HOST, DEFAULT_PORT, "", true)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RuntimeNotInstalled));
        assert_eq!(sup.snapshot().await.pid, None);
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_nothing_runs() {
        let dir = tempfile::tempdir().unwrap();
        let sup = test_supervisor(dir.path());

        sup.stop().await;
        sup.stop().await;

        let snap = sup.snapshot().await;
        assert_eq!(snap.status, RuntimeStatus::Stopped);
        assert!(snap.last_error.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn becomes_running_only_after_health_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let sup = test_supervisor(dir.path());
        install_fake_service(sup.paths(), "#!/bin/sh\nsleep 30\n");
        let stub = healthy_stub().await;

        sup.start(DEFAULT_HOST, stub.port(), "", false)
            .await
            .unwrap();

        let snap = sup.snapshot().await;
        assert_eq!(snap.status, RuntimeStatus::Running);
        assert!(snap.pid.is_some());
        assert_eq!(snap.restart_attempts, 0);
        assert!(snap.last_error.is_none());
        assert!(snap.last_health_check_at.is_some());
        assert!(snap.started_at_unix_ms.is_some());

        sup.stop().await;
        let snap = sup.snapshot().await;
        assert_eq!(snap.status, RuntimeStatus::Stopped);

        // The watcher sees the SIGTERM-driven exit as intentional.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let snap = sup.snapshot().await;
        assert_eq!(snap.status, RuntimeStatus::Stopped);
        assert!(snap.last_error.is_none());
        assert_eq!(snap.pid, None);

        let (lines, _) = sup.tail_logs(0, 50).await;
        assert!(lines.iter().any(|l| l.contains("start requested")));
        assert!(sup.paths().log_file().is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unconfirmed_service_times_out_and_is_put_down() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::with_tunables(
            RuntimePaths::new(dir.path()),
            Tunables {
                start_timeout: Duration::from_millis(600),
                health_poll_interval: Duration::from_millis(50),
                kill_grace: Duration::from_secs(1),
            },
        );
        install_fake_service(sup.paths(), "#!/bin/sh\nsleep 30\n");
        // Looks alive, but the API document belongs to something else.
        let stub = HttpStub::serve(vec![
            ("/health", 200, json!({ "status": "healthy" }).to_string()),
            (
                "/openapi.json",
                200,
                json!({ "info": { "title": "Other" }, "paths": {} }).to_string(),
            ),
        ])
        .await;

        let err = sup
            .start(DEFAULT_HOST, stub.port(), "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StartTimedOut));

        let snap = sup.snapshot().await;
        assert_eq!(snap.status, RuntimeStatus::Failed);
        assert!(snap.last_error.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crash_without_auto_restart_fails_with_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let sup = test_supervisor(dir.path());
        install_fake_service(sup.paths(), "#!/bin/sh\nexit 7\n");

        let err = sup
            .start(DEFAULT_HOST, DEFAULT_PORT, "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StartTimedOut));

        let snap = sup.snapshot().await;
        assert_eq!(snap.status, RuntimeStatus::Failed);
        assert!(snap.last_error.unwrap().contains("exit code 7"));
        assert_eq!(snap.restart_attempts, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crash_with_auto_restart_schedules_a_retry_then_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let sup = test_supervisor(dir.path());
        install_fake_service(sup.paths(), "#!/bin/sh\nexit 3\n");

        let err = sup
            .start(DEFAULT_HOST, DEFAULT_PORT, "", true)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StartTimedOut));

        // The watcher applied the policy before the health wait noticed the
        // exit: one attempt consumed, retry pending.
        let snap = sup.snapshot().await;
        assert_eq!(snap.status, RuntimeStatus::Unhealthy);
        assert_eq!(snap.restart_attempts, 1);
        assert!(snap.last_error.unwrap().contains("exit code 3"));

        // An explicit healthy start resets the attempt counter.
        install_fake_service(sup.paths(), "#!/bin/sh\nsleep 30\n");
        let stub = healthy_stub().await;
        sup.start(DEFAULT_HOST, stub.port(), "", true).await.unwrap();

        let snap = sup.snapshot().await;
        assert_eq!(snap.status, RuntimeStatus::Running);
        assert_eq!(snap.restart_attempts, 0);

        sup.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn explicit_stop_cancels_a_pending_retry() {
        let dir = tempfile::tempdir().unwrap();
        let sup = test_supervisor(dir.path());
        install_fake_service(sup.paths(), "#!/bin/sh\nexit 1\n");

        let _ = sup.start(DEFAULT_HOST, DEFAULT_PORT, "", true).await;
        assert_eq!(sup.snapshot().await.status, RuntimeStatus::Unhealthy);

        sup.stop().await;
        assert_eq!(sup.snapshot().await.status, RuntimeStatus::Stopped);

        // Past the 1s retry delay: the scheduled restart must have bowed out.
        tokio::time::sleep(Duration::from_millis(1400)).await;
        let snap = sup.snapshot().await;
        assert_eq!(snap.status, RuntimeStatus::Stopped);
        assert_eq!(snap.pid, None);
    }
}
