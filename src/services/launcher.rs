use camino::Utf8PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;

/// How long a named host process gets to show up after the loader starts
pub const APPEAR_TIMEOUT: Duration = Duration::from_secs(3);

/// Poll interval while tracking a named host process
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Poll interval in turbo mode
pub const TURBO_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long an abnormal host exit waits for an operator interrupt to arrive.
///
/// A terminal Ctrl+C can reach the host before the signal task bumps the
/// interrupt counter.
pub const INTERRUPT_GRACE: Duration = Duration::from_millis(250);

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// What to start for one test launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: Utf8PathBuf,
    pub args: Vec<String>,

    /// Process to track instead of the spawned one (the host is started through a loader)
    pub process_name: Option<String>,
}

impl HostCommand {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            process_name: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn tracking(mut self, process_name: Option<String>) -> Self {
        self.process_name = process_name.filter(|n| !n.trim().is_empty());
        self
    }
}

/// Raw result of a launch, before classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The process exited on its own
    Exited { code: Option<i32>, success: bool },

    /// A tracked process never appeared or disappeared without an exit status
    Vanished,

    /// Still running when the timeout passed; it has been killed
    TimedOut,

    /// The operator interrupted the wait; the host has been killed
    Interrupted,
}

/// The host could not be started at all. Never retried.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Host executable not found: {0}")]
    ExecutableNotFound(Utf8PathBuf),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: Utf8PathBuf,
        source: std::io::Error,
    },
}

/// Starts the host and waits for it. The only OS-facing piece of a test launch.
#[allow(async_fn_in_trait)]
pub trait HostLauncher {
    /// Launch `command` and block until it exits, the timeout passes or the operator interrupts.
    ///
    /// # Returns
    /// The raw outcome; the host is no longer running when this returns
    async fn launch_and_wait(
        &mut self,
        command: &HostCommand,
        timeout: Duration,
    ) -> Result<LaunchOutcome, LaunchError>;
}

/// Lookup and termination of processes by name.
///
/// Implementations may block; the launcher calls them off the async workers.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessProbe {
    fn find_pid(&self, name: &str) -> Option<u32>;

    fn kill_pid(&self, pid: u32) -> bool;

    fn kill_by_name(&self, name: &str) -> bool;
}

/// [`ProcessProbe`] backed by pgrep/kill on Unix and tasklist/taskkill on Windows
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn find_pid(&self, name: &str) -> Option<u32> {
        if cfg!(target_os = "windows") {
            let filter = format!("IMAGENAME eq {}", name);
            let output = std::process::Command::new("tasklist")
                .args(["/FI", filter.as_str(), "/FO", "CSV", "/NH"])
                .output()
                .ok()?;
            if !output.status.success() {
                return None;
            }
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(|line| {
                    let mut cols = line.split(',').map(|c| c.trim().trim_matches('"'));
                    let image = cols.next()?;
                    let pid = cols.next()?;
                    image.eq_ignore_ascii_case(name).then(|| pid.parse().ok())?
                })
                .next()
        } else {
            let output = std::process::Command::new("pgrep")
                .args(["-x", name])
                .output()
                .ok()?;
            if !output.status.success() {
                return None;
            }
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .find_map(|line| line.trim().parse().ok())
        }
    }

    #[cfg(unix)]
    fn kill_pid(&self, pid: u32) -> bool {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        match i32::try_from(pid) {
            Ok(raw) => match kill(Pid::from_raw(raw), Signal::SIGKILL) {
                Ok(()) => true,
                Err(nix::errno::Errno::ESRCH) => false,
                Err(e) => {
                    tracing::warn!("Failed to kill process {}: {}", pid, e);
                    false
                }
            },
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn kill_pid(&self, pid: u32) -> bool {
        let pid = pid.to_string();
        std::process::Command::new("taskkill")
            .args(["/PID", pid.as_str(), "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    fn kill_by_name(&self, name: &str) -> bool {
        let Ok(output) = std::process::Command::new("pgrep")
            .args(["-x", name])
            .output()
        else {
            return false;
        };

        let mut killed = false;
        for pid in String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
        {
            killed |= self.kill_pid(pid);
        }
        killed
    }

    #[cfg(not(unix))]
    fn kill_by_name(&self, name: &str) -> bool {
        std::process::Command::new("taskkill")
            .args(["/IM", name, "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Launches the real host process.
///
/// Without a tracked process name the spawned child itself is waited on.
/// With one, the spawned program is treated as a loader: the named process
/// must appear within [`APPEAR_TIMEOUT`] and is then polled until it
/// disappears, the timeout passes or the operator interrupts.
pub struct SystemLauncher<P: ProcessProbe = SystemProbe> {
    probe: Arc<P>,
    interrupt: Option<watch::Receiver<u64>>,
    poll_interval: Duration,
    appear_timeout: Duration,
    cleanup_processes: Vec<String>,
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Interrupted,
}

impl SystemLauncher<SystemProbe> {
    pub fn new() -> Self {
        Self::with_probe(SystemProbe)
    }
}

impl Default for SystemLauncher<SystemProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ProcessProbe + Send + Sync + 'static> SystemLauncher<P> {
    pub fn with_probe(probe: P) -> Self {
        Self {
            probe: Arc::new(probe),
            interrupt: None,
            poll_interval: POLL_INTERVAL,
            appear_timeout: APPEAR_TIMEOUT,
            cleanup_processes: Vec::new(),
        }
    }

    /// Receive operator interrupts. Every value change counts as one interrupt.
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<u64>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn with_turbo(mut self, turbo: bool) -> Self {
        self.poll_interval = if turbo {
            TURBO_POLL_INTERVAL
        } else {
            POLL_INTERVAL
        };
        self
    }

    pub fn with_cleanup_processes(mut self, names: Vec<String>) -> Self {
        self.cleanup_processes = names;
        self
    }

    pub fn with_appear_timeout(mut self, appear_timeout: Duration) -> Self {
        self.appear_timeout = appear_timeout;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Kill every configured cleanup process that is still around.
    pub async fn cleanup(&self) {
        for name in &self.cleanup_processes {
            if self.kill_by_name(name).await {
                tracing::debug!("Killed leftover process {}", name);
            }
        }
    }

    /// Run a probe call on the blocking pool.
    async fn probe_call<T, F>(&self, call: F) -> T
    where
        T: Default + Send + 'static,
        F: FnOnce(&P) -> T + Send + 'static,
    {
        let probe = Arc::clone(&self.probe);
        match tokio::task::spawn_blocking(move || call(&probe)).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Process probe failed: {}", e);
                T::default()
            }
        }
    }

    async fn find_pid(&self, name: &str) -> Option<u32> {
        let name = name.to_string();
        self.probe_call(move |probe| probe.find_pid(&name)).await
    }

    async fn kill_by_name(&self, name: &str) -> bool {
        let name = name.to_string();
        self.probe_call(move |probe| probe.kill_by_name(&name)).await
    }

    fn spawn(&self, command: &HostCommand) -> Result<tokio::process::Child, LaunchError> {
        let program = &command.program;
        if program.components().count() > 1 && !program.exists() {
            return Err(LaunchError::ExecutableNotFound(program.clone()));
        }

        let mut cmd = Command::new(program.as_std_path());
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = program.parent().filter(|d| !d.as_str().is_empty()) {
            cmd.current_dir(dir);
        }
        // Keep the host out of our process group so a terminal Ctrl+C only reaches us.
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);

        cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LaunchError::ExecutableNotFound(program.clone())
            } else {
                LaunchError::Spawn {
                    program: program.clone(),
                    source,
                }
            }
        })
    }

    async fn wait_child(
        &mut self,
        command: &HostCommand,
        mut child: tokio::process::Child,
        timeout: Duration,
    ) -> Result<LaunchOutcome, LaunchError> {
        let waited = tokio::select! {
            biased;
            _ = wait_for_interrupt(&mut self.interrupt) => Waited::Interrupted,
            status = child.wait() => Waited::Exited(status),
            _ = tokio::time::sleep(timeout) => Waited::TimedOut,
        };

        match waited {
            Waited::Exited(Ok(status)) => Ok(LaunchOutcome::Exited {
                code: status.code(),
                success: status.success(),
            }),
            Waited::Exited(Err(source)) => Err(LaunchError::Wait {
                program: command.program.clone(),
                source,
            }),
            Waited::TimedOut => {
                tracing::warn!("{} still running after {:?}, killing it", command.program, timeout);
                kill_child(&mut child).await;
                Ok(LaunchOutcome::TimedOut)
            }
            Waited::Interrupted => {
                tracing::info!("Interrupted, killing {}", command.program);
                kill_child(&mut child).await;
                Ok(LaunchOutcome::Interrupted)
            }
        }
    }

    async fn wait_named(
        &mut self,
        name: &str,
        mut loader: tokio::process::Child,
        timeout: Duration,
    ) -> Result<LaunchOutcome, LaunchError> {
        // The loader usually exits right away; reap it in the background.
        tokio::spawn(async move {
            let _ = loader.wait().await;
        });

        let start = Instant::now();

        let mut appeared = false;
        while start.elapsed() < self.appear_timeout {
            if self.find_pid(name).await.is_some() {
                appeared = true;
                break;
            }
            if self.pause_or_interrupt().await {
                self.kill_by_name(name).await;
                return Ok(LaunchOutcome::Interrupted);
            }
        }
        if !appeared {
            tracing::warn!("{} never appeared, treating as a crash", name);
            self.kill_by_name(name).await;
            return Ok(LaunchOutcome::Vanished);
        }

        loop {
            if start.elapsed() >= timeout {
                tracing::debug!("{} survived {:?}, closing it", name, timeout);
                self.kill_named(name).await;
                return Ok(LaunchOutcome::TimedOut);
            }
            if self.find_pid(name).await.is_none() {
                return Ok(LaunchOutcome::Vanished);
            }
            if self.pause_or_interrupt().await {
                tracing::info!("Interrupted, killing {}", name);
                self.kill_named(name).await;
                return Ok(LaunchOutcome::Interrupted);
            }
        }
    }

    /// Sleep one poll interval; true when the operator interrupted meanwhile.
    async fn pause_or_interrupt(&mut self) -> bool {
        tokio::select! {
            biased;
            _ = wait_for_interrupt(&mut self.interrupt) => true,
            _ = tokio::time::sleep(self.poll_interval) => false,
        }
    }

    /// True when an interrupt is pending or arrives within `grace`.
    async fn interrupted_within(&mut self, grace: Duration) -> bool {
        let Some(rx) = self.interrupt.as_mut() else {
            return false;
        };
        if rx.has_changed().unwrap_or(false) {
            let _ = rx.borrow_and_update();
            return true;
        }
        matches!(tokio::time::timeout(grace, rx.changed()).await, Ok(Ok(())))
    }

    async fn kill_named(&self, name: &str) {
        let name = name.to_string();
        self.probe_call(move |probe| match probe.find_pid(&name) {
            Some(pid) if probe.kill_pid(pid) => true,
            _ => probe.kill_by_name(&name),
        })
        .await;
    }
}

impl<P: ProcessProbe + Send + Sync + 'static> HostLauncher for SystemLauncher<P> {
    async fn launch_and_wait(
        &mut self,
        command: &HostCommand,
        timeout: Duration,
    ) -> Result<LaunchOutcome, LaunchError> {
        // Interrupts delivered between launches must not abort this one.
        if let Some(rx) = self.interrupt.as_mut() {
            let _ = rx.borrow_and_update();
        }

        tracing::debug!("Launching {} {:?}", command.program, command.args);
        let child = self.spawn(command)?;

        let mut outcome = match command.process_name.clone() {
            Some(name) => self.wait_named(&name, child, timeout).await,
            None => self.wait_child(command, child, timeout).await,
        };

        // A host taken down by the operator's Ctrl+C looks like a crash.
        let abnormal = matches!(
            outcome,
            Ok(LaunchOutcome::Exited { success: false, .. } | LaunchOutcome::Vanished)
        );
        if abnormal && self.interrupted_within(INTERRUPT_GRACE).await {
            tracing::info!("{} went down with an operator interrupt", command.program);
            outcome = Ok(LaunchOutcome::Interrupted);
        }

        self.cleanup().await;
        outcome
    }
}

async fn wait_for_interrupt(interrupt: &mut Option<watch::Receiver<u64>>) {
    match interrupt {
        Some(rx) => {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

async fn kill_child(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill host process: {}", e);
    }
}
