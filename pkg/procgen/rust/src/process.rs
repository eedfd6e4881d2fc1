// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, ExitDetail, Result};
use crate::pid::Pid;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::hash::Hash;
use std::time::{Duration, SystemTime};
use tokio::process::Child;
use tokio::sync::watch;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateMode {
    /// Ask the process to shut down (SIGTERM, channel close).
    Graceful,
    /// Kill without giving the process a chance to clean up.
    Forced,
}

/// A process this crate spawned, tracked by its resolved id.
///
/// Liveness and exit state derive from the exit record the monitor task
/// publishes, not from re-querying the OS, so a pid recycled by the OS can
/// never be misread as one of ours still being alive.
#[async_trait]
pub trait Generated: Send + Sync + 'static {
    /// Numeric local pid, or a transport-scoped opaque handle for remote
    /// processes. Unique among live entries of one registry.
    type Id: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static;

    fn id(&self) -> Self::Id;
    fn is_daemon(&self) -> bool;
    fn started_at(&self) -> SystemTime;

    /// Cheap, non-blocking liveness check.
    fn is_alive(&self) -> bool;

    /// Terminal state, if already reached.
    fn exit_detail(&self) -> Option<ExitDetail>;

    /// Grace period stop paths allow before escalating to forced
    /// termination.
    fn stop_timeout(&self) -> Duration;

    /// Block until the process reaches a terminal state.
    async fn wait(&self) -> ExitDetail;

    /// Terminating an already-terminal process is not an error.
    async fn terminate(&self, mode: TerminateMode) -> Result<()>;

    /// Like `wait`, but returns [`Error::Timeout`] once `timeout` elapses.
    /// The process keeps running; a later wait observes its real exit.
    async fn wait_for(&self, timeout: Duration) -> Result<ExitDetail> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| Error::Timeout(timeout))
    }
}

/// A locally spawned process. The `Child` handle is owned by a monitor task
/// that awaits its exit and publishes the result; the handle itself holds
/// only the resolved pid and the exit watch.
#[derive(Debug)]
pub struct LocalProcess {
    name: String,
    pid: Pid,
    daemon: bool,
    started_at: SystemTime,
    stop_timeout: Duration,
    exit: watch::Receiver<Option<ExitDetail>>,
}

impl LocalProcess {
    /// Must be called from within a tokio runtime; spawns the exit monitor.
    pub(crate) fn new(
        name: String,
        pid: Pid,
        daemon: bool,
        stop_timeout: Duration,
        mut child: Child,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let task_name = name.clone();
        tokio::spawn(async move {
            let detail = match child.wait().await {
                Ok(status) => ExitDetail::from(status),
                Err(e) => {
                    warn!("[{task_name}] wait on child failed: {e}");
                    ExitDetail::Unknown
                }
            };
            info!("[{task_name}] exited ({detail})");
            let _ = tx.send(Some(detail));
        });

        Self {
            name,
            pid,
            daemon,
            started_at: SystemTime::now(),
            stop_timeout,
            exit: rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[cfg(unix)]
    fn deliver(&self, mode: TerminateMode) -> Result<()> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid as NixPid;

        let sig = match mode {
            TerminateMode::Graceful => Signal::SIGTERM,
            TerminateMode::Forced => Signal::SIGKILL,
        };
        debug!("[{}] sending {sig} to pid {}", self.name, self.pid);
        match signal::kill(NixPid::from_raw(self.pid as i32), sig) {
            Ok(()) => {}
            // Lost the race against exit; the monitor task records it.
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!("[{}] failed to send {sig}: {e}", self.name),
        }
        Ok(())
    }

    #[cfg(windows)]
    fn deliver(&self, mode: TerminateMode) -> Result<()> {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{
            OpenProcess, PROCESS_TERMINATE, TerminateProcess,
        };

        // Windows has no process-targeted graceful signal; both modes
        // terminate the process object.
        let _ = mode;
        debug!("[{}] terminating pid {}", self.name, self.pid);
        // SAFETY: plain Win32 calls; the handle is closed before returning.
        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, self.pid);
            if handle.is_null() {
                // Already gone.
                return Ok(());
            }
            let ok = TerminateProcess(handle, 1);
            CloseHandle(handle);
            if ok == 0 {
                warn!("[{}] TerminateProcess failed", self.name);
            }
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn deliver(&self, _mode: TerminateMode) -> Result<()> {
        Err(Error::UnsupportedPlatform)
    }
}

#[async_trait]
impl Generated for LocalProcess {
    type Id = Pid;

    fn id(&self) -> Pid {
        self.pid
    }

    fn is_daemon(&self) -> bool {
        self.daemon
    }

    fn started_at(&self) -> SystemTime {
        self.started_at
    }

    fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    fn exit_detail(&self) -> Option<ExitDetail> {
        *self.exit.borrow()
    }

    fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    async fn wait(&self) -> ExitDetail {
        let mut rx = self.exit.clone();
        loop {
            if let Some(detail) = *rx.borrow_and_update() {
                return detail;
            }
            if rx.changed().await.is_err() {
                // Monitor task gone without publishing; nothing better to
                // report.
                return ExitDetail::Unknown;
            }
        }
    }

    async fn terminate(&self, mode: TerminateMode) -> Result<()> {
        if !self.is_alive() {
            debug!("[{}] terminate on terminal process, nothing to do", self.name);
            return Ok(());
        }
        self.deliver(mode)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    async fn spawn_local(cmd: &str, args: &[&str], daemon: bool) -> LocalProcess {
        let mut command = Command::new(cmd);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = command.spawn().unwrap();
        let pid = crate::pid::resolve_pid_of(&child).unwrap();
        LocalProcess::new(
            "test".into(),
            pid,
            daemon,
            Duration::from_secs(5),
            child,
        )
    }

    #[tokio::test]
    async fn test_exit_code_observed() {
        let proc = spawn_local("/bin/sh", &["-c", "exit 7"], false).await;
        assert_eq!(proc.wait().await, ExitDetail::Code(7));
        assert!(!proc.is_alive());
        assert_eq!(proc.exit_detail(), Some(ExitDetail::Code(7)));
    }

    #[tokio::test]
    async fn test_terminate_forced() {
        let proc = spawn_local("/bin/sleep", &["60"], false).await;
        assert!(proc.is_alive());
        proc.terminate(TerminateMode::Forced).await.unwrap();
        assert_eq!(proc.wait().await, ExitDetail::Signal(9));
    }

    #[tokio::test]
    async fn test_terminate_graceful() {
        let proc = spawn_local("/bin/sleep", &["60"], false).await;
        proc.terminate(TerminateMode::Graceful).await.unwrap();
        assert_eq!(proc.wait().await, ExitDetail::Signal(15));
    }

    #[tokio::test]
    async fn test_terminate_after_exit_is_noop() {
        let proc = spawn_local("/bin/true", &[], false).await;
        proc.wait().await;
        proc.terminate(TerminateMode::Forced).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_times_out_then_real_exit() {
        let proc = spawn_local("/bin/sleep", &["1"], false).await;

        match proc.wait_for(Duration::from_millis(100)).await {
            Err(Error::Timeout(t)) => assert_eq!(t, Duration::from_millis(100)),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(proc.is_alive(), "timeout must not affect the process");

        let detail = proc.wait_for(Duration::from_secs(5)).await.unwrap();
        assert_eq!(detail, ExitDetail::Code(0));
    }

    #[tokio::test]
    async fn test_daemon_flag_carried() {
        let proc = spawn_local("/bin/sleep", &["60"], true).await;
        assert!(proc.is_daemon());
        proc.terminate(TerminateMode::Forced).await.unwrap();
        proc.wait().await;
    }
}
