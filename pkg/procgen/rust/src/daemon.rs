// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, ExitDetail, Result, StartCause};
use crate::generator::ProcessGenerator;
use crate::process::{Generated, TerminateMode};
use crate::registry::GeneratedProcessRegistry;
use log::{debug, info, warn};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_millis(200);

/// One named long-lived service: a generator plus a registry entry with
/// start/stop/liveness semantics. Works unchanged over the local and remote
/// generators.
///
/// Start/stop transitions serialize through an internal mutex, so two
/// concurrent calls on the same daemon can never interleave.
pub struct ProcessDaemon<G: ProcessGenerator> {
    name: String,
    generator: G,
    requirement: G::Requirement,
    registry: GeneratedProcessRegistry<G::Process>,
    probe_delay: Duration,
    transition: Mutex<()>,
    current: RwLock<Option<Arc<G::Process>>>,
}

impl<G: ProcessGenerator> ProcessDaemon<G> {
    /// `requirement` must carry the daemon flag; the registry prunes
    /// transient entries on exit, which would defeat supervision.
    pub fn new(
        name: impl Into<String>,
        generator: G,
        requirement: G::Requirement,
        registry: GeneratedProcessRegistry<G::Process>,
    ) -> Self {
        Self {
            name: name.into(),
            generator,
            requirement,
            registry,
            probe_delay: DEFAULT_PROBE_DELAY,
            transition: Mutex::new(()),
            current: RwLock::new(None),
        }
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generate, register, then probe liveness. Fails with
    /// [`Error::Start`] carrying the observed exit when the process dies
    /// before the probe passes. Starting a running daemon is a no-op.
    pub async fn start(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        if self
            .current
            .read()
            .unwrap()
            .as_ref()
            .is_some_and(|p| p.is_alive())
        {
            debug!("[{}] already running", self.name);
            return Ok(());
        }

        let process = self.generator.generate(&self.requirement).await?;
        let process = self.registry.register(process)?;
        let id = process.id();

        // Give the process a moment to crash on startup before declaring
        // the start successful.
        tokio::time::sleep(self.probe_delay).await;
        if !process.is_alive() {
            let detail = process.exit_detail().unwrap_or(ExitDetail::Unknown);
            let _ = self.registry.unregister(&id);
            warn!("[{}] exited during startup probe ({detail})", self.name);
            return Err(Error::Start {
                command: self.name.clone(),
                cause: StartCause::EarlyExit(detail),
            });
        }

        info!("[{}] started (id={id})", self.name);
        *self.current.write().unwrap() = Some(process);
        Ok(())
    }

    /// Graceful termination with bounded wait, escalating to forced
    /// termination on timeout, then unregister. Idempotent once stopped.
    pub async fn stop(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        let Some(process) = self.current.write().unwrap().take() else {
            debug!("[{}] already stopped", self.name);
            return Ok(());
        };
        let id = process.id();

        if process.is_alive() {
            process.terminate(TerminateMode::Graceful).await?;
            let stop = process.stop_timeout();
            match process.wait_for(stop).await {
                Ok(detail) => info!("[{}] stopped ({detail})", self.name),
                Err(Error::Timeout(_)) => {
                    warn!(
                        "[{}] no exit within {}s, forcing termination",
                        self.name,
                        stop.as_secs()
                    );
                    process.terminate(TerminateMode::Forced).await?;
                    let detail = process.wait().await;
                    info!("[{}] stopped after forced termination ({detail})", self.name);
                }
                Err(e) => return Err(e),
            }
        }

        self.registry.unregister(&id)?;
        Ok(())
    }

    /// Cheap, non-blocking liveness check.
    pub fn is_running(&self) -> bool {
        self.current
            .read()
            .unwrap()
            .as_ref()
            .is_some_and(|p| p.is_alive())
    }
}

/// Remote-transport specialization: the identical contract with
/// transport-specific requirement and id types.
pub type RemoteProcessDaemon<T> = ProcessDaemon<crate::remote::RemoteProcessGenerator<T>>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::generator::LocalProcessGenerator;
    use crate::requirement::ExecRequirement;

    fn registry() -> GeneratedProcessRegistry<crate::process::LocalProcess> {
        GeneratedProcessRegistry::new("daemons")
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let registry = registry();
        let daemon = ProcessDaemon::new(
            "sleeper",
            LocalProcessGenerator::new(),
            ExecRequirement::new("/bin/sleep").arg("300").daemon(true),
            registry.clone(),
        );

        assert!(!daemon.is_running());
        daemon.start().await.unwrap();
        assert!(daemon.is_running());
        assert_eq!(registry.get_all_ids().len(), 1);

        daemon.stop().await.unwrap();
        assert!(!daemon.is_running());
        assert!(registry.get_all_ids().is_empty());

        // Idempotent.
        daemon.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let registry = registry();
        let daemon = ProcessDaemon::new(
            "sleeper",
            LocalProcessGenerator::new(),
            ExecRequirement::new("/bin/sleep").arg("300").daemon(true),
            registry.clone(),
        );

        daemon.start().await.unwrap();
        daemon.start().await.unwrap();
        assert_eq!(registry.get_all_ids().len(), 1);

        daemon.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_early_exit_is_start_failure() {
        let registry = registry();
        let daemon = ProcessDaemon::new(
            "flaky",
            LocalProcessGenerator::new(),
            ExecRequirement::new("/bin/sh")
                .args(["-c", "exit 3"])
                .daemon(true),
            registry.clone(),
        );

        match daemon.start().await {
            Err(Error::Start {
                cause: StartCause::EarlyExit(detail),
                ..
            }) => assert_eq!(detail, ExitDetail::Code(3)),
            other => panic!("expected early-exit start failure, got {other:?}"),
        }
        assert!(!daemon.is_running());
        assert!(registry.is_empty(), "failed start must not leave an entry");
    }

    #[tokio::test]
    async fn test_missing_executable_is_start_failure() {
        let registry = registry();
        let daemon = ProcessDaemon::new(
            "ghost",
            LocalProcessGenerator::new(),
            ExecRequirement::new("/nonexistent/binary").daemon(true),
            registry.clone(),
        );

        match daemon.start().await {
            Err(Error::Start {
                cause: StartCause::Io(_),
                ..
            }) => {}
            other => panic!("expected io start failure, got {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stop_escalates_on_sigterm_ignore() {
        let registry = registry();
        let daemon = ProcessDaemon::new(
            "stubborn",
            LocalProcessGenerator::new(),
            ExecRequirement::new("/bin/sh")
                .args(["-c", "trap '' TERM; sleep 60"])
                .daemon(true)
                .stop_timeout_secs(1),
            registry.clone(),
        );

        daemon.start().await.unwrap();
        daemon.stop().await.unwrap();
        assert!(!daemon.is_running());
        assert!(registry.is_empty());
    }
}
