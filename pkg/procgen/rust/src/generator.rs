// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result, StartCause};
use crate::pid::resolve_pid_of;
use crate::process::{Generated, LocalProcess};
use crate::requirement::ExecRequirement;
use async_trait::async_trait;
use log::{info, warn};
use std::process::Stdio;
use tokio::process::Command;

/// Turns a requirement into a running, tracked process.
///
/// `generate` blocks until the OS or transport confirms creation, and fails
/// with [`Error::Start`] so callers can retry against an adjusted
/// requirement.
#[async_trait]
pub trait ProcessGenerator: Send + Sync {
    type Requirement: Send + Sync;
    type Process: Generated;

    async fn generate(&self, requirement: &Self::Requirement) -> Result<Self::Process>;
}

/// Spawns processes on the local host via the OS process API. The returned
/// id is the numeric pid resolved through the platform strategy chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProcessGenerator;

impl LocalProcessGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessGenerator for LocalProcessGenerator {
    type Requirement = ExecRequirement;
    type Process = LocalProcess;

    async fn generate(&self, requirement: &ExecRequirement) -> Result<LocalProcess> {
        let name = requirement.display_name();

        let mut command = Command::new(&requirement.command);
        command.args(&requirement.args);
        for (k, v) in &requirement.env {
            command.env(k, v);
        }
        if let Some(ref dir) = requirement.working_dir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = command.spawn().map_err(|e| Error::Start {
            command: requirement.command.clone(),
            cause: StartCause::Io(e),
        })?;

        let pid = match resolve_pid_of(&child) {
            Ok(pid) => pid,
            Err(e) => {
                // The registry keys on the id; a process without one must
                // not be left running untracked.
                warn!("[{name}] killing child after failed pid resolution: {e}");
                let _ = child.start_kill();
                return Err(e);
            }
        };

        info!(
            "[{name}] spawned (pid={pid}, cmd={})",
            requirement.command
        );
        Ok(LocalProcess::new(
            name,
            pid,
            requirement.daemon,
            requirement.effective_stop_timeout(),
            child,
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::errors::ExitDetail;
    use crate::process::TerminateMode;

    #[tokio::test]
    async fn test_generate_resolves_pid() {
        let generator = LocalProcessGenerator::new();
        let req = ExecRequirement::new("/bin/sleep").arg("60");

        let proc = generator.generate(&req).await.unwrap();
        assert!(proc.pid() > 0);
        assert!(proc.is_alive());
        assert!(!proc.is_daemon());

        proc.terminate(TerminateMode::Forced).await.unwrap();
        proc.wait().await;
    }

    #[tokio::test]
    async fn test_generate_nonexistent_executable() {
        let generator = LocalProcessGenerator::new();
        let req = ExecRequirement::new("/nonexistent/binary");

        match generator.generate(&req).await {
            Err(Error::Start {
                command,
                cause: StartCause::Io(_),
            }) => assert_eq!(command, "/nonexistent/binary"),
            other => panic!("expected start failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_applies_env_and_args() {
        let generator = LocalProcessGenerator::new();
        let req = ExecRequirement::new("/bin/sh")
            .args(["-c", "exit $MY_EXIT_CODE"])
            .env("MY_EXIT_CODE", "42");

        let proc = generator.generate(&req).await.unwrap();
        assert_eq!(proc.wait().await, ExitDetail::Code(42));
    }

    #[tokio::test]
    async fn test_generate_applies_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let generator = LocalProcessGenerator::new();
        let req = ExecRequirement::new("/bin/sh")
            .args(["-c", "test \"$(pwd)\" = \"$EXPECTED\""])
            .env("EXPECTED", dir.path().to_str().unwrap())
            .working_dir(dir.path());

        let proc = generator.generate(&req).await.unwrap();
        assert_eq!(proc.wait().await, ExitDetail::Code(0));
    }
}
