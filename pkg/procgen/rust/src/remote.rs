// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Remote process generation over a caller-provided command transport.
//!
//! The transport itself (connection, auth, channel plumbing) lives outside
//! this crate; only the execution surface is required here. Remote ids are
//! transport-scoped opaque tokens, never locally resolved pids: the remote
//! OS process is outside this host's pid namespace.

use crate::errors::{Error, ExitDetail, Result, StartCause, TransportError};
use crate::generator::ProcessGenerator;
use crate::process::{DEFAULT_STOP_TIMEOUT, Generated, TerminateMode};
use async_trait::async_trait;
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Command-execution surface required from a remote session.
#[async_trait]
pub trait CommandTransport: Send + Sync + 'static {
    type Channel: CommandChannel;

    /// Stable label for the peer, used in ids and log lines.
    fn target(&self) -> &str;

    async fn open_channel(&self) -> std::result::Result<Self::Channel, TransportError>;
}

/// One execution channel on a remote session.
#[async_trait]
pub trait CommandChannel: Send + 'static {
    async fn exec(&mut self, command_line: &str) -> std::result::Result<(), TransportError>;

    /// Block until the remote command finishes and its exit status is known.
    async fn wait_exit_status(&mut self) -> std::result::Result<i32, TransportError>;

    /// Tear the channel down, killing the remote command if still running.
    async fn force_close(&mut self) -> std::result::Result<(), TransportError>;
}

/// Transport-scoped opaque process id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteId {
    target: String,
    token: Uuid,
}

impl RemoteId {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            token: Uuid::new_v4(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target, self.token)
    }
}

/// Immutable description of a command to run on a remote target.
#[derive(Debug, Clone)]
pub struct RemoteExecRequirement {
    pub command_line: String,
    pub daemon: bool,
    pub stop_timeout: Option<u64>,
}

impl RemoteExecRequirement {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            daemon: false,
            stop_timeout: None,
        }
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn stop_timeout_secs(mut self, secs: u64) -> Self {
        self.stop_timeout = Some(secs);
        self
    }

    pub fn effective_stop_timeout(&self) -> Duration {
        self.stop_timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STOP_TIMEOUT)
    }

    /// First token of the command line, for log lines.
    pub fn display_name(&self) -> String {
        self.command_line
            .split_whitespace()
            .next()
            .unwrap_or("remote")
            .to_string()
    }
}

/// A command running on a remote target. The channel is owned by a monitor
/// task that waits for the remote exit status and answers terminate
/// requests; the handle holds only the opaque id and the exit watch.
#[derive(Debug)]
pub struct RemoteProcess {
    id: RemoteId,
    name: String,
    daemon: bool,
    started_at: SystemTime,
    stop_timeout: Duration,
    exit: watch::Receiver<Option<ExitDetail>>,
    terminate_tx: mpsc::Sender<TerminateMode>,
}

impl RemoteProcess {
    fn spawn_monitor<C: CommandChannel>(
        name: String,
        mut channel: C,
        exit_tx: watch::Sender<Option<ExitDetail>>,
        mut terminate_rx: mpsc::Receiver<TerminateMode>,
    ) {
        tokio::spawn(async move {
            let detail = tokio::select! {
                status = channel.wait_exit_status() => status_to_detail(&name, status),
                recv = terminate_rx.recv() => match recv {
                    Some(_mode) => {
                        // The transport boundary offers no graceful remote
                        // kill; both modes close the channel.
                        if let Err(e) = channel.force_close().await {
                            warn!("[{name}] channel close failed: {e}");
                        }
                        ExitDetail::Unknown
                    }
                    // Handle dropped without a terminate request; see the
                    // remote command through to its exit.
                    None => status_to_detail(&name, channel.wait_exit_status().await),
                },
            };
            info!("[{name}] remote command finished ({detail})");
            let _ = exit_tx.send(Some(detail));
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn status_to_detail(name: &str, status: std::result::Result<i32, TransportError>) -> ExitDetail {
    match status {
        Ok(code) => ExitDetail::Code(code),
        Err(e) => {
            warn!("[{name}] reading remote exit status failed: {e}");
            ExitDetail::Unknown
        }
    }
}

#[async_trait]
impl Generated for RemoteProcess {
    type Id = RemoteId;

    fn id(&self) -> RemoteId {
        self.id.clone()
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
                return ExitDetail::Unknown;
            }
        }
    }

    async fn terminate(&self, mode: TerminateMode) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        // A closed control channel means the monitor already recorded the
        // exit; nothing left to do.
        let _ = self.terminate_tx.send(mode).await;
        Ok(())
    }
}

/// Generates processes on a remote target by executing commands over the
/// transport. Same contract as the local generator, with transport-specific
/// requirement and id types.
pub struct RemoteProcessGenerator<T: CommandTransport> {
    transport: Arc<T>,
}

impl<T: CommandTransport> RemoteProcessGenerator<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub fn target(&self) -> &str {
        self.transport.target()
    }
}

#[async_trait]
impl<T: CommandTransport> ProcessGenerator for RemoteProcessGenerator<T> {
    type Requirement = RemoteExecRequirement;
    type Process = RemoteProcess;

    async fn generate(&self, requirement: &RemoteExecRequirement) -> Result<RemoteProcess> {
        let name = requirement.display_name();

        let start_error = |cause: TransportError| Error::Start {
            command: requirement.command_line.clone(),
            cause: StartCause::Transport(cause),
        };

        let mut channel = self.transport.open_channel().await.map_err(start_error)?;
        channel
            .exec(&requirement.command_line)
            .await
            .map_err(start_error)?;

        let id = RemoteId::new(self.transport.target());
        info!(
            "[{name}] remote command started on {} (id={id})",
            self.transport.target()
        );

        let (exit_tx, exit_rx) = watch::channel(None);
        let (terminate_tx, terminate_rx) = mpsc::channel(1);
        RemoteProcess::spawn_monitor(name.clone(), channel, exit_tx, terminate_rx);

        Ok(RemoteProcess {
            id,
            name,
            daemon: requirement.daemon,
            started_at: SystemTime::now(),
            stop_timeout: requirement.effective_stop_timeout(),
            exit: exit_rx,
            terminate_tx,
        })
    }
}
