// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Launch was impossible. Recoverable: callers may retry with an
    /// adjusted requirement (different executable, port, target).
    #[error("failed to start `{command}`: {cause}")]
    Start {
        command: String,
        #[source]
        cause: StartCause,
    },

    /// A numeric pid could not be extracted from the process handle. Never
    /// mapped to a sentinel value; the registry keys on the id.
    #[error("pid resolution failed: {0}")]
    Resolution(String),

    /// No pid resolution strategy matched the running platform.
    #[error("no pid resolution strategy supports this platform")]
    UnsupportedPlatform,

    /// A bounded wait elapsed before the process reached the awaited state.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The registry observed a state that violates its contract (id
    /// collision, missing expected entry, use after close).
    #[error("registry inconsistency in `{domain}`: {detail}")]
    RegistryInconsistency { domain: String, detail: String },

    /// Enumeration of the process table could not begin. Per-entry failures
    /// during a scan skip the entry instead.
    #[error("process table scan failed: {0}")]
    Scan(#[from] std::io::Error),
}

/// Why a start attempt failed.
#[derive(Debug, Error)]
pub enum StartCause {
    /// The OS refused the spawn (executable missing, permission denied).
    #[error("spawn failed: {0}")]
    Io(#[from] std::io::Error),

    /// The remote session could not execute the command.
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    /// The process exited before the startup liveness probe passed.
    #[error("exited during startup probe ({0})")]
    EarlyExit(ExitDetail),
}

/// Error type of the remote transport boundary. The transport implementation
/// is owned by the caller; this crate only carries its message.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Terminal state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDetail {
    Code(i32),
    Signal(i32),
    Unknown,
}

impl fmt::Display for ExitDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitDetail::Code(code) => write!(f, "exit code {code}"),
            ExitDetail::Signal(sig) => write!(f, "signal {sig}"),
            ExitDetail::Unknown => write!(f, "unknown exit"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitDetail {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitDetail::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return ExitDetail::Signal(sig);
            }
        }
        ExitDetail::Unknown
    }
}
