// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Platform strategy chain for extracting a numeric OS pid from a spawned
//! process handle. Candidates are probed once, in order; the first whose
//! probe succeeds is cached for the lifetime of this process and never
//! re-probed.

use crate::errors::{Error, Result};
use log::debug;
use std::sync::OnceLock;
use tokio::process::Child;

pub type Pid = u32;

trait PidStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Capability probe. Must be side-effect-free and must never fail: a
    /// strategy whose platform internals are absent reports `false` here and
    /// defers any hard failure to `resolve`.
    fn supported(&self) -> bool;

    fn resolve(&self, child: &Child) -> Result<Pid>;
}

/// Static read of the pid the runtime recorded when it spawned the child.
struct RuntimeIdStrategy;

impl PidStrategy for RuntimeIdStrategy {
    fn name(&self) -> &'static str {
        "runtime-id"
    }

    fn supported(&self) -> bool {
        cfg!(any(unix, windows))
    }

    fn resolve(&self, child: &Child) -> Result<Pid> {
        child
            .id()
            .ok_or_else(|| Error::Resolution("process handle already reaped".into()))
    }
}

/// Live handle-to-pid system call. Unlike the Unix path this is not a static
/// field read: the id belongs to the kernel object behind the handle and has
/// to be asked for.
#[cfg(windows)]
struct ProcessIdCallStrategy;

#[cfg(windows)]
impl PidStrategy for ProcessIdCallStrategy {
    fn name(&self) -> &'static str {
        "win32-process-id"
    }

    fn supported(&self) -> bool {
        true
    }

    fn resolve(&self, child: &Child) -> Result<Pid> {
        use windows_sys::Win32::System::Threading::GetProcessId;

        let Some(handle) = child.raw_handle() else {
            return Err(Error::Resolution("process handle already reaped".into()));
        };
        // SAFETY: the handle was returned by a live `Child` which keeps
        // ownership of it for the duration of this call.
        let pid = unsafe { GetProcessId(handle as _) };
        if pid == 0 {
            return Err(Error::Resolution("GetProcessId returned 0".into()));
        }
        Ok(pid)
    }
}

#[cfg(windows)]
static CANDIDATES: &[&(dyn PidStrategy)] = &[&ProcessIdCallStrategy, &RuntimeIdStrategy];
#[cfg(not(windows))]
static CANDIDATES: &[&(dyn PidStrategy)] = &[&RuntimeIdStrategy];

static SELECTED: OnceLock<Option<&'static dyn PidStrategy>> = OnceLock::new();

fn selected_strategy() -> Option<&'static dyn PidStrategy> {
    *SELECTED.get_or_init(|| {
        let strategy = CANDIDATES.iter().copied().find(|s| s.supported());
        match strategy {
            Some(s) => debug!("pid resolution strategy selected: {}", s.name()),
            None => debug!("no pid resolution strategy supports this platform"),
        }
        strategy
    })
}

/// Resolve the OS pid of a spawned child through the cached platform
/// strategy. Fails with [`Error::UnsupportedPlatform`] when no strategy
/// matched at selection time.
pub fn resolve_pid_of(child: &Child) -> Result<Pid> {
    match selected_strategy() {
        Some(strategy) => strategy.resolve(child),
        None => Err(Error::UnsupportedPlatform),
    }
}
