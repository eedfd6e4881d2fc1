// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process generation, registry, and resolution.
//!
//! Spawns OS processes locally or over a remote command transport under one
//! requirement/generator contract, resolves true OS pids through a platform
//! strategy chain, tracks self-spawned processes in a concurrent registry
//! that distinguishes transient from daemon lifetimes, and enumerates the
//! system-wide process table with filter queries.
//!
//! Log sink and format are owned by the embedding binary; this crate only
//! emits `log` events.

pub mod daemon;
pub mod errors;
pub mod generator;
pub mod pid;
pub mod process;
pub mod registry;
pub mod remote;
pub mod requirement;
pub mod table;

pub use daemon::{DEFAULT_PROBE_DELAY, ProcessDaemon, RemoteProcessDaemon};
pub use errors::{Error, ExitDetail, Result, StartCause, TransportError};
pub use generator::{LocalProcessGenerator, ProcessGenerator};
pub use pid::{Pid, resolve_pid_of};
pub use process::{DEFAULT_STOP_TIMEOUT, Generated, LocalProcess, TerminateMode};
pub use registry::GeneratedProcessRegistry;
pub use remote::{
    CommandChannel, CommandTransport, RemoteExecRequirement, RemoteId, RemoteProcess,
    RemoteProcessGenerator,
};
pub use requirement::{ExecRequirement, load_requirements};
pub use table::{ProcessInfo, ProcessQuery, ProcessScan, ProcessTable, process_table};
