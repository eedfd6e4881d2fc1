// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::process::DEFAULT_STOP_TIMEOUT;
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Immutable description of a local process to launch. Built once by the
/// caller, never mutated afterwards; generators only read it.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequirement {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Daemon processes stay registered until explicitly stopped; transient
    /// ones are pruned from the registry once they exit.
    #[serde(default)]
    pub daemon: bool,
    /// Seconds to allow between graceful and forced termination.
    #[serde(default)]
    pub stop_timeout: Option<u64>,
}

impl ExecRequirement {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            daemon: false,
            stop_timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
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

    /// Short label for log lines and process handles: the executable's base
    /// name, falling back to the full command.
    pub fn display_name(&self) -> String {
        Path::new(&self.command)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.command.clone())
    }
}

/// Scan a directory for `*.yaml` files and parse each into an ExecRequirement.
/// The requirement name is derived from the filename (without extension).
/// Files that fail to parse are logged and skipped.
pub fn load_requirements(dir: &Path) -> Result<Vec<(String, ExecRequirement)>> {
    let mut requirements = Vec::new();

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read requirement directory: {}", dir.display()))?;

    let mut yaml_files: Vec<_> = entries
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("skipping unreadable entry in {}: {e}", dir.display());
                None
            }
        })
        .filter(|e| {
            let is_yaml = e
                .path()
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                debug!("skipping non-YAML file: {}", e.path().display());
            }
            is_yaml
        })
        .collect();

    yaml_files.sort_by_key(|e| e.file_name());

    for entry in yaml_files {
        let path = entry.path();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        match parse_requirement(&path) {
            Ok(requirement) => requirements.push((name, requirement)),
            Err(e) => warn!("skipping {}: {e:#}", path.display()),
        }
    }

    Ok(requirements)
}

fn parse_requirement(path: &Path) -> Result<ExecRequirement> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let requirement: ExecRequirement =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    Ok(requirement)
}
