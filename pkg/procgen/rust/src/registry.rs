// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Concurrent bookkeeping of generated processes for one logical domain.
//!
//! Entries carry one of two lifetimes: transient entries are pruned by an
//! exit callback as soon as they turn terminal, daemon entries stay until
//! explicitly unregistered or the registry closes. Closing terminates and
//! awaits every tracked process, so nothing outlives the registry.

use crate::errors::{Error, Result};
use crate::process::{Generated, TerminateMode};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Registry of self-spawned processes, keyed by their resolved id. The id
/// type tags the domain at compile time; the qualifier names it.
///
/// Clones share the same underlying map. Must live inside a tokio runtime:
/// registering a transient entry spawns its reaper task.
pub struct GeneratedProcessRegistry<P: Generated> {
    domain: String,
    entries: Arc<RwLock<HashMap<P::Id, Arc<P>>>>,
    closed: Arc<AtomicBool>,
}

impl<P: Generated> Clone for GeneratedProcessRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            entries: Arc::clone(&self.entries),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<P: Generated> GeneratedProcessRegistry<P> {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn inconsistency(&self, detail: impl Into<String>) -> Error {
        Error::RegistryInconsistency {
            domain: self.domain.clone(),
            detail: detail.into(),
        }
    }

    /// Insert a generated process. A collision with a live entry is a
    /// contract violation; a terminal leftover under the same id (its reaper
    /// not yet run, or the OS reused a pid) is replaced.
    pub fn register(&self, process: P) -> Result<Arc<P>> {
        let process = Arc::new(process);
        let id = process.id();
        {
            let mut entries = self.entries.write().unwrap();
            // Checked under the write lock so an insert can never race a
            // concurrent close's drain.
            if self.closed.load(Ordering::SeqCst) {
                return Err(self.inconsistency(format!("register of {id} after close")));
            }
            if let Some(existing) = entries.get(&id) {
                if existing.is_alive() {
                    return Err(
                        self.inconsistency(format!("live entry already registered under id {id}"))
                    );
                }
                debug!("[{}] replacing terminal leftover entry {id}", self.domain);
            }
            entries.insert(id.clone(), Arc::clone(&process));
        }
        debug!(
            "[{}] registered {} process {id}",
            self.domain,
            if process.is_daemon() { "daemon" } else { "transient" }
        );
        self.spawn_reaper(id, &process);
        Ok(process)
    }

    /// Exit callback for transient entries: prune as soon as the process
    /// turns terminal. Daemon entries are never reaped here.
    fn spawn_reaper(&self, id: P::Id, process: &Arc<P>) {
        if process.is_daemon() {
            return;
        }
        let entries = Arc::clone(&self.entries);
        let domain = self.domain.clone();
        let process = Arc::clone(process);
        tokio::spawn(async move {
            process.wait().await;
            let mut entries = entries.write().unwrap();
            // Only remove the entry we registered; the id may have been
            // freed and re-registered in the meantime.
            if let Some(current) = entries.get(&id)
                && Arc::ptr_eq(current, &process)
            {
                entries.remove(&id);
                debug!("[{domain}] reaped transient process {id}");
            }
        });
    }

    /// Remove an entry without touching the process. A missing entry is a
    /// contract violation, surfaced rather than masked.
    pub fn unregister(&self, id: &P::Id) -> Result<Arc<P>> {
        let removed = self.entries.write().unwrap().remove(id);
        match removed {
            Some(process) => {
                debug!("[{}] unregistered {id}", self.domain);
                Ok(process)
            }
            None => Err(self.inconsistency(format!("no entry under id {id}"))),
        }
    }

    pub fn get(&self, id: &P::Id) -> Option<Arc<P>> {
        self.entries.read().unwrap().get(id).cloned()
    }

    /// Snapshot of the ids of tracked daemon entries. Transient entries are
    /// pruned on exit and never part of this view.
    pub fn get_all_ids(&self) -> HashSet<P::Id> {
        self.entries
            .read()
            .unwrap()
            .values()
            .filter(|p| p.is_daemon())
            .map(|p| p.id())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Drop all bookkeeping without terminating any process. Test and reset
    /// utility.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap();
        let dropped = entries.len();
        entries.clear();
        debug!(
            "[{}] cleared {dropped} entries, processes left running",
            self.domain
        );
    }

    /// Terminate and await every tracked process, then drop the bookkeeping.
    /// Runs at most once; later (or concurrent) calls return immediately.
    /// After close, `register` is rejected.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let processes: Vec<Arc<P>> = {
            let mut entries = self.entries.write().unwrap();
            entries.drain().map(|(_, p)| p).collect()
        };
        if processes.is_empty() {
            info!("[{}] registry closed (nothing tracked)", self.domain);
            return;
        }
        info!(
            "[{}] closing registry, stopping {} tracked process(es)",
            self.domain,
            processes.len()
        );

        for process in &processes {
            if !process.is_alive() {
                continue;
            }
            if let Err(e) = process.terminate(TerminateMode::Graceful).await {
                warn!(
                    "[{}] graceful terminate of {} failed: {e}",
                    self.domain,
                    process.id()
                );
            }
        }

        for process in &processes {
            if !process.is_alive() {
                continue;
            }
            let stop = process.stop_timeout();
            if process.wait_for(stop).await.is_err() {
                warn!(
                    "[{}] {} still running after {}s, forcing",
                    self.domain,
                    process.id(),
                    stop.as_secs()
                );
                let _ = process.terminate(TerminateMode::Forced).await;
                process.wait().await;
            }
        }
        info!("[{}] registry closed", self.domain);
    }
}
