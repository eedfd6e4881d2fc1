// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Read-only view over the live OS process table, independent of any
//! registry: it sees every process on the host, not just self-spawned ones.
//!
//! Scans are lazy. The OS resource backing an enumeration (the open procfs
//! directory on Unix, the snapshot handle on Windows) is released exactly
//! once when the scan is dropped, even if iteration stops early; calling
//! `find_by` again starts a fresh enumeration.

use crate::errors::Result;
use crate::pid::Pid;
use glob_match::glob_match;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Snapshot row from the system-wide enumeration. Not owned by any
/// registry; may describe a process that exits the moment after the scan.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub parent_pid: Option<Pid>,
    /// Short process name (`comm` on Linux, image base name on Windows).
    pub name: String,
    pub exe: Option<PathBuf>,
    pub cmdline: Vec<String>,
    pub uid: Option<u32>,
}

/// Filter predicates for process-table scans. Empty query matches every
/// process.
#[derive(Debug, Clone, Default)]
pub struct ProcessQuery {
    pid: Option<Pid>,
    name_pattern: Option<String>,
    exe: Option<PathBuf>,
    uid: Option<u32>,
}

impl ProcessQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Glob over the short name, e.g. `"postgres*"`.
    pub fn with_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    pub fn with_name_prefix(self, prefix: &str) -> Self {
        self.with_name_pattern(format!("{prefix}*"))
    }

    pub fn with_exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.exe = Some(exe.into());
        self
    }

    pub fn with_owner_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Owner filter by user name. `None` when no such user exists.
    #[cfg(unix)]
    pub fn with_owner_name(self, name: &str) -> Option<Self> {
        let user = uzers::get_user_by_name(name)?;
        Some(self.with_owner_uid(user.uid()))
    }

    pub fn matches(&self, info: &ProcessInfo) -> bool {
        if let Some(pid) = self.pid
            && info.pid != pid
        {
            return false;
        }
        if let Some(ref pattern) = self.name_pattern
            && !glob_match(pattern, &info.name)
        {
            return false;
        }
        if let Some(ref exe) = self.exe
            && info.exe.as_deref() != Some(exe.as_path())
        {
            return false;
        }
        if let Some(uid) = self.uid
            && info.uid != Some(uid)
        {
            return false;
        }
        true
    }
}

/// Process-wide singleton view over the OS process table.
pub fn process_table() -> &'static ProcessTable {
    static TABLE: OnceLock<ProcessTable> = OnceLock::new();
    TABLE.get_or_init(ProcessTable::from_env)
}

pub struct ProcessTable {
    #[cfg(unix)]
    proc_root: PathBuf,
}

impl ProcessTable {
    fn from_env() -> Self {
        #[cfg(unix)]
        {
            let proc_root = std::env::var("HOST_PROC")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/proc"));
            Self { proc_root }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    #[cfg(all(test, unix))]
    fn with_proc_root(proc_root: PathBuf) -> Self {
        Self { proc_root }
    }

    /// Lazy scan over all processes matching `query`. Entries that cannot be
    /// read (exited mid-scan, permission denied) are skipped, not errors.
    pub fn find_by(&self, query: &ProcessQuery) -> Result<ProcessScan> {
        ProcessScan::open(self, query.clone())
    }

    /// Count matches without materializing them.
    pub fn count_by(&self, query: &ProcessQuery) -> Result<usize> {
        Ok(self.find_by(query)?.count())
    }

    /// Point lookup by pid. `None` when absent or unreadable.
    pub fn find_one_by(&self, pid: Pid) -> Option<ProcessInfo> {
        #[cfg(unix)]
        {
            platform::read_entry(&self.proc_root, pid)
        }
        #[cfg(not(unix))]
        {
            self.find_by(&ProcessQuery::new().with_pid(pid))
                .ok()?
                .next()
        }
    }
}

pub use platform::ProcessScan;

#[cfg(unix)]
mod platform {
    use super::{ProcessInfo, ProcessQuery, ProcessTable};
    use crate::errors::{Error, Result};
    use crate::pid::Pid;
    use std::fs;
    use std::path::Path;

    /// Iterator over matching procfs entries. Dropping it closes the
    /// underlying directory handle.
    pub struct ProcessScan {
        query: ProcessQuery,
        dir: fs::ReadDir,
        proc_root: std::path::PathBuf,
    }

    impl ProcessScan {
        pub(super) fn open(table: &ProcessTable, query: ProcessQuery) -> Result<Self> {
            let dir = fs::read_dir(&table.proc_root).map_err(Error::Scan)?;
            Ok(Self {
                query,
                dir,
                proc_root: table.proc_root.clone(),
            })
        }
    }

    impl Iterator for ProcessScan {
        type Item = ProcessInfo;

        fn next(&mut self) -> Option<ProcessInfo> {
            for entry in self.dir.by_ref() {
                let Ok(entry) = entry else { continue };
                let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse().ok()) else {
                    // Non-numeric procfs entries (self, sys, ...) are not
                    // processes.
                    continue;
                };
                let Some(info) = read_entry(&self.proc_root, pid) else {
                    // Exited mid-scan or unreadable; skip the entry.
                    continue;
                };
                if self.query.matches(&info) {
                    return Some(info);
                }
            }
            None
        }
    }

    pub(super) fn read_entry(root: &Path, pid: Pid) -> Option<ProcessInfo> {
        let dir = root.join(pid.to_string());

        let name = fs::read_to_string(dir.join("comm"))
            .ok()?
            .trim_end()
            .to_string();

        // Command lines from proc can have trailing null bytes if the
        // process rewrote part of its argv.
        let raw_cmdline = fs::read_to_string(dir.join("cmdline")).unwrap_or_default();
        let cmdline: Vec<String> = raw_cmdline
            .trim_end_matches('\0')
            .split_terminator('\0')
            .map(String::from)
            .collect();

        // Often unreadable for foreign processes; that degrades the row,
        // it does not skip it.
        let exe = fs::read_link(dir.join("exe")).ok();

        let parent_pid = parse_ppid(&fs::read_to_string(dir.join("stat")).ok()?);

        let uid = {
            use std::os::unix::fs::MetadataExt;
            fs::metadata(&dir).ok().map(|m| m.uid())
        };

        Some(ProcessInfo {
            pid,
            parent_pid,
            name,
            exe,
            cmdline,
            uid,
        })
    }

    /// Field 4 of `/proc/<pid>/stat`. The comm field before it may contain
    /// spaces and parens, so parse from after the last `)`.
    fn parse_ppid(stat: &str) -> Option<Pid> {
        let (_, rest) = stat.rsplit_once(')')?;
        rest.split_whitespace().nth(1)?.parse().ok()
    }

}

#[cfg(windows)]
mod platform {
    use super::{ProcessInfo, ProcessQuery, ProcessTable};
    use crate::errors::{Error, Result};
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
        TH32CS_SNAPPROCESS,
    };

    struct SnapshotHandle(HANDLE);

    // SAFETY: a toolhelp snapshot handle is a kernel object reference with
    // no thread affinity.
    unsafe impl Send for SnapshotHandle {}

    impl Drop for SnapshotHandle {
        fn drop(&mut self) {
            // SAFETY: the handle came from CreateToolhelp32Snapshot and is
            // closed exactly once, here.
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    /// Iterator over a toolhelp process snapshot. Dropping it closes the
    /// snapshot handle.
    pub struct ProcessScan {
        query: ProcessQuery,
        snapshot: SnapshotHandle,
        first: bool,
    }

    impl ProcessScan {
        pub(super) fn open(_table: &ProcessTable, query: ProcessQuery) -> Result<Self> {
            // SAFETY: plain Win32 call; failure is reported via the handle.
            let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
            if snapshot == INVALID_HANDLE_VALUE {
                return Err(Error::Scan(std::io::Error::last_os_error()));
            }
            Ok(Self {
                query,
                snapshot: SnapshotHandle(snapshot),
                first: true,
            })
        }
    }

    impl Iterator for ProcessScan {
        type Item = ProcessInfo;

        fn next(&mut self) -> Option<ProcessInfo> {
            loop {
                // SAFETY: entry is a properly sized PROCESSENTRY32W and the
                // snapshot handle is live for the lifetime of self.
                let entry = unsafe {
                    let mut entry: PROCESSENTRY32W = std::mem::zeroed();
                    entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;
                    let ok = if self.first {
                        self.first = false;
                        Process32FirstW(self.snapshot.0, &mut entry)
                    } else {
                        Process32NextW(self.snapshot.0, &mut entry)
                    };
                    if ok == 0 {
                        return None;
                    }
                    entry
                };

                let len = entry
                    .szExeFile
                    .iter()
                    .position(|&c| c == 0)
                    .unwrap_or(entry.szExeFile.len());
                let name = String::from_utf16_lossy(&entry.szExeFile[..len]);

                let info = ProcessInfo {
                    pid: entry.th32ProcessID,
                    parent_pid: Some(entry.th32ParentProcessID),
                    name,
                    exe: None,
                    cmdline: Vec::new(),
                    uid: None,
                };
                if self.query.matches(&info) {
                    return Some(info);
                }
            }
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use super::{ProcessInfo, ProcessQuery, ProcessTable};
    use crate::errors::{Error, Result};

    pub struct ProcessScan {
        _query: ProcessQuery,
    }

    impl ProcessScan {
        pub(super) fn open(_table: &ProcessTable, _query: ProcessQuery) -> Result<Self> {
            Err(Error::UnsupportedPlatform)
        }
    }

    impl Iterator for ProcessScan {
        type Item = ProcessInfo;

        fn next(&mut self) -> Option<ProcessInfo> {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(pid: Pid, name: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            parent_pid: Some(1),
            name: name.to_string(),
            exe: Some(PathBuf::from(format!("/usr/bin/{name}"))),
            cmdline: vec![name.to_string()],
            uid: Some(1000),
        }
    }

    #[test]
    fn test_name_prefix_matching() {
        let query = ProcessQuery::new().with_name_prefix("be");
        let table = [info(1, "bert"), info(2, "bettina"), info(3, "philipp")];

        let matched: Vec<&str> = table
            .iter()
            .filter(|i| query.matches(i))
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(matched, vec!["bert", "bettina"]);
        assert_eq!(table.iter().filter(|i| query.matches(i)).count(), 2);
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let query = ProcessQuery::new();
        assert!(query.matches(&info(1, "bert")));
    }

    #[test]
    fn test_combined_predicates() {
        let query = ProcessQuery::new()
            .with_name_pattern("be*")
            .with_owner_uid(1000)
            .with_exe("/usr/bin/bert");
        assert!(query.matches(&info(1, "bert")));
        assert!(!query.matches(&info(2, "bettina")), "exe predicate differs");

        let other_owner = ProcessQuery::new().with_owner_uid(0);
        assert!(!other_owner.matches(&info(1, "bert")));
    }

    #[cfg(unix)]
    mod procfs {
        use super::*;
        use std::fs;

        fn fake_proc_entry(root: &std::path::Path, pid: u32, name: &str, ppid: u32) {
            let dir = root.join(pid.to_string());
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("comm"), format!("{name}\n")).unwrap();
            fs::write(dir.join("cmdline"), format!("{name}\0--serve\0")).unwrap();
            fs::write(
                dir.join("stat"),
                format!("{pid} ({name}) S {ppid} {pid} {pid} 0 -1 4194560"),
            )
            .unwrap();
        }

        #[test]
        fn test_scan_fake_proc_root() {
            let tmp = tempfile::tempdir().unwrap();
            fake_proc_entry(tmp.path(), 101, "bert", 1);
            fake_proc_entry(tmp.path(), 102, "bettina", 1);
            fake_proc_entry(tmp.path(), 103, "philipp", 1);
            // Vanished process: directory exists, files already gone.
            fs::create_dir(tmp.path().join("104")).unwrap();
            // Non-process procfs entries.
            fs::create_dir(tmp.path().join("sys")).unwrap();

            let table = ProcessTable::with_proc_root(tmp.path().to_path_buf());

            let query = ProcessQuery::new().with_name_prefix("be");
            let mut names: Vec<String> = table
                .find_by(&query)
                .unwrap()
                .map(|i| i.name)
                .collect();
            names.sort();
            assert_eq!(names, vec!["bert", "bettina"]);
            assert_eq!(table.count_by(&query).unwrap(), 2);
            assert_eq!(table.count_by(&ProcessQuery::new()).unwrap(), 3);
        }

        #[test]
        fn test_entry_fields() {
            let tmp = tempfile::tempdir().unwrap();
            fake_proc_entry(tmp.path(), 101, "bert", 42);

            let table = ProcessTable::with_proc_root(tmp.path().to_path_buf());
            let info = table.find_one_by(101).unwrap();
            assert_eq!(info.pid, 101);
            assert_eq!(info.parent_pid, Some(42));
            assert_eq!(info.name, "bert");
            assert_eq!(info.cmdline, vec!["bert", "--serve"]);
            assert!(info.exe.is_none(), "no exe link in the fake entry");
            assert!(info.uid.is_some());
        }

        #[test]
        fn test_find_one_by_missing_pid() {
            let tmp = tempfile::tempdir().unwrap();
            let table = ProcessTable::with_proc_root(tmp.path().to_path_buf());
            assert!(table.find_one_by(4_000_000).is_none());
        }

        #[test]
        fn test_abandoned_scan_releases_handle() {
            let tmp = tempfile::tempdir().unwrap();
            for pid in 1..=50 {
                fake_proc_entry(tmp.path(), pid, "proc", 1);
            }
            let table = ProcessTable::with_proc_root(tmp.path().to_path_buf());

            // Take one element and drop the rest of the scan.
            let mut scan = table.find_by(&ProcessQuery::new()).unwrap();
            assert!(scan.next().is_some());
            drop(scan);

            // A fresh scan restarts from the beginning.
            assert_eq!(table.count_by(&ProcessQuery::new()).unwrap(), 50);
        }

        #[test]
        fn test_live_proc_contains_self() {
            let table = process_table();
            let me = std::process::id();
            let info = table.find_one_by(me).expect("own pid must be readable");
            assert_eq!(info.pid, me);
            assert!(!info.name.is_empty());

            let query = ProcessQuery::new().with_pid(me);
            assert_eq!(table.count_by(&query).unwrap(), 1);
        }

        #[test]
        fn test_owner_name_lookup() {
            // root exists on every Unix test system.
            let query = ProcessQuery::new().with_owner_name("root").unwrap();
            assert!(!query.matches(&info(1, "bert")), "fake row has uid 1000");

            assert!(
                ProcessQuery::new()
                    .with_owner_name("no-such-user-procgen")
                    .is_none()
            );
        }
    }
}
