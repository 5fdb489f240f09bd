//! Process-group bookkeeping for spawned shell commands.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// How long to wait for output pipes after the child exits. Grandchildren
/// that inherited the pipes can keep them open past the child's exit.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Live process ids, shared between a gateway and its in-flight commands.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProcessTable {
    pids: Arc<Mutex<HashSet<u32>>>,
}

impl ProcessTable {
    fn lock(&self) -> MutexGuard<'_, HashSet<u32>> {
        // A panic while holding the lock cannot leave the set inconsistent.
        self.pids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Remove every entry and kill each process group. Returns the number
    /// of groups signalled.
    pub(crate) fn kill_all(&self) -> usize {
        let pids: Vec<u32> = self.lock().drain().collect();
        pids.into_iter()
            .filter(|pid| match kill_process_group(*pid) {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("Failed to kill process group {}: {}", pid, e);
                    false
                }
            })
            .count()
    }

    /// Track `pid` until the returned guard drops.
    pub(crate) fn register(&self, pid: Option<u32>) -> ProcessGuard {
        if let Some(pid) = pid {
            self.lock().insert(pid);
        }
        ProcessGuard {
            table: self.clone(),
            pid,
            reaped: false,
        }
    }
}

/// Keeps a process in the table while it runs.
///
/// Dropping the guard before [`ProcessGuard::reaped`] was called kills the
/// whole process group, so a cancelled caller never leaves children behind.
pub(crate) struct ProcessGuard {
    table: ProcessTable,
    pid: Option<u32>,
    reaped: bool,
}

impl ProcessGuard {
    /// Kill the group now. Used on timeout before waiting for the child.
    pub(crate) fn kill(&mut self) {
        if let Some(pid) = self.pid
            && let Err(e) = kill_process_group(pid)
        {
            log::debug!("Failed to kill process group {}: {}", pid, e);
        }
    }

    /// The child has been waited on; nothing left to kill.
    pub(crate) fn reaped(&mut self) {
        self.reaped = true;
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        if !self.reaped {
            let _ = kill_process_group(pid);
        }
        self.table.lock().remove(&pid);
    }
}

/// Read a child pipe to the end, lossily decoded.
pub(crate) async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Collect a reader task, giving up after [`PIPE_DRAIN_GRACE`].
pub(crate) async fn drain(task: Option<JoinHandle<String>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut task).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

/// SIGKILL the process group led by `pid`.
///
/// Commands are spawned as group leaders, so the group id equals the pid.
#[cfg(unix)]
pub(crate) fn kill_process_group(pid: u32) -> io::Result<()> {
    let result = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if result == -1 {
        let err = io::Error::last_os_error();
        // Already gone
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn kill_process_group(_pid: u32) -> io::Result<()> {
    Ok(())
}
