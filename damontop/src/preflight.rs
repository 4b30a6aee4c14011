//! Pre-flight checks for damontop
//!
//! Validates system requirements before touching DAMON or opening the perf
//! counter, with actionable messages when they aren't met.

#![allow(unsafe_code)] // geteuid() and flock() require unsafe

use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::damon::DebugfsDamon;

/// Default single-instance lock
pub const LOCK_PATH: &str = "/var/lock/damontop.lock";

/// Run all pre-flight checks before monitoring starts
pub fn run_preflight_checks(damon: &DebugfsDamon, numa: bool) -> Result<()> {
    check_privileges()?;
    check_damon(damon, numa)?;
    Ok(())
}

/// Check that we run as root; DAMON debugfs and perf tracepoints need it
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: damontop requires root privileges to drive DAMON.\n\n\
         Run with: sudo damontop ..."
    );
}

/// Check that the DAMON debugfs interface exists
fn check_damon(damon: &DebugfsDamon, numa: bool) -> Result<()> {
    if !damon.is_present() {
        bail!(
            "DAMON not found at {}\n\n\
             This usually means:\n\
             - The kernel is built without CONFIG_DAMON_DBGFS\n\
             - debugfs is not mounted (mount -t debugfs none /sys/kernel/debug)",
            damon.root().display()
        );
    }
    if numa && !damon.supports_numa() {
        bail!(
            "DAMON at {} has no numa_stat file.\n\n\
             --numa needs a kernel with DAMON NUMA accounting.",
            damon.root().display()
        );
    }
    Ok(())
}

/// Exclusive lock held for the lifetime of the session
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Take the single-instance lock; released when the returned guard drops
pub fn acquire_instance_lock(path: &Path) -> Result<InstanceLock> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))?;

    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            bail!("Another damontop instance is running (lock: {})", path.display());
        }
        return Err(err).with_context(|| format!("Failed to lock {}", path.display()));
    }

    Ok(InstanceLock { _file: file, path: path.to_path_buf() })
}

/// Check that every requested process exists
pub fn check_processes_exist(proc_root: &Path, pids: &[crate::domain::Pid]) -> Result<()> {
    for pid in pids {
        if !proc_root.join(pid.0.to_string()).exists() {
            bail!(
                "Process {} not found.\n\n\
                 Is the process still running? Check with: ps -p {}",
                pid.0,
                pid.0
            );
        }
    }
    Ok(())
}
