use anyhow::{Context, Result};
use nix::fcntl::{open, OFlag};
use nix::sched::{setns, CloneFlags};
use nix::sys::stat::Mode;
use nix::unistd::close;
use std::os::unix::io::RawFd;
use tracing::{debug, warn};

/// Namespace handle of the calling thread
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// An open network namespace.
///
/// `setns` only affects the calling OS thread, so everything run through
/// [`NetNs::run_in`] must stay on the thread that called it.
#[derive(Debug)]
pub struct NetNs {
    path: String,
    fd: RawFd,
}

impl NetNs {
    /// Open a network namespace by path
    pub fn open(path: &str) -> Result<Self> {
        let fd = open(path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty())
            .with_context(|| format!("Failed to open netns {:?}", path))?;
        Ok(Self {
            path: path.to_string(),
            fd,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute a function inside the namespace, then return to the
    /// original one
    pub fn run_in<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let orig_fd = open(THREAD_NETNS, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty())
            .context("Failed to open current netns")?;

        if let Err(e) = setns(self.fd, CloneFlags::CLONE_NEWNET) {
            let _ = close(orig_fd);
            return Err(e).with_context(|| format!("Failed to enter netns {}", self.path));
        }
        debug!("Entered netns {}", self.path);

        let result = f();

        let restored = setns(orig_fd, CloneFlags::CLONE_NEWNET)
            .context("Failed to restore original network namespace");
        let _ = close(orig_fd);
        restored?;
        debug!("Left netns {}", self.path);

        result
    }
}

impl Drop for NetNs {
    fn drop(&mut self) {
        if let Err(e) = close(self.fd) {
            warn!("Failed to close netns {}: {}", self.path, e);
        }
    }
}
