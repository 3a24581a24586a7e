//! Process group control for sandboxed children.
//!
//! Every child is moved into its own process group before exec, so a timeout
//! can take down the whole tree (shell plus grandchildren) with one signal
//! instead of orphaning workers.

use std::io;
use std::process::Child;
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::{self, Pid};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Signal classes for terminating a child's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KillSignal {
    Interrupt,
    Terminate,
    #[default]
    Kill,
}

#[cfg(unix)]
impl KillSignal {
    pub(crate) const fn to_signal(self) -> Signal {
        match self {
            Self::Interrupt => Signal::SIGINT,
            Self::Terminate => Signal::SIGTERM,
            Self::Kill => Signal::SIGKILL,
        }
    }
}

/// How a [`terminate_gracefully`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The child exited within the grace period after the polite signal.
    Graceful,
    /// The child had to be killed.
    Forced,
    /// The child was already dead when we looked.
    AlreadyExited,
}

/// Detach the calling process into its own process group. Must only be used
/// from `pre_exec`; it calls nothing that is unsafe after fork.
#[cfg(unix)]
pub(crate) fn enter_own_process_group() -> io::Result<()> {
    unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(io::Error::from)
}

/// Signal the process group led by `pid`. A group or process that is already
/// gone is not an error; the point of the call is that it stops running.
#[cfg(unix)]
pub fn kill_group(pid: u32, kill_signal: KillSignal) -> io::Result<()> {
    let pid = Pid::from_raw(pid as i32);
    let sig = kill_signal.to_signal();
    match unistd::getpgid(Some(pid)) {
        Ok(pgid) => match signal::killpg(pgid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(io::Error::from(err)),
        },
        Err(Errno::ESRCH) => Ok(()),
        // Group lookup failed for some other reason; fall back to signalling
        // the process directly.
        Err(_) => match signal::kill(pid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(io::Error::from(err)),
        },
    }
}

#[cfg(not(unix))]
pub fn kill_group(_pid: u32, _kill_signal: KillSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process groups are not supported on this platform",
    ))
}

/// Whether `pid` still exists. EPERM means it exists but belongs to someone
/// we may not signal, which still counts as running.
#[cfg(unix)]
pub fn is_running(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_running(_pid: u32) -> bool {
    false
}

/// Terminate a child politely, escalating to SIGKILL once `grace` runs out.
///
/// The first phase demotes [`KillSignal::Kill`] to SIGTERM so there is
/// always a window in which the child can clean up; the escalation covers
/// the rest. The child is reaped before returning.
pub fn terminate_gracefully(
    child: &mut Child,
    initial: KillSignal,
    grace: Duration,
) -> io::Result<TerminationOutcome> {
    if child.try_wait()?.is_some() {
        return Ok(TerminationOutcome::AlreadyExited);
    }

    #[cfg(unix)]
    {
        let polite = match initial {
            KillSignal::Kill => KillSignal::Terminate,
            other => other,
        };
        kill_group(child.id(), polite)?;

        let deadline = Instant::now() + grace;
        loop {
            if child.try_wait()?.is_some() {
                return Ok(TerminationOutcome::Graceful);
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        kill_group(child.id(), KillSignal::Kill)?;
        child.wait()?;
        Ok(TerminationOutcome::Forced)
    }

    #[cfg(not(unix))]
    {
        let _ = (initial, grace, Instant::now() + POLL_INTERVAL);
        child.kill()?;
        child.wait()?;
        Ok(TerminationOutcome::Forced)
    }
}
