//! Debug attachment to a target process.
//!
//! This module provides the [`AttachedSession`] guard that owns the debug-trace grant
//! for a target process. The grant is acquired by [`attach`] (or
//! [`AttachedSession::attach_with`] for a custom [`Tracer`]) and released exactly once,
//! either through [`AttachedSession::detach`] or when the session is dropped.
//!
//! While a session is alive the thread whose id equals the pid (the thread-group
//! leader) is stopped. Other threads of a multithreaded target keep running and may
//! modify memory while it is being read.

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

/// Process identifier of a target process.
#[repr(transparent)]
#[derive(Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub struct Pid(libc::pid_t);

impl Pid {
    /// Creates a new process identifier.
    pub fn new(pid: libc::pid_t) -> Self {
        Pid(pid)
    }

    /// Returns the raw `pid_t` value.
    pub fn as_raw(&self) -> libc::pid_t {
        self.0
    }
}

impl Debug for Pid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Pid({})", self.0))
    }
}

impl Display for Pid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a string is not a valid process identifier.
#[derive(Debug, Error)]
#[error("invalid process id {input:?}: expected a non-negative integer")]
pub struct ParsePidError {
    input: String,
}

impl FromStr for Pid {
    type Err = ParsePidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(|pid| libc::pid_t::try_from(pid).ok())
            .map(Pid)
            .ok_or_else(|| ParsePidError {
                input: s.to_string(),
            })
    }
}

impl From<libc::pid_t> for Pid {
    fn from(value: libc::pid_t) -> Self {
        Pid(value)
    }
}

/// Errors that can occur while attaching to a target process.
#[derive(Debug, Error)]
pub enum AttachError {
    /// The attach request was refused: the process does not exist, has exited,
    /// is already traced, or we lack the privilege to trace it.
    #[error("failed to attach to process {pid}: {source}")]
    PermissionOrTarget {
        /// Target process
        pid: Pid,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },
    /// The attach succeeded but waiting for the target to stop failed.
    #[error("failed to wait for process {pid} to stop: {source}")]
    Wait {
        /// Target process
        pid: Pid,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },
}

/// Attach/detach primitive for a target process.
///
/// The production implementation is [`Ptrace`]. Implementors must guarantee that a
/// successful [`attach`](Tracer::attach) returns only once the target's leader thread
/// is stopped.
pub trait Tracer {
    /// Requests debug-trace access to `pid` and waits until its leader thread is stopped.
    ///
    /// # Errors
    ///
    /// Returns an [`AttachError`] if the request is refused or the wait fails.
    fn attach(&self, pid: Pid) -> Result<(), AttachError>;

    /// Releases debug-trace access to `pid`, resuming the target.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the detach request fails.
    fn detach(&self, pid: Pid) -> std::io::Result<()>;
}

/// [`Tracer`] backed by `ptrace(2)` and `waitpid(2)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ptrace;

impl Tracer for Ptrace {
    fn attach(&self, pid: Pid) -> Result<(), AttachError> {
        let r = unsafe {
            libc::ptrace(
                libc::PTRACE_ATTACH,
                pid.as_raw(),
                std::ptr::null_mut::<libc::c_void>(),
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if r == -1 {
            return Err(AttachError::PermissionOrTarget {
                pid,
                source: std::io::Error::last_os_error(),
            });
        }

        let mut status: libc::c_int = 0;
        loop {
            let w = unsafe { libc::waitpid(pid.as_raw(), &mut status, libc::__WALL) };
            if w != -1 {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            // we are attached, so the grant must not leak
            if let Err(e) = self.detach(pid) {
                warn!("Failed to detach from {} after wait failure: {}", pid, e);
            }
            return Err(AttachError::Wait { pid, source: err });
        }
        if libc::WIFSTOPPED(status) {
            debug!(
                "Process {} stopped with signal {}",
                pid,
                libc::WSTOPSIG(status)
            );
        } else {
            debug!("Process {} changed state without stopping: 0x{:x}", pid, status);
        }
        Ok(())
    }

    fn detach(&self, pid: Pid) -> std::io::Result<()> {
        let r = unsafe {
            libc::ptrace(
                libc::PTRACE_DETACH,
                pid.as_raw(),
                std::ptr::null_mut::<libc::c_void>(),
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if r == -1 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

/// An active debug-trace grant on a target process whose leader thread is stopped.
///
/// The grant is released when the session is detached or dropped, whichever comes
/// first. Detach failures are logged and otherwise ignored.
pub struct AttachedSession<T: Tracer = Ptrace> {
    pid: Pid,
    tracer: T,
    attached: bool,
}

/// Attaches to `pid` using [`Ptrace`].
///
/// # Errors
///
/// Returns [`AttachError::PermissionOrTarget`] if the process cannot be traced. No
/// retry is attempted.
pub fn attach(pid: Pid) -> Result<AttachedSession, AttachError> {
    AttachedSession::attach_with(Ptrace, pid)
}

impl<T: Tracer> AttachedSession<T> {
    /// Attaches to `pid` using the given tracer.
    ///
    /// # Errors
    ///
    /// Returns the tracer's [`AttachError`] if attaching fails.
    pub fn attach_with(tracer: T, pid: Pid) -> Result<Self, AttachError> {
        tracer.attach(pid)?;
        info!("Attached to process {}", pid);
        Ok(AttachedSession {
            pid,
            tracer,
            attached: true,
        })
    }

    /// Returns the target process.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Releases the debug-trace grant.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        match self.tracer.detach(self.pid) {
            Ok(()) => info!("Detached from process {}", self.pid),
            Err(e) => warn!("Failed to detach from process {}: {}", self.pid, e),
        }
    }
}

impl<T: Tracer> Drop for AttachedSession<T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Tracer that records calls instead of tracing.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingTracer {
        pub calls: Rc<RefCell<Vec<String>>>,
        pub refuse: bool,
        pub fail_detach: bool,
    }

    impl Tracer for RecordingTracer {
        fn attach(&self, pid: Pid) -> Result<(), AttachError> {
            self.calls.borrow_mut().push(format!("attach {}", pid));
            if self.refuse {
                return Err(AttachError::PermissionOrTarget {
                    pid,
                    source: std::io::Error::from_raw_os_error(libc::ESRCH),
                });
            }
            Ok(())
        }

        fn detach(&self, pid: Pid) -> std::io::Result<()> {
            self.calls.borrow_mut().push(format!("detach {}", pid));
            if self.fail_detach {
                return Err(std::io::Error::from_raw_os_error(libc::ESRCH));
            }
            Ok(())
        }
    }

    #[test]
    fn test_pid_parse() {
        assert_eq!("1234".parse::<Pid>().unwrap(), Pid::new(1234));
        assert_eq!("0".parse::<Pid>().unwrap(), Pid::new(0));
        assert!("-1".parse::<Pid>().is_err());
        assert!("abc".parse::<Pid>().is_err());
        assert!("".parse::<Pid>().is_err());
        assert!("4294967295".parse::<Pid>().is_err());
    }

    #[test]
    fn test_explicit_detach_releases_once() {
        let tracer = RecordingTracer::default();
        let calls = tracer.calls.clone();
        let session = AttachedSession::attach_with(tracer, Pid::new(42)).unwrap();
        assert_eq!(session.pid(), Pid::new(42));
        session.detach();
        assert_eq!(*calls.borrow(), vec!["attach 42", "detach 42"]);
    }

    #[test]
    fn test_drop_detaches() {
        let tracer = RecordingTracer::default();
        let calls = tracer.calls.clone();
        {
            let _session = AttachedSession::attach_with(tracer, Pid::new(7)).unwrap();
        }
        assert_eq!(*calls.borrow(), vec!["attach 7", "detach 7"]);
    }

    #[test]
    fn test_refused_attach_never_detaches() {
        let tracer = RecordingTracer {
            refuse: true,
            ..Default::default()
        };
        let calls = tracer.calls.clone();
        let res = AttachedSession::attach_with(tracer, Pid::new(9));
        assert!(matches!(res, Err(AttachError::PermissionOrTarget { .. })));
        assert_eq!(*calls.borrow(), vec!["attach 9"]);
    }

    #[test]
    fn test_failed_detach_is_not_fatal() {
        let tracer = RecordingTracer {
            fail_detach: true,
            ..Default::default()
        };
        let calls = tracer.calls.clone();
        let session = AttachedSession::attach_with(tracer, Pid::new(3)).unwrap();
        session.detach();
        assert_eq!(calls.borrow().len(), 2);
    }

    #[test]
    fn test_ptrace_attach_nonexistent() {
        // larger than the kernel's pid_max upper bound
        let res = attach(Pid::new(0x7fff_fff0));
        assert!(matches!(res, Err(AttachError::PermissionOrTarget { .. })));
    }
}
