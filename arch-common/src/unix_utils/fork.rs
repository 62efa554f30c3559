// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A `fork` that is safe to call after the process has crashed.
//!
//! glibc's `fork()` runs the registered atfork handlers and takes the malloc
//! and stdio locks before cloning. After heap corruption, or when the
//! crashing thread already holds one of those locks, that deadlocks. The
//! variant here goes straight to the kernel.

use nix::errno::Errno;
use nix::unistd::Pid;

/// Which side of the fork we are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forked {
    Child,
    Parent(Pid),
}

fn fork_result(res: i64) -> Result<Forked, Errno> {
    match res {
        0 => Ok(Forked::Child),
        pid if pid > 0 => {
            // The max value of a PID is configurable, but within an i32.
            let pid = libc::pid_t::try_from(pid).unwrap_or(libc::pid_t::MAX);
            Ok(Forked::Parent(Pid::from_raw(pid)))
        }
        _ => Err(Errno::last()),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn alt_fork() -> Result<Forked, Errno> {
    use libc::{
        c_ulong, c_void, pid_t, syscall, SYS_clone, CLONE_CHILD_CLEARTID, CLONE_CHILD_SETTID,
        CLONE_PTRACE, SIGCHLD,
    };

    let mut _ptid: pid_t = 0;
    let mut _ctid: pid_t = 0;

    // A traced parent wants to keep tracing the child.
    let extra_flags = if crate::debugger::is_attached() {
        CLONE_PTRACE
    } else {
        0
    };

    // Use the direct syscall interface into `clone()`.  This should replicate the parameters used
    // for glibc `fork()`, except of course without calling the atfork handlers.
    // SAFETY: the child only runs async-signal-safe code before exec or _exit.
    let res = unsafe {
        syscall(
            SYS_clone,
            (CLONE_CHILD_CLEARTID | CLONE_CHILD_SETTID | SIGCHLD | extra_flags) as c_ulong,
            std::ptr::null_mut::<c_void>(),
            &mut _ptid as *mut pid_t,
            &mut _ctid as *mut pid_t,
            0 as c_ulong,
        )
    };
    fork_result(res as i64)
}

/// There is a lower-level `__fork()` on macOS, but the runtime is much stricter about what the
/// child may do with it, which defeats the purpose. Other platforms live with the atfork
/// handlers.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn alt_fork() -> Result<Forked, Errno> {
    // SAFETY: the child only runs async-signal-safe code before exec or _exit.
    let res = unsafe { libc::fork() };
    fork_result(res as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};

    #[test]
    fn test_fork_result_mapping() {
        assert_eq!(fork_result(0), Ok(Forked::Child));
        assert_eq!(fork_result(42), Ok(Forked::Parent(Pid::from_raw(42))));
        assert!(fork_result(-1).is_err());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_alt_fork_child_exit_status() {
        match alt_fork().unwrap() {
            Forked::Child => unsafe { libc::_exit(7) },
            Forked::Parent(pid) => {
                assert_eq!(waitpid(pid, None).unwrap(), WaitStatus::Exited(pid, 7));
            }
        }
    }
}
