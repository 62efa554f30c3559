// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::argv::ArgvBuf;
use crate::async_safe::environ;
use nix::errno::Errno;
use std::ffi::CStr;

/// Replaces the process image; only returns on failure.
///
/// The counterpart to [super::alt_fork]: on Linux this is a direct `execve`
/// system call, because libc's wrappers can hang in a threaded process that
/// was forked without the atfork handlers. The current environment is passed
/// through.
pub fn exec_nonlocking(path: &CStr, argv: &ArgvBuf<'_>) -> Errno {
    // SAFETY: `path` and every entry of `argv` are NUL-terminated and `argv` is null-terminated;
    // `environ` is read in the child, which has no other threads.
    unsafe {
        let envp = environ();
        #[cfg(any(target_os = "linux", target_os = "android"))]
        libc::syscall(libc::SYS_execve, path.as_ptr(), argv.as_ptr(), envp);
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        libc::execve(path.as_ptr(), argv.as_ptr(), envp);
    }
    Errno::last()
}

#[cfg(test)]
mod tests {
    // exec replaces the test process, so it only runs in a forked child.
    use super::*;
    use crate::unix_utils::{alt_fork, Forked};
    use nix::sys::wait::{waitpid, WaitStatus};

    fn exec_in_child(path: &CStr, argv: &ArgvBuf<'_>) -> WaitStatus {
        match alt_fork().unwrap() {
            Forked::Child => {
                let err = exec_nonlocking(path, argv);
                unsafe { libc::_exit(100 + err as i32 % 100) }
            }
            Forked::Parent(pid) => waitpid(pid, None).unwrap(),
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_exec_runs_program() {
        let argv = ArgvBuf::build(c"/bin/sh", [c"$cmd", c"-c", c"exit 3"], &[]).unwrap();
        match exec_in_child(c"/bin/sh", &argv) {
            WaitStatus::Exited(_, code) => assert_eq!(code, 3),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_exec_missing_program_returns_errno() {
        let path = c"/definitely/not/a/program";
        let argv = ArgvBuf::build(path, [c"$cmd"], &[]).unwrap();
        match exec_in_child(path, &argv) {
            WaitStatus::Exited(_, code) => assert_eq!(code, 100 + libc::ENOENT % 100),
            other => panic!("unexpected status {other:?}"),
        }
    }
}
