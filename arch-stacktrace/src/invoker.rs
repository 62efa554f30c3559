// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A crash-safe `system()`.
//!
//! [run_with_timeout] forks without the atfork handlers, execs without libc's wrappers, and waits
//! with a hard timeout. It does not allocate and takes no locks, so it can run after a crash, from
//! a signal handler, or with a corrupted heap. The alarm it uses can interfere with `setitimer` or
//! other callers of `alarm`, so it is meant for the catastrophe path only.

// Note that this file makes use the following async-signal safe functions.
// <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
// - _exit
// - alarm
// - clone / fork
// - execve
// - isatty
// - kill
// - pthread_kill
// - pthread_self
// - setsid
// - sigaction
// - waitpid
// - write

use crate::shared::configuration::CommandConfig;
use arch_common::argv::ArgvBuf;
use arch_common::async_safe::{getenv, write_fd, FixedBuf, NUMERIC_BUFFER_SIZE};
use arch_common::unix_utils::{
    alt_fork, detach_from_terminal, exec_nonlocking, exit_immediately, Forked,
};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::ffi::{CStr, CString};
use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::time::Duration;

/// Exit status of the child when `exec` fails.
const EXEC_FAILED_STATUS: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    #[error("Unable to fork() crash handler: errno={}", *.0 as i32)]
    ForkFailed(Errno),
    #[error("Crash handler failed to exec")]
    ExecFailed,
    #[error("Crash handler died: signal={0}")]
    Signaled(i32),
    #[error("Crash handler wait failed: errno={}", *.0 as i32)]
    WaitFailed(Errno),
    #[error("Crash handler timed out")]
    TimedOut,
}

impl SpawnError {
    /// The errno-style code for the failure. Exec failures report `ENOENT` although the real
    /// cause may differ.
    pub fn errno(&self) -> i32 {
        match self {
            SpawnError::ForkFailed(e) | SpawnError::WaitFailed(e) => *e as i32,
            SpawnError::ExecFailed => libc::ENOENT,
            SpawnError::Signaled(_) => libc::EINTR,
            SpawnError::TimedOut => libc::EBUSY,
        }
    }
}

/// The thread blocked in `waitpid`, or 0.
static WAITER: AtomicUsize = AtomicUsize::new(0);

extern "C" fn wake_up(_signum: libc::c_int) {
    // The signal only has to interrupt `waitpid`. The alarm is process-directed, so pass it on if
    // the kernel picked some other thread.
    let waiter = WAITER.load(SeqCst);
    // SAFETY: `pthread_self` and `pthread_kill` are async-signal-safe.
    unsafe {
        if waiter != 0 && libc::pthread_self() as usize != waiter {
            libc::pthread_kill(waiter as libc::pthread_t, libc::SIGALRM);
        }
    }
}

/// Installs a do-nothing `SIGALRM` handler for the lifetime of the guard. The handler deliberately
/// lacks `SA_RESTART`, so a pending alarm interrupts `waitpid`.
///
/// On drop the alarm is cancelled and the previous handler restored, leaving `errno` untouched.
struct AlarmGuard {
    old: SigAction,
}

impl AlarmGuard {
    fn install() -> Result<Self, Errno> {
        let action = SigAction::new(
            SigHandler::Handler(wake_up),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: no preconditions.
        WAITER.store(unsafe { libc::pthread_self() } as usize, SeqCst);
        // SAFETY: the handler is async-signal-safe.
        let old = match unsafe { signal::sigaction(Signal::SIGALRM, &action) } {
            Ok(old) => old,
            Err(e) => {
                WAITER.store(0, SeqCst);
                return Err(e);
            }
        };
        Ok(Self { old })
    }
}

impl Drop for AlarmGuard {
    fn drop(&mut self) {
        let saved = errno::errno();
        // SAFETY: no preconditions.
        unsafe { libc::alarm(0) };
        // SAFETY: restores the handler that was installed before ours.
        let _ = unsafe { signal::sigaction(Signal::SIGALRM, &self.old) };
        WAITER.store(0, SeqCst);
        errno::set_errno(saved);
    }
}

/// Runs `path` with `argv` and waits up to `timeout` for it, killing it once the time is up.
///
/// `None` (or a zero duration) waits forever. The timeout has one second granularity; `progress`
/// is called about once a second while the child runs. Returns the child's exit status. Every
/// failure is also reported on stderr as a one line `FAIL: ...` message, and leaves its
/// [SpawnError::errno] in `errno`.
pub fn run_with_timeout(
    path: &CStr,
    argv: &ArgvBuf<'_>,
    timeout: Option<Duration>,
    progress: Option<&mut dyn FnMut()>,
) -> Result<i32, SpawnError> {
    let result = spawn_and_wait(path, argv, timeout, progress);
    if let Err(e) = &result {
        report_failure(e);
        errno::set_errno(errno::Errno(e.errno()));
    }
    result
}

fn spawn_and_wait(
    path: &CStr,
    argv: &ArgvBuf<'_>,
    timeout: Option<Duration>,
    mut progress: Option<&mut dyn FnMut()>,
) -> Result<i32, SpawnError> {
    let pid = match alt_fork() {
        Ok(Forked::Child) => exec_child(path, argv),
        Ok(Forked::Parent(pid)) => pid,
        Err(e) => return Err(SpawnError::ForkFailed(e)),
    };

    let _alarm = match AlarmGuard::install() {
        Ok(guard) => guard,
        Err(e) => {
            kill_and_reap(pid);
            return Err(SpawnError::WaitFailed(e));
        }
    };

    // Whole seconds, rounded up.
    let mut remaining = timeout
        .filter(|t| !t.is_zero())
        .map(|t| t.as_secs() + u64::from(t.subsec_nanos() > 0));
    loop {
        if remaining.is_some() {
            // SAFETY: no preconditions.
            unsafe { libc::alarm(1) };
        }
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, EXEC_FAILED_STATUS)) => return Err(SpawnError::ExecFailed),
            Ok(WaitStatus::Exited(_, status)) => return Ok(status),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Err(SpawnError::Signaled(signal as i32))
            }
            // Stopped/continued children are not reported without WUNTRACED/WCONTINUED.
            Ok(_) => {}
            Err(Errno::EINTR) => {}
            Err(e) => return Err(SpawnError::WaitFailed(e)),
        }

        if let Some(progress) = progress.as_mut() {
            progress();
        }
        if let Some(remaining) = remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                break;
            }
        }
    }

    // Timed out.
    // SAFETY: no preconditions. Turn off the alarm so it doesn't wake us during the kill.
    unsafe { libc::alarm(0) };
    kill_and_reap(pid);
    Err(SpawnError::TimedOut)
}

fn kill_and_reap(pid: Pid) {
    let _ = signal::kill(pid, Signal::SIGKILL);
    while let Err(Errno::EINTR) = waitpid(pid, None) {}
}

/// Runs in the forked child: no allocation, no locks, never returns.
fn exec_child(path: &CStr, argv: &ArgvBuf<'_>) -> ! {
    // Postmortem tools such as gdb want the tty; see `detach_from_terminal`.
    detach_from_terminal();
    let err = exec_nonlocking(path, argv);

    let mut errno_buf = FixedBuf::<NUMERIC_BUFFER_SIZE>::new();
    let _ = errno_buf.push_num(err as i64);
    write_fd(libc::STDERR_FILENO, b"FAIL: Unable to exec crash handler ");
    write_fd(libc::STDERR_FILENO, path.to_bytes());
    write_fd(libc::STDERR_FILENO, b": errno=");
    write_fd(libc::STDERR_FILENO, errno_buf.as_bytes());
    write_fd(libc::STDERR_FILENO, b"\n");
    exit_immediately(EXEC_FAILED_STATUS)
}

fn report_failure(error: &SpawnError) {
    let mut msg = FixedBuf::<128>::new();
    // The messages are short and fixed; on overflow the partial line is still useful.
    let _ = write!(msg, "FAIL: {error}");
    write_fd(libc::STDERR_FILENO, msg.as_bytes());
    write_fd(libc::STDERR_FILENO, b"\n");
}

/// An external command with argument templates for ordinary and fatal use, converted to C
/// strings up front so that running it needs no allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommandTemplate {
    command: Option<CString>,
    argv: Option<Vec<CString>>,
    fatal_argv: Option<Vec<CString>>,
}

fn to_cstrings<S: AsRef<str>>(args: &[S]) -> anyhow::Result<Vec<CString>> {
    args.iter()
        .map(|arg| CString::new(arg.as_ref()).map_err(anyhow::Error::from))
        .collect()
}

impl CommandTemplate {
    pub(crate) const fn empty() -> Self {
        Self {
            command: None,
            argv: None,
            fatal_argv: None,
        }
    }

    pub(crate) fn new(
        command: Option<&str>,
        argv: Option<&[&str]>,
        fatal_argv: Option<&[&str]>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            command: command.map(CString::new).transpose()?,
            argv: argv.map(to_cstrings).transpose()?,
            fatal_argv: fatal_argv.map(to_cstrings).transpose()?,
        })
    }

    pub(crate) fn from_config(config: &CommandConfig) -> anyhow::Result<Self> {
        Ok(Self {
            command: config.command.as_deref().map(CString::new).transpose()?,
            argv: config.argv.as_deref().map(to_cstrings).transpose()?,
            fatal_argv: config.fatal_argv.as_deref().map(to_cstrings).transpose()?,
        })
    }

    fn template(&self, fatal: bool) -> Option<&[CString]> {
        if fatal {
            self.fatal_argv.as_deref()
        } else {
            self.argv.as_deref()
        }
    }

    /// Fills in the template and runs the command, waiting at most `timeout`.
    ///
    /// The command named by the `env_override` environment variable takes precedence over the
    /// configured one. Returns false, without running anything, when there is no command or no
    /// template for this kind of invocation, or when the arguments do not fit; the latter is
    /// reported as `Too many arguments to <what> command`. Async-signal-safe.
    pub(crate) fn run(
        &self,
        env_override: &CStr,
        fatal: bool,
        substitutions: &[(&CStr, &CStr)],
        timeout: Duration,
        what: &str,
    ) -> bool {
        // SAFETY: the environment is not modified while reporting.
        let command = unsafe { getenv(env_override) }.or(self.command.as_deref());
        let (Some(command), Some(template)) = (command, self.template(fatal)) else {
            // Silently do nothing.
            return false;
        };
        let argv = match ArgvBuf::build(
            command,
            template.iter().map(CString::as_c_str),
            substitutions,
        ) {
            Ok(argv) => argv,
            Err(_) => {
                write_fd(libc::STDERR_FILENO, b"Too many arguments to ");
                write_fd(libc::STDERR_FILENO, what.as_bytes());
                write_fd(libc::STDERR_FILENO, b" command\n");
                return false;
            }
        };
        // The program run is the first argument after substitution, normally `$cmd`.
        let path = argv.get(0).unwrap_or(command);
        let _ = run_with_timeout(path, &argv, Some(timeout), None);
        true
    }
}
