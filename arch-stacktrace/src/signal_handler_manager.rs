// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Crash signal handlers that write a fatal report before handing the signal on.

use crate::reporter::log_fatal_process_state;
use crate::shared::configuration::{signal_from_signum, StackTraceConfiguration};
use arch_common::async_safe::write_fd;
use arch_common::unix_utils::terminate;
use libc::{c_void, siginfo_t};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::ffi::CStr;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::OnceLock;

// Linux has the most signals, up to 64 inclusive.
// https://man7.org/linux/man-pages/man7/signal.7.html
const MAX_SIGNALS: usize = 65;

/// The disposition each signal had before ours was installed.
static PREVIOUS: [OnceLock<SigAction>; MAX_SIGNALS] = [const { OnceLock::new() }; MAX_SIGNALS];
static REGISTERED: AtomicBool = AtomicBool::new(false);

/// Installs the crash handlers for the configured signals. Each one writes a fatal report with
/// [log_fatal_process_state] and then hands the signal to whatever handler was installed before.
///
/// Handlers can be registered once per process; a second call is an error. A crash that arrives
/// after a handler is installed but before the previous disposition is recorded ends the process
/// after the report.
pub fn register_crash_handlers(config: &StackTraceConfiguration) -> anyhow::Result<()> {
    anyhow::ensure!(
        REGISTERED
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_ok(),
        "Crash handlers are already registered"
    );
    for &signum in config.signals() {
        anyhow::ensure!(
            (0..MAX_SIGNALS as i32).contains(&signum),
            "Signal {signum} is out of range"
        );
    }

    if config.create_alt_stack() {
        // SAFETY: runs once, guarded by `REGISTERED`.
        unsafe { install_alt_stack()? };
    }

    // Runtimes that check the stack pointer in their own handlers set up their own altstack, so
    // running on one and creating one are separate choices.
    let flags = if config.use_alt_stack() {
        SaFlags::SA_NODEFER | SaFlags::SA_ONSTACK
    } else {
        SaFlags::SA_NODEFER
    };
    let action = SigAction::new(
        SigHandler::SigAction(on_crash_signal),
        flags,
        SigSet::empty(),
    );

    let failures: Vec<String> = config
        .signals()
        .iter()
        .filter_map(|&signum| {
            install_handler(signum, &action)
                .err()
                .map(|e| format!("{signum}: {e:#}"))
        })
        .collect();
    anyhow::ensure!(
        failures.is_empty(),
        "Unable to register crash handlers for {failures:?}"
    );
    tracing::info!(signals = ?config.signals(), "Registered crash handlers");
    Ok(())
}

fn install_handler(signum: i32, action: &SigAction) -> anyhow::Result<()> {
    let signal = signal_from_signum(signum)?;
    let slot = PREVIOUS
        .get(signum as usize)
        .ok_or_else(|| anyhow::anyhow!("Signal {signum} is out of range"))?;
    // SAFETY: `on_crash_signal` only uses state that is valid before it is installed.
    let previous = unsafe { signal::sigaction(signal, action) }?;
    // `REGISTERED` admits one registration, so the slot is empty.
    let _ = slot.set(previous);
    Ok(())
}

/// The disposition `signum` had before [register_crash_handlers] replaced it.
fn previous_action(signum: i32) -> Option<&'static SigAction> {
    let index = usize::try_from(signum).ok()?;
    PREVIOUS.get(index)?.get()
}

/// The reason given in the report for `signum`.
fn signal_reason(signum: i32) -> &'static CStr {
    match Signal::try_from(signum) {
        Ok(Signal::SIGSEGV) => c"received SIGSEGV",
        Ok(Signal::SIGBUS) => c"received SIGBUS",
        Ok(Signal::SIGILL) => c"received SIGILL",
        Ok(Signal::SIGFPE) => c"received SIGFPE",
        Ok(Signal::SIGABRT) => c"received SIGABRT",
        Ok(Signal::SIGTRAP) => c"received SIGTRAP",
        Ok(Signal::SIGSYS) => c"received SIGSYS",
        Ok(Signal::SIGQUIT) => c"received SIGQUIT",
        Ok(Signal::SIGTERM) => c"received SIGTERM",
        _ => c"received a fatal signal",
    }
}

extern "C" fn on_crash_signal(signum: i32, info: *mut siginfo_t, ucontext: *mut c_void) {
    log_fatal_process_state(signal_reason(signum), None, None);
    // SAFETY: the arguments are the ones the kernel passed to this handler.
    unsafe { forward_signal(signum, info, ucontext) };
}

/// Hands the signal to the disposition it had before ours. A default disposition is restored and
/// the signal raised again, so that the process dies of it, core dump included.
///
/// <https://www.gnu.org/software/libc/manual/html_node/Signal-Handling.html>
unsafe fn forward_signal(signum: i32, info: *mut siginfo_t, ucontext: *mut c_void) {
    let (Some(previous), Ok(signal)) = (previous_action(signum), Signal::try_from(signum)) else {
        write_fd(
            libc::STDERR_FILENO,
            b"No previous handler recorded for the crash signal, exiting\n",
        );
        terminate()
    };
    match previous.handler() {
        SigHandler::SigDfl => {
            if signal::sigaction(signal, previous).is_err() {
                terminate()
            }
            libc::raise(signum);
        }
        SigHandler::SigIgn => {}
        SigHandler::Handler(f) => f(signum),
        SigHandler::SigAction(f) => f(signum, info, ucontext),
    }
}

/// Maps a stack for the crash handlers, with an inaccessible page below it so that running off
/// the end faults instead of overwriting other memory.
///
/// Reports format into stack buffers and the unwinder needs room of its own, so the stack is the
/// larger of `SIGSTKSZ` and 16 pages.
unsafe fn install_alt_stack() -> anyhow::Result<()> {
    let guard = page_size::get();
    let size = libc::SIGSTKSZ.max(16 * guard);
    let base = libc::mmap(
        ptr::null_mut(),
        guard + size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANON,
        -1,
        0,
    );
    anyhow::ensure!(
        base != libc::MAP_FAILED,
        "Unable to map a signal stack: {}",
        Errno::last()
    );
    anyhow::ensure!(
        libc::mprotect(base, guard, libc::PROT_NONE) == 0,
        "Unable to protect the signal stack guard page: {}",
        Errno::last()
    );
    let stack = libc::stack_t {
        ss_sp: base.cast::<u8>().add(guard).cast(),
        ss_flags: 0,
        ss_size: size,
    };
    anyhow::ensure!(
        libc::sigaltstack(&stack, ptr::null_mut()) == 0,
        "Unable to install the signal stack: {}",
        Errno::last()
    );
    tracing::debug!(size, "Installed signal stack");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_max_signals() {
        assert!(MAX_SIGNALS as libc::c_int > libc::SIGRTMAX());
    }

    #[test]
    fn test_signal_reason() {
        assert_eq!(signal_reason(libc::SIGSEGV), c"received SIGSEGV");
        assert_eq!(signal_reason(libc::SIGABRT), c"received SIGABRT");
        assert_eq!(signal_reason(libc::SIGUSR1), c"received a fatal signal");
        assert_eq!(signal_reason(-1), c"received a fatal signal");
    }

    #[test]
    fn test_previous_action_out_of_range() {
        assert!(previous_action(-1).is_none());
        assert!(previous_action(MAX_SIGNALS as i32).is_none());
        assert!(previous_action(i32::MAX).is_none());
    }
}
