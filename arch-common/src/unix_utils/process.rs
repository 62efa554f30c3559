// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libc::{_exit, EXIT_FAILURE};

/// Kills the program without raising an abort or calling at_exit
pub fn terminate() -> ! {
    exit_immediately(EXIT_FAILURE)
}

/// `_exit(code)`: no atexit handlers, no stdio flushing.
pub fn exit_immediately(code: i32) -> ! {
    // Safety: No preconditions
    unsafe { _exit(code) }
}

/// Starts a new session if stdin is a terminal.
///
/// Postmortem tools such as gdb fiddle with the controlling tty; when we run in the background
/// that blocks and the crash handler hangs. If stdin is not a TTY the child stays in our process
/// group, which batch schedulers rely on to clean up.
pub fn detach_from_terminal() {
    // Safety: both are async-signal-safe and have no preconditions.
    unsafe {
        if libc::isatty(libc::STDIN_FILENO) == 1 {
            libc::setsid();
        }
    }
}
