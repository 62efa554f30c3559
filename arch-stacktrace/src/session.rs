// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The session logger: an external command told about the end of every session, and about every
//! fatal stack trace, while fatal stack logging is enabled.

use crate::context::{app_elapsed_time, context, fatal_stack_logging, try_read, write, Names};
use crate::invoker::CommandTemplate;
use crate::shared::constants::{tokens, DEFAULT_PROGRAM_NAME, LOG_SESSION_ENV, SESSION_LOG_HEADER};
use arch_common::async_safe::{FixedBuf, NUMERIC_BUFFER_SIZE};
use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Once;

/// Sets the session logger and its argument templates: `argv` for the end of a session and
/// `crash_argv` for a fatal stack trace. Both may use `$cmd`, `$pid`, `$time` and `$prog`;
/// `crash_argv` may also use `$stack`, the path of the stack trace file.
pub fn set_log_session(
    command: Option<&str>,
    argv: Option<&[&str]>,
    crash_argv: Option<&[&str]>,
) -> anyhow::Result<()> {
    let template = CommandTemplate::new(command, argv, crash_argv)?;
    write(&context().commands).session = template;
    tracing::debug!(?command, "Set session logger");
    Ok(())
}

/// Arranges for [log_session_info] to run when the process exits. Only the first call has an
/// effect.
pub fn enable_session_logging() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        extern "C" fn at_exit() {
            log_session_info(None);
        }
        // SAFETY: `at_exit` is a plain function that stays valid for the life of the process.
        if unsafe { libc::atexit(at_exit) } != 0 {
            tracing::warn!("Unable to register the session logging exit hook");
        } else {
            tracing::debug!("Registered the session logging exit hook");
        }
    });
}

/// Runs the session logger if fatal stack logging is enabled, passing `crash_stack_trace` (the
/// path of a stack trace file) if there is one.
pub fn log_session_info(crash_stack_trace: Option<&CStr>) {
    if !fatal_stack_logging() {
        return;
    }
    let names = try_read(&context().names);
    let program = names
        .as_deref()
        .map_or(DEFAULT_PROGRAM_NAME, Names::program);
    invoke_session_logger(program, crash_stack_trace);
}

/// Async-signal-safe. Returns true if a command was run.
pub(crate) fn invoke_session_logger(program: &CStr, stack: Option<&CStr>) -> bool {
    let Some(commands) = try_read(&context().commands) else {
        return false;
    };

    let mut pid = FixedBuf::<NUMERIC_BUFFER_SIZE>::new();
    let mut time = FixedBuf::<NUMERIC_BUFFER_SIZE>::new();
    // SAFETY: no preconditions.
    let _ = pid.push_num(unsafe { libc::getpid() }.into());
    let _ = time.push_num(app_elapsed_time());
    let substitutions = [
        (tokens::PID, pid.as_cstr()),
        (tokens::TIME, time.as_cstr()),
        (tokens::PROG, program),
        (tokens::STACK, stack.unwrap_or(tokens::STACK)),
    ];
    // Without a stack, `$stack` is left as is.
    let substitutions = match stack {
        Some(_) => &substitutions[..],
        None => &substitutions[..3],
    };
    commands.session.run(
        LOG_SESSION_ENV,
        stack.is_some(),
        substitutions,
        commands.session_timeout,
        "log session",
    )
}

/// Completes a fatal stack trace written to `stack_file`.
///
/// Unless `crashing_hard`, the contents of `session_log` (if any) are appended to the file. The
/// file is then passed on to the session logger when fatal stack logging is enabled. With
/// `crashing_hard` nothing but the session logger is run, so it is usable from a signal handler.
pub(crate) fn finish_fatal_stack_trace(
    program: &CStr,
    stack_file: &CStr,
    session_log: Option<&Path>,
    crashing_hard: bool,
) {
    if !crashing_hard {
        if let Some(session_log) = session_log {
            let stack_path = Path::new(std::ffi::OsStr::from_bytes(stack_file.to_bytes()));
            if let Err(e) = append_session_log(stack_path, session_log) {
                tracing::warn!(?session_log, "Unable to append the session log: {e}");
            }
        }
    }

    if fatal_stack_logging() {
        invoke_session_logger(program, Some(stack_file));
    }
}

fn append_session_log(stack_file: &Path, session_log: &Path) -> io::Result<()> {
    let mut out = OpenOptions::new().append(true).open(stack_file)?;
    let mut log = File::open(session_log)?;
    out.write_all(SESSION_LOG_HEADER.as_bytes())?;
    io::copy(&mut log, &mut out)?;
    Ok(())
}
