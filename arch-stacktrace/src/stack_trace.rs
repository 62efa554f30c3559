// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stack traces of the calling thread for normal operation: as lines, printed to a writer, or
//! logged to a temporary file. Nothing here forks, and all of it allocates, so none of it belongs
//! in a signal handler; see [crate::reporter] for that.

use crate::context::{context, hostname, read, write_extra_log_info, write_program_info};
use crate::session::finish_fatal_stack_trace;
use crate::shared::constants::{LOG_STACK_RULE, MAX_HOSTNAME_LEN, MAX_STACK_DEPTH, STACK_TRACE_RULE};
use crate::symbolizer::{print_stack_frames, stack_trace_lines};
use crate::unwinder::capture_frames;
use arch_common::async_safe::FdWriter;
use std::ffi::{CStr, CString};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Return addresses of the caller's stack, innermost first, at most `max_depth` of them.
#[inline(never)]
pub fn get_stack_frames(max_depth: usize) -> Vec<usize> {
    // Skip this function, and keep it on the stack to be skipped.
    std::hint::black_box(capture_frames(max_depth, 1))
}

/// The caller's stack, symbolized, one line per frame.
#[inline(never)]
pub fn get_stack_trace(max_depth: usize) -> Vec<String> {
    stack_trace_lines(&capture_frames(max_depth, 1), false)
}

/// Prints the caller's stack between two rules of `=`.
#[inline(never)]
pub fn print_stack_trace(w: &mut impl Write, program_name: &str, reason: &str) -> io::Result<()> {
    writeln!(w, "{STACK_TRACE_RULE}")?;
    writeln!(
        w,
        " A stack trace has been requested by {program_name} because: {reason}"
    )?;
    print_stack_frames(w, &capture_frames(MAX_STACK_DEPTH, 1), false)?;
    writeln!(w, "{STACK_TRACE_RULE}")
}

/// Writes the caller's stack to a new file in the temporary directory and says where on stderr.
///
/// A `fatal` trace also gets the extra log info, and is finished like a crash report: the
/// contents of `session_log` are appended and the file goes to the session logger if fatal stack
/// logging is enabled. When no file can be created the trace goes to stderr instead.
#[inline(never)]
pub fn log_stack_trace(
    reason: &str,
    fatal: bool,
    session_log: Option<&Path>,
) -> anyhow::Result<()> {
    let (program, tmp_dir, prefix) = {
        let names = read(&context().names);
        (
            names.program().to_string_lossy().into_owned(),
            Path::new(std::ffi::OsStr::from_bytes(names.tmp_dir().to_bytes())).to_path_buf(),
            names.log_file_prefix().to_string_lossy().into_owned(),
        )
    };
    let mut stderr = FdWriter::stderr();

    writeln!(stderr, "{LOG_STACK_RULE}")?;
    writeln!(
        stderr,
        "A stack trace has been requested by {program} because of {reason}"
    )?;
    write_program_info(&mut stderr)?;

    let file = tempfile::Builder::new()
        .prefix(&format!("{prefix}_{program}"))
        .tempfile_in(&tmp_dir);
    match file {
        Ok(file) => {
            let (mut file, path) = file.keep()?;
            let mut host = [0u8; MAX_HOSTNAME_LEN];
            let host = String::from_utf8_lossy(hostname(&mut host)).into_owned();
            writeln!(
                stderr,
                "The stack can be found in {host}:{}",
                path.display()
            )?;
            writeln!(stderr, "{LOG_STACK_RULE}")?;
            tracing::info!(?path, fatal, "Logging stack trace");

            print_stack_trace(&mut file, &program, reason)?;
            if fatal {
                write_extra_log_info(&mut file, None)?;
            }
            file.flush()?;
            drop(file);
            if fatal {
                let program = CString::new(program)?;
                let path_c = CString::new(path.as_os_str().as_bytes())?;
                finish_fatal_stack_trace(&program, &path_c, session_log, false);
            }
        }
        Err(e) => {
            tracing::warn!(?tmp_dir, "Unable to create a stack trace file: {e}");
            writeln!(stderr, "{LOG_STACK_RULE}")?;
            print_stack_trace(&mut stderr, &program, reason)?;
            write_extra_log_info(&mut stderr, None)?;
        }
    }
    writeln!(stderr, "{LOG_STACK_RULE}")?;
    Ok(())
}

/// [log_stack_trace] for callers holding C strings.
pub fn log_stack_trace_cstr(reason: &CStr, fatal: bool) -> anyhow::Result<()> {
    log_stack_trace(&reason.to_string_lossy(), fatal, None)
}
