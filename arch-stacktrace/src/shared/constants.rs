// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::ffi::CStr;
use std::time::Duration;

/// Upper bound on the number of frames captured for a single trace.
pub const MAX_STACK_DEPTH: usize = 4096;

pub const DEFAULT_PROGRAM_NAME: &CStr = c"libArch";
pub const DEFAULT_LOG_FILE_PREFIX: &str = "st";
pub const DEFAULT_TMP_DIR: &CStr = c"/tmp";

/// Overrides the configured postmortem command.
pub const POSTMORTEM_ENV: &CStr = c"ARCH_POSTMORTEM";
/// Overrides the configured session logger command.
pub const LOG_SESSION_ENV: &CStr = c"ARCH_LOGSESSION";

pub const DEFAULT_POSTMORTEM_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra log info lines echoed to stderr after a report.
pub const EXTRA_INFO_PREVIEW_LINES: usize = 3;
pub const MIN_BANNER_WIDTH: usize = 80;

/// Capacity of the log file name buffer, terminator included.
pub const LOG_FILE_NAME_CAPACITY: usize = 1024;
pub const MAX_HOSTNAME_LEN: usize = 256;

pub const UNKNOWN_SYMBOL: &str = "<unknown>";
pub const NO_FRAMES_MESSAGE: &str =
    "No frames saved, stack traces probably not supported on this architecture.";
pub const SESSION_LOG_HEADER: &str = "\n\n********** Session Log **********\n\n";
pub const STACK_TRACE_RULE: &str = "==============================================================";
pub const LOG_STACK_RULE: &str = "--------------------------------------------------------------";

/// Substitution tokens understood by the postmortem and session logger templates.
pub mod tokens {
    use std::ffi::CStr;

    pub const PID: &CStr = c"$pid";
    pub const LOG: &CStr = c"$log";
    pub const TIME: &CStr = c"$time";
    pub const REASON: &CStr = c"$reason";
    pub const PROG: &CStr = c"$prog";
    pub const STACK: &CStr = c"$stack";
}
