// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Stack traces and crash reports for a process that may already be falling apart.
//!
//! There are two ways in:
//! 1. Normal operation. [get_stack_trace], [print_stack_trace] and [log_stack_trace] capture and
//!    symbolize the calling thread's stack. They allocate freely and log through `tracing`.
//! 2. Fatal errors. [log_fatal_process_state] (called by the handlers of
//!    [register_crash_handlers], or directly) runs under the constraints of a signal handler:
//!    no allocation, no blocking locks.
//!    <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
//!    It writes a preamble to a fresh log file, announces it on stderr and runs an external
//!    postmortem command on it, which is what actually gathers the native stack. The command is
//!    started with a fork/exec that bypasses libc's locks and is killed if it takes too long.
//!
//! Everything a report needs is prepared in advance: the program name, the command templates
//! and the program info text are kept in a const-initialized process context, ready to be read
//! without allocating. Configure it with [init] and [configure], or piece by piece with the
//! setters.
#![cfg(unix)]

mod context;
mod invoker;
mod registry;
mod reporter;
mod session;
mod shared;
mod signal_handler_manager;
mod stack_trace;
mod symbolizer;
mod unwinder;

pub use context::{
    app_elapsed_time, app_launch_time, configure, fatal_stack_logging, init, is_app_crashing,
    program_info_for_errors, program_name_for_errors, set_extra_log_info_for_errors,
    set_fatal_stack_logging, set_process_state_log_command, set_program_info_for_errors,
    set_program_name_for_errors,
};
pub use invoker::{run_with_timeout, SpawnError};
pub use registry::ExtraLogLines;
pub use reporter::{log_current_process_state, log_fatal_process_state};
pub use session::{enable_session_logging, log_session_info, set_log_session};
pub use shared::configuration::{default_signals, CommandConfig, StackTraceConfiguration};
pub use shared::constants::*;
pub use signal_handler_manager::register_crash_handlers;
pub use stack_trace::{
    get_stack_frames, get_stack_trace, log_stack_trace, log_stack_trace_cstr, print_stack_trace,
};
pub use symbolizer::{
    current_symbolizer, get_stack_trace_callback, print_stack_frames, set_stack_trace_callback,
    stack_trace_lines, symbolize_frames, CallbackSymbolizer, DefaultSymbolizer, StackTraceCallback,
    Symbolizer,
};
pub use unwinder::{
    capture_frames, capture_frames_into, Execinfo, StackUnwinder, Unsupported, UnwindTables,
    UnwinderKind,
};
