// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::StackUnwinder;

/// Unwinds using the exception-handling tables (`_Unwind_Backtrace` on most unix targets).
#[derive(Debug, Clone, Copy, Default)]
pub struct UnwindTables;

impl StackUnwinder for UnwindTables {
    #[inline(never)]
    fn capture_into(&self, frames: &mut [usize], skip: usize) -> usize {
        // The tracer's own frames come first, and how many there are depends on inlining. Look
        // for this function on the stack and start at its caller. If it is never found, the
        // frames are kept from the top of the stack.
        let this_fn: fn(&Self, &mut [usize], usize) -> usize = Self::capture_into;
        let this_fn = this_fn as usize;
        let mut below_this_fn = true;
        let mut to_skip = skip;
        let mut len = 0;
        // Getting a backtrace on rust is not guaranteed to be signal safe
        // https://github.com/rust-lang/backtrace-rs/issues/414
        // Tracing without resolving only walks the tables, and never grows `frames`.
        // SAFETY: we do not hold any lock that the tracer could also need.
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                if below_this_fn && frame.symbol_address() as usize == this_fn {
                    below_this_fn = false;
                    to_skip = skip;
                    len = 0;
                } else if to_skip > 0 {
                    to_skip -= 1;
                } else if len < frames.len() {
                    frames[len] = frame.ip() as usize;
                    len += 1;
                } else if !below_this_fn {
                    return false;
                }
                true
            });
        }
        std::hint::black_box(len)
    }
}
