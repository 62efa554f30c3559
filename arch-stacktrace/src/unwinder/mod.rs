// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Capturing the return addresses of the current thread.
//!
//! Which mechanism does the work is decided in one place, [UnwinderKind::unwinder]; callers only
//! see [StackUnwinder]. None of the unwinders allocate: they fill a caller-provided slice and stop
//! when it is full. An empty result means "not supported here", not "no stack".

mod execinfo;
mod unwind_tables;

use crate::context;
use serde::{Deserialize, Serialize};

pub use execinfo::Execinfo;
pub use unwind_tables::UnwindTables;

pub trait StackUnwinder: Sync {
    /// Fills `frames` with return addresses, innermost first, starting at the caller of
    /// `capture_into` and after discarding the first `skip` frames. Returns the number of entries
    /// written. Stops early, without error, once `frames` is full.
    fn capture_into(&self, frames: &mut [usize], skip: usize) -> usize;
}

/// Platforms without a usable capture mechanism.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

impl StackUnwinder for Unsupported {
    fn capture_into(&self, _frames: &mut [usize], _skip: usize) -> usize {
        0
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnwinderKind {
    /// Walks the exception-unwind tables. The most precise option, and the default.
    #[default]
    UnwindTables,
    /// The platform's `backtrace(3)`, where there is one.
    Execinfo,
    Unsupported,
}

impl UnwinderKind {
    pub fn unwinder(self) -> &'static dyn StackUnwinder {
        match self {
            UnwinderKind::UnwindTables => &UnwindTables,
            UnwinderKind::Execinfo if Execinfo::AVAILABLE => &Execinfo,
            UnwinderKind::Execinfo | UnwinderKind::Unsupported => &Unsupported,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => UnwinderKind::UnwindTables,
            1 => UnwinderKind::Execinfo,
            _ => UnwinderKind::Unsupported,
        }
    }
}

/// Captures at most `max_depth` frames of the current thread with the configured unwinder. The
/// first frame is the caller of `capture_frames`, or `skip` frames further out.
///
/// The result is allocated up front for `max_depth` entries and never grows.
#[inline(never)]
pub fn capture_frames(max_depth: usize, skip: usize) -> Vec<usize> {
    let mut frames = vec![0; max_depth];
    let len = capture_frames_into(&mut frames, skip.saturating_add(1));
    frames.truncate(len);
    frames
}

/// Allocation-free form of [capture_frames], usable from a signal handler.
#[inline(never)]
pub fn capture_frames_into(frames: &mut [usize], skip: usize) -> usize {
    if frames.is_empty() {
        return 0;
    }
    let unwinder = context::unwinder_kind().unwinder();
    // Not a tail call, so that this frame is still on the stack to be skipped.
    std::hint::black_box(unwinder.capture_into(frames, skip.saturating_add(1)))
}
