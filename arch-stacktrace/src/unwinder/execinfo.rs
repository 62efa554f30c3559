// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::StackUnwinder;

/// Unwinds with the libc `backtrace(3)` facility (glibc and Apple platforms).
#[derive(Debug, Clone, Copy, Default)]
pub struct Execinfo;

#[cfg(any(all(target_os = "linux", target_env = "gnu"), target_vendor = "apple"))]
mod sys {
    use libc::{c_int, c_void};

    extern "C" {
        pub fn backtrace(buffer: *mut *mut c_void, size: c_int) -> c_int;
    }
}

impl Execinfo {
    pub const AVAILABLE: bool = cfg!(any(
        all(target_os = "linux", target_env = "gnu"),
        target_vendor = "apple"
    ));
}

impl StackUnwinder for Execinfo {
    #[cfg(any(all(target_os = "linux", target_env = "gnu"), target_vendor = "apple"))]
    #[inline(never)]
    fn capture_into(&self, frames: &mut [usize], skip: usize) -> usize {
        // `backtrace` writes pointers, which have the same layout as `usize`. Its first entry is
        // this function. The skipped frames take up room in `frames`, so a deep stack loses
        // `skip + 1` frames at the outer end.
        let skip = skip.saturating_add(1);
        let size = libc::c_int::try_from(frames.len()).unwrap_or(libc::c_int::MAX);
        // SAFETY: `frames` has room for `size` pointer-sized entries.
        let captured = unsafe { sys::backtrace(frames.as_mut_ptr().cast(), size) };
        let captured = usize::try_from(captured).unwrap_or(0).min(frames.len());
        if skip >= captured {
            return 0;
        }
        frames.copy_within(skip..captured, 0);
        std::hint::black_box(captured - skip)
    }

    #[cfg(not(any(all(target_os = "linux", target_env = "gnu"), target_vendor = "apple")))]
    fn capture_into(&self, _frames: &mut [usize], _skip: usize) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_execinfo_capture() {
        let mut frames = [0usize; 32];
        let n = Execinfo.capture_into(&mut frames, 0);
        if Execinfo::AVAILABLE {
            assert!(n > 0);
            assert!(frames[..n].iter().all(|&ip| ip != 0));
        } else {
            assert_eq!(n, 0);
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_execinfo_skip() {
        let mut frames = [0usize; 4];
        assert_eq!(Execinfo.capture_into(&mut frames, 4), 0);
        assert_eq!(Execinfo.capture_into(&mut frames, 100), 0);
    }
}
