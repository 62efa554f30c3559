// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Debugger detection.

/// Returns true if a tracer (debugger, `strace`, ...) is attached to this
/// process. Platforms without a cheap check report false.
///
/// Reads `/proc/self/status` through a fixed stack buffer, so it is usable
/// from a signal handler.
pub fn is_attached() -> bool {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        procfs::is_being_traced().unwrap_or(false)
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        false
    }
}

/// Stops in the attached debugger.
pub fn trap() {
    #[cfg(unix)]
    {
        // SAFETY: no preconditions.
        unsafe { libc::raise(libc::SIGTRAP) };
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) mod procfs {
    use std::fs::File;
    use std::io::{self, Read};

    pub(crate) const BUFFER_SIZE: usize = 1024;
    const TRACER_PID_MARKER: &[u8] = b"TracerPid:";

    pub(crate) fn is_being_traced() -> io::Result<bool> {
        // Check to see whether we are being traced.  This will fail on systems where procfs is
        // unavailable, but presumably in those systems `ptrace()` is also unavailable.
        // The caller is free to treat a failure as a false.
        let file = File::open("/proc/self/status")?;
        Ok(tracer_pid(file)?.is_some_and(|pid| pid != 0))
    }

    /// Parses the `TracerPid:` line of a status file without heap allocation,
    /// reading line by line through a fixed buffer.
    pub(crate) fn tracer_pid(mut file: impl Read) -> io::Result<Option<i64>> {
        let mut buffer = [0u8; BUFFER_SIZE];
        let mut data_len = 0;
        // Set while skipping the tail of a line that did not fit in the buffer.
        let mut discarding = false;

        loop {
            let n = file.read(&mut buffer[data_len..])?;
            let eof = n == 0;
            data_len += n;

            let mut offset = 0;
            while let Some(pos) = buffer[offset..data_len].iter().position(|&b| b == b'\n') {
                let line = &buffer[offset..offset + pos];
                if !discarding {
                    if let Some(pid) = parse_line(line) {
                        return Ok(Some(pid));
                    }
                }
                discarding = false;
                offset += pos + 1;
            }

            if eof {
                let line = &buffer[offset..data_len];
                return Ok(if discarding { None } else { parse_line(line) });
            }

            // Keep the partial line; if it fills the whole buffer it is too
            // long to be the one we want, so drop it.
            buffer.copy_within(offset..data_len, 0);
            data_len -= offset;
            if data_len == BUFFER_SIZE {
                data_len = 0;
                discarding = true;
            }
        }
    }

    fn parse_line(line: &[u8]) -> Option<i64> {
        let value = line.strip_prefix(TRACER_PID_MARKER)?;
        let digits = value.trim_ascii();
        if digits.is_empty() {
            return None;
        }
        digits.iter().try_fold(0i64, |acc, &b| {
            b.is_ascii_digit()
                .then(|| acc.saturating_mul(10).saturating_add(i64::from(b - b'0')))
        })
    }
}
