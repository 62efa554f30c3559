// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! String and number handling for signal handlers.
//!
//! Contract for everything in this module: no heap allocation, no locks, no
//! libc call that is not async-signal-safe. Output goes into caller-provided
//! fixed-size buffers, and running out of room is reported as [OutOfSpace]
//! rather than silently truncating.
//! <https://man7.org/linux/man-pages/man7/signal-safety.7.html>

use std::ffi::{c_char, CStr};
use std::{fmt, io};

/// A fixed-size buffer was too small for the requested write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("fixed-size buffer is too small")]
pub struct OutOfSpace;

impl OutOfSpace {
    /// Not quite an accurate error code, but the closest errno there is.
    pub fn errno(self) -> i32 {
        libc::ENOMEM
    }
}

/// Minimum safe size for a buffer holding an `i64` in decimal ASCII.
pub const NUMERIC_BUFFER_SIZE: usize = i64::MAX.ilog10() as usize
    + 1 // sign
    + 1 // overflow (ilog10 doesn't count the high digit)
    + 1 // trailing NUL
    + 1; // spare

/// Number of characters in the decimal representation of `x`, sign included.
pub fn num_digits(x: i64) -> usize {
    let sign = usize::from(x < 0);
    let mut x = x.unsigned_abs();
    let mut result = 1;
    while x >= 10 {
        result += 1;
        x /= 10;
    }
    result + sign
}

/// Writes the decimal representation of `x` at the start of `buf` and returns
/// the number of bytes written. No terminator is written.
pub fn itoa(buf: &mut [u8], x: i64) -> Result<usize, OutOfSpace> {
    let len = num_digits(x);
    if buf.len() < len {
        return Err(OutOfSpace);
    }
    if x < 0 {
        buf[0] = b'-';
    }
    // Write each digit, starting with the 1's column, working backwards.
    let mut v = x.unsigned_abs();
    let mut i = len;
    loop {
        i -= 1;
        buf[i] = b'0' + (v % 10) as u8;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    Ok(len)
}

/// Length of a NUL-terminated string; a null pointer has length 0.
///
/// # Safety
/// `s` must be null or point to a NUL-terminated string.
pub unsafe fn strlen(s: *const c_char) -> usize {
    let mut len = 0;
    if !s.is_null() {
        while *s.add(len) != 0 {
            len += 1;
        }
    }
    len
}

/// Compares at most `n` bytes of two NUL-terminated strings.
///
/// # Safety
/// Both pointers must be null or point to NUL-terminated strings.
pub unsafe fn strneq(a: *const c_char, b: *const c_char, mut n: usize) -> bool {
    if a.is_null() || b.is_null() {
        return a == b;
    }
    let (mut a, mut b) = (a, b);
    while n > 0 && (*a != 0 || *b != 0) {
        if *a != *b {
            return false;
        }
        a = a.add(1);
        b = b.add(1);
        n -= 1;
    }
    true
}

/// Compares two NUL-terminated strings.
///
/// # Safety
/// Both pointers must be null or point to NUL-terminated strings.
pub unsafe fn streq(a: *const c_char, b: *const c_char) -> bool {
    strneq(a, b, usize::MAX)
}

/// Copies `src` to the start of `dst`, returning the number of bytes copied.
pub fn copy(dst: &mut [u8], src: &[u8]) -> Result<usize, OutOfSpace> {
    let target = dst.get_mut(..src.len()).ok_or(OutOfSpace)?;
    target.copy_from_slice(src);
    Ok(src.len())
}

/// A NUL-terminated string builder backed by an inline array.
///
/// Every push either fits completely or fails with [OutOfSpace] and leaves
/// the buffer untouched. The buffer always holds a terminator, so it can be
/// handed to C at any point.
pub struct FixedBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> FixedBuf<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes still available for content (the terminator is reserved).
    pub fn remaining(&self) -> usize {
        N.saturating_sub(self.len + 1)
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), OutOfSpace> {
        if bytes.len() > self.remaining() {
            return Err(OutOfSpace);
        }
        let end = self.len + bytes.len();
        self.buf[self.len..end].copy_from_slice(bytes);
        self.buf[end] = 0;
        self.len = end;
        Ok(())
    }

    pub fn push_str(&mut self, s: &str) -> Result<(), OutOfSpace> {
        self.push_bytes(s.as_bytes())
    }

    pub fn push_num(&mut self, x: i64) -> Result<(), OutOfSpace> {
        if num_digits(x) > self.remaining() {
            return Err(OutOfSpace);
        }
        let written = itoa(&mut self.buf[self.len..], x)?;
        self.len += written;
        self.buf[self.len] = 0;
        Ok(())
    }

    /// Shortens the content to `len` bytes. Longer lengths are ignored.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
            self.buf[len] = 0;
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_cstr(&self) -> &CStr {
        // A zero-sized buffer can't hold a terminator.
        CStr::from_bytes_until_nul(&self.buf[..]).unwrap_or(c"")
    }

    pub fn as_ptr(&self) -> *const c_char {
        self.as_cstr().as_ptr()
    }
}

impl<const N: usize> Default for FixedBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for FixedBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s).map_err(|_| fmt::Error)
    }
}

impl<const N: usize> fmt::Debug for FixedBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBuf")
            .field("capacity", &N)
            .field("content", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

/// Writes `bytes` to `fd` with `write(2)`, ignoring failures and leaving
/// `errno` as it was.
pub fn write_fd(fd: i32, bytes: &[u8]) {
    let saved = errno::errno();
    let _ = FdWriter::new(fd).write_all_raw(bytes);
    errno::set_errno(saved);
}

/// Unbuffered [io::Write] over a raw file descriptor.
///
/// `write!` through this type formats straight into `write(2)` calls, so it
/// can be used where `std::io::stderr()` (which locks) can't.
#[derive(Debug, Clone, Copy)]
pub struct FdWriter {
    fd: i32,
}

impl FdWriter {
    pub const fn new(fd: i32) -> Self {
        Self { fd }
    }

    pub const fn stderr() -> Self {
        Self::new(libc::STDERR_FILENO)
    }

    pub fn fd(&self) -> i32 {
        self.fd
    }

    fn write_all_raw(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            match io::Write::write(self, bytes) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => bytes = &bytes[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl io::Write for FdWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: the pointer and length come from a valid slice.
        let rval = unsafe { libc::write(self.fd, buf.as_ptr().cast(), buf.len()) };
        if rval < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rval as usize)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The process environment array.
///
/// # Safety
/// Reading `environ` races with concurrent `setenv`/`putenv` calls.
pub unsafe fn environ() -> *const *const c_char {
    #[cfg(target_vendor = "apple")]
    {
        *libc::_NSGetEnviron() as *const *const c_char
    }
    #[cfg(all(unix, not(target_vendor = "apple")))]
    {
        extern "C" {
            static mut environ: *const *const c_char;
        }
        *std::ptr::addr_of!(environ)
    }
    #[cfg(not(unix))]
    {
        std::ptr::null()
    }
}

/// Looks `name` up by scanning the raw environment array, without going
/// through libc's `getenv` (which may lock).
///
/// # Safety
/// See [environ]. The returned string is only valid until the environment
/// is next modified.
pub unsafe fn getenv(name: &CStr) -> Option<&'static CStr> {
    let env = environ();
    if env.is_null() {
        return None;
    }
    let name_len = name.to_bytes().len();
    let mut i = env;
    while !(*i).is_null() {
        let var = *i;
        if strneq(var, name.as_ptr(), name_len) && *var.add(name_len) == b'=' as c_char {
            return Some(CStr::from_ptr(var.add(name_len + 1)));
        }
        i = i.add(1);
    }
    None
}
