// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::shared::constants::LOG_FILE_NAME_CAPACITY;
use arch_common::async_safe::{FixedBuf, OutOfSpace};
use nix::errno::Errno;
use std::ffi::CStr;
use std::os::fd::{FromRawFd, OwnedFd};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub(crate) enum LogFileError {
    #[error("log file name does not fit")]
    OutOfSpace(#[from] OutOfSpace),
    #[error("unable to create log file: errno={}", *.0 as i32)]
    Create(Errno),
}

impl LogFileError {
    pub(crate) fn errno(&self) -> i32 {
        match self {
            LogFileError::OutOfSpace(e) => e.errno(),
            LogFileError::Create(e) => *e as i32,
        }
    }
}

pub(crate) type LogFileName = FixedBuf<LOG_FILE_NAME_CAPACITY>;

/// A freshly created, empty crash log.
pub(crate) struct LogFile {
    pub(crate) name: LogFileName,
    pub(crate) fd: OwnedFd,
}

/// Exclusively creates `<dir>/<prefix>_<program>.<pid>`, or `<...>.<pid>.<n>` with the first free
/// `n` if that name is taken. Async-signal-safe.
pub(crate) fn create_unique_log_file(
    dir: &CStr,
    prefix: &CStr,
    program: &CStr,
    pid: i32,
) -> Result<LogFile, LogFileError> {
    let mut name = LogFileName::new();
    name.push_bytes(dir.to_bytes())?;
    name.push_str("/")?;
    name.push_bytes(prefix.to_bytes())?;
    name.push_str("_")?;
    name.push_bytes(program.to_bytes())?;
    name.push_str(".")?;
    name.push_num(pid.into())?;
    let base_len = name.len();

    let mut suffix: i64 = 0;
    loop {
        match open_exclusive(name.as_cstr()) {
            Ok(fd) => return Ok(LogFile { name, fd }),
            Err(Errno::EEXIST) => {}
            Err(e) => return Err(LogFileError::Create(e)),
        }
        // Taken: try the next suffix, if there's room for it.
        suffix += 1;
        name.truncate(base_len);
        name.push_str(".")?;
        if let Err(e) = name.push_num(suffix) {
            name.truncate(base_len);
            return Err(e.into());
        }
    }
}

fn open_exclusive(path: &CStr) -> Result<OwnedFd, Errno> {
    // SAFETY: `path` is NUL-terminated.
    let fd = unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC | libc::O_EXCL | libc::O_CLOEXEC,
            0o640 as libc::c_uint,
        )
    };
    if fd == -1 {
        Err(Errno::last())
    } else {
        // SAFETY: `open` just returned this descriptor and nothing else owns it.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn dir_cstring(dir: &tempfile::TempDir) -> CString {
        CString::new(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_name_layout() {
        let dir = tempfile::tempdir().unwrap();
        let dir_c = dir_cstring(&dir);
        let file = create_unique_log_file(&dir_c, c"st", c"app", 1234).unwrap();
        let expected = format!("{}/st_app.1234", dir.path().display());
        assert_eq!(file.name.as_cstr().to_str().unwrap(), expected);
        assert!(std::path::Path::new(&expected).exists());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_collisions_get_increasing_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let dir_c = dir_cstring(&dir);
        let names: Vec<String> = (0..3)
            .map(|_| {
                let file = create_unique_log_file(&dir_c, c"st", c"app", 42).unwrap();
                file.name.as_cstr().to_str().unwrap().to_string()
            })
            .collect();
        let base = format!("{}/st_app.42", dir.path().display());
        assert_eq!(
            names,
            [base.clone(), format!("{base}.1"), format!("{base}.2")]
        );
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_file_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let dir_c = dir_cstring(&dir);
        let file = create_unique_log_file(&dir_c, c"st", c"mode", 1).unwrap();
        let path = file.name.as_cstr().to_str().unwrap().to_string();
        let mode = std::fs::metadata(path).unwrap().permissions().mode() & 0o777;
        // The umask may only take bits away.
        assert_eq!(mode & !0o640, 0);
    }

    #[test]
    fn test_name_too_long() {
        let long = CString::new("d".repeat(LOG_FILE_NAME_CAPACITY)).unwrap();
        let err = create_unique_log_file(&long, c"st", c"app", 1)
            .err()
            .unwrap();
        assert_eq!(err, LogFileError::OutOfSpace(OutOfSpace));
        assert_eq!(err.errno(), libc::ENOMEM);
    }

    #[test]
    fn test_missing_directory() {
        let err = create_unique_log_file(c"/this/dir/does/not/exist", c"st", c"app", 1)
            .err()
            .unwrap();
        assert_eq!(err, LogFileError::Create(Errno::ENOENT));
    }
}
