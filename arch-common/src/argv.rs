// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Argument-vector construction for commands launched from a crash handler.
//!
//! The vector lives in a fixed inline array so that building it never
//! allocates. A template argument that is exactly `$cmd` becomes the command
//! path; one that exactly matches a substitution key becomes the value;
//! anything else passes through untouched.

use std::ffi::{c_char, CStr};
use std::marker::PhantomData;

/// Maximum number of slots in an argument vector, terminator included.
pub const MAX_ARGS: usize = 32;

/// Token replaced by the command path itself.
pub const CMD_TOKEN: &CStr = c"$cmd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArgvError {
    #[error("Too many arguments ({0}), at most {max} are supported", max = MAX_ARGS - 2)]
    TooManyArguments(usize),
}

/// A NUL-terminated `argv` whose strings borrow from the command, the
/// template and the substitution values.
pub struct ArgvBuf<'a> {
    ptrs: [*const c_char; MAX_ARGS],
    len: usize,
    _strings: PhantomData<&'a CStr>,
}

impl<'a> ArgvBuf<'a> {
    pub fn build<I>(
        cmd: &'a CStr,
        template: I,
        substitutions: &[(&CStr, &'a CStr)],
    ) -> Result<Self, ArgvError>
    where
        I: IntoIterator<Item = &'a CStr>,
        I::IntoIter: ExactSizeIterator,
    {
        let template = template.into_iter();
        let n = template.len();
        // One slot for the terminator, and stay one below the limit.
        if n + 1 >= MAX_ARGS {
            return Err(ArgvError::TooManyArguments(n));
        }

        let mut ptrs = [std::ptr::null(); MAX_ARGS];
        for (slot, arg) in ptrs.iter_mut().zip(template) {
            let value = if arg == CMD_TOKEN {
                cmd
            } else {
                substitutions
                    .iter()
                    .find(|(token, _)| *token == arg)
                    .map_or(arg, |(_, value)| *value)
            };
            *slot = value.as_ptr();
        }

        Ok(Self {
            ptrs,
            len: n,
            _strings: PhantomData,
        })
    }

    /// Number of arguments, not counting the terminator.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer suitable for `execv`; valid while `self` is.
    pub fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }

    pub fn get(&self, index: usize) -> Option<&'a CStr> {
        if index < self.len {
            // SAFETY: every non-terminator slot was filled from a `&'a CStr`.
            Some(unsafe { CStr::from_ptr(self.ptrs[index]) })
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a CStr> + '_ {
        (0..self.len).filter_map(|i| self.get(i))
    }
}

impl std::fmt::Debug for ArgvBuf<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_cmd_and_tokens() {
        let template = [c"$cmd", c"-f", c"$log"];
        let argv = ArgvBuf::build(c"/bin/tool", template, &[(c"$log", c"/tmp/x")]).unwrap();
        let args: Vec<&CStr> = argv.iter().collect();
        assert_eq!(args, [c"/bin/tool", c"-f", c"/tmp/x"]);
        assert_eq!(argv.len(), 3);
        // The vector is terminated.
        assert!(unsafe { *argv.as_ptr().add(3) }.is_null());
    }

    #[test]
    fn test_unknown_tokens_pass_through() {
        let template = [c"$cmd", c"$pid", c"--reason", c"$reason"];
        let argv = ArgvBuf::build(
            c"/usr/bin/pm",
            template,
            &[(c"$pid", c"1234"), (c"$time", c"5")],
        )
        .unwrap();
        let args: Vec<&CStr> = argv.iter().collect();
        assert_eq!(args, [c"/usr/bin/pm", c"1234", c"--reason", c"$reason"]);
    }

    #[test]
    fn test_only_exact_matches_are_substituted() {
        let template = [c"$cmd", c"$logfile", c"x$log"];
        let argv = ArgvBuf::build(c"/bin/sh", template, &[(c"$log", c"/tmp/x")]).unwrap();
        let args: Vec<&CStr> = argv.iter().collect();
        assert_eq!(args, [c"/bin/sh", c"$logfile", c"x$log"]);
    }

    #[test]
    fn test_empty_template() {
        let argv = ArgvBuf::build(c"/bin/true", [], &[]).unwrap();
        assert!(argv.is_empty());
        assert!(argv.get(0).is_none());
        assert!(unsafe { *argv.as_ptr() }.is_null());
    }

    #[test]
    fn test_too_many_arguments() {
        let template = [c"a"; MAX_ARGS - 2];
        assert!(ArgvBuf::build(c"/bin/echo", template, &[]).is_ok());

        let template = [c"a"; MAX_ARGS - 1];
        assert_eq!(
            ArgvBuf::build(c"/bin/echo", template, &[]).unwrap_err(),
            ArgvError::TooManyArguments(MAX_ARGS - 1)
        );
    }
}
