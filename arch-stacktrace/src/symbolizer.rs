// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turning return addresses into `name+offset` strings.
//!
//! Resolution is pluggable: [DefaultSymbolizer] uses the symbol tables and debug information of
//! the loaded objects, and a process-wide callback ([set_stack_trace_callback]) replaces it, e.g.
//! to route lookups through a symbol server. Symbolization allocates and is not meant for signal
//! handlers.

use crate::context::{context, read, write};
use crate::shared::constants::{NO_FRAMES_MESSAGE, UNKNOWN_SYMBOL};
use std::ffi::{c_void, CStr};
use std::io;
use std::sync::Arc;
use symbolic_common::Name;
use symbolic_demangle::{Demangle, DemangleOptions};

/// Process-wide replacement for the default symbolizer.
pub type StackTraceCallback = Arc<dyn Fn(usize) -> String + Send + Sync>;

pub trait Symbolizer {
    /// A human readable description of the code at `address`, or `"<unknown>"`.
    fn symbolize(&self, address: usize) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSymbolizer;

impl Symbolizer for DefaultSymbolizer {
    fn symbolize(&self, address: usize) -> String {
        if address == 0 {
            return UNKNOWN_SYMBOL.to_string();
        }
        // Stack frames hold the address we return to, i.e. one past the call. Look up the byte
        // before it, which is inside the call instruction.
        let lookup = address - 1;
        if let Some((name, start)) = dynamic_symbol(lookup) {
            return format!("{}+{:#x}", demangle(&name), address.wrapping_sub(start));
        }

        // Not in the dynamic symbol table: fall back to the debug information, which names the
        // function but not where it starts. `resolve` expects a return address and does the
        // adjustment itself.
        let mut found = None;
        backtrace::resolve(address as *mut c_void, |symbol| {
            // Inlined frames are reported first; keep the enclosing function.
            if let Some(name) = symbol.name() {
                found = Some(match name.as_str() {
                    Some(raw) => demangle(raw),
                    None => name.to_string(),
                });
            }
        });
        found.unwrap_or_else(|| UNKNOWN_SYMBOL.to_string())
    }
}

/// Name and start address of the exported symbol containing `address`.
fn dynamic_symbol(address: usize) -> Option<(String, usize)> {
    // SAFETY: `dladdr` only writes into `info`, and the returned name points into the loaded
    // object's string table.
    unsafe {
        let mut info: libc::Dl_info = std::mem::zeroed();
        if libc::dladdr(address as *const c_void, &mut info) == 0
            || info.dli_sname.is_null()
            || info.dli_saddr.is_null()
        {
            return None;
        }
        let name = CStr::from_ptr(info.dli_sname)
            .to_string_lossy()
            .into_owned();
        Some((name, info.dli_saddr as usize))
    }
}

fn demangle(raw: &str) -> String {
    match Name::from(raw).demangle(DemangleOptions::name_only()) {
        Some(demangled) => demangled,
        None => raw.to_string(),
    }
}

/// Adapts a [StackTraceCallback] to [Symbolizer].
#[derive(Clone)]
pub struct CallbackSymbolizer(pub StackTraceCallback);

impl Symbolizer for CallbackSymbolizer {
    fn symbolize(&self, address: usize) -> String {
        (self.0)(address)
    }
}

/// Installs `callback` as the process-wide symbolizer; `None` restores the default.
pub fn set_stack_trace_callback(callback: Option<StackTraceCallback>) {
    tracing::debug!(custom = callback.is_some(), "Setting stack trace callback");
    *write(&context().stack_trace_callback) = callback;
}

pub fn get_stack_trace_callback() -> Option<StackTraceCallback> {
    read(&context().stack_trace_callback).clone()
}

/// The symbolizer currently in effect.
pub fn current_symbolizer() -> Box<dyn Symbolizer> {
    match get_stack_trace_callback() {
        Some(callback) => Box::new(CallbackSymbolizer(callback)),
        None => Box::new(DefaultSymbolizer),
    }
}

/// One line per frame, ` #<n> 0x<address> in <symbol>`.
///
/// With `skip_unknown_frames`, frames that do not resolve are left out and the remaining ones are
/// numbered from 0 without gaps. An empty `frames` yields a single line saying that stack traces
/// are not supported here.
pub fn symbolize_frames(
    symbolizer: &dyn Symbolizer,
    frames: &[usize],
    skip_unknown_frames: bool,
) -> Vec<String> {
    if frames.is_empty() {
        return vec![NO_FRAMES_MESSAGE.to_string()];
    }
    let mut lines = Vec::with_capacity(frames.len());
    for &address in frames {
        let symbol = symbolizer.symbolize(address);
        if skip_unknown_frames && symbol == UNKNOWN_SYMBOL {
            continue;
        }
        lines.push(format!(" #{:<3} {address:#018x} in {symbol}", lines.len()));
    }
    lines
}

/// [symbolize_frames] with the current symbolizer.
pub fn stack_trace_lines(frames: &[usize], skip_unknown_frames: bool) -> Vec<String> {
    symbolize_frames(current_symbolizer().as_ref(), frames, skip_unknown_frames)
}

pub fn print_stack_frames(
    w: &mut impl io::Write,
    frames: &[usize],
    skip_unknown_frames: bool,
) -> io::Result<()> {
    for line in stack_trace_lines(frames, skip_unknown_frames) {
        writeln!(w, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::GLOBAL_STATE;
    use arch_common::MutexExt;

    /// Resolves even addresses only.
    struct EvenOnly;

    impl Symbolizer for EvenOnly {
        fn symbolize(&self, address: usize) -> String {
            if address % 2 == 0 {
                format!("even+{address:#x}")
            } else {
                UNKNOWN_SYMBOL.to_string()
            }
        }
    }

    #[test]
    fn test_line_format() {
        let lines = symbolize_frames(&EvenOnly, &[0x1234], false);
        assert_eq!(lines, [" #0   0x0000000000001234 in even+0x1234"]);
    }

    #[test]
    fn test_length_matches_without_skipping() {
        let frames = [2, 3, 4, 5, 7];
        let lines = symbolize_frames(&EvenOnly, &frames, false);
        assert_eq!(lines.len(), frames.len());
        assert_eq!(
            lines.iter().filter(|l| l.ends_with(UNKNOWN_SYMBOL)).count(),
            3
        );
    }

    #[test]
    fn test_skipping_unknown_renumbers() {
        let frames = [3, 2, 5, 4];
        let lines = symbolize_frames(&EvenOnly, &frames, true);
        assert!(lines.len() <= frames.len());
        assert!(lines.iter().all(|l| !l.contains(UNKNOWN_SYMBOL)));
        assert!(lines[0].starts_with(" #0   0x0000000000000002"));
        assert!(lines[1].starts_with(" #1   0x0000000000000004"));
    }

    #[test]
    fn test_no_frames() {
        assert_eq!(
            symbolize_frames(&EvenOnly, &[], true),
            [NO_FRAMES_MESSAGE.to_string()]
        );
    }

    #[inline(never)]
    fn known_function() -> usize {
        known_function as usize
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_default_symbolizer_resolves_own_code() {
        // One past the function start, as a return address into it would be.
        let symbol = DefaultSymbolizer.symbolize(known_function() + 1);
        assert!(
            symbol == "known_function" || symbol.ends_with("::known_function"),
            "got {symbol}"
        );
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_default_symbolizer_reports_offset_of_exported_symbol() {
        // SAFETY: the name is NUL-terminated.
        let getpid = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c"getpid".as_ptr()) } as usize;
        assert_ne!(getpid, 0);
        let symbol = DefaultSymbolizer.symbolize(getpid + 1);
        assert!(symbol.contains("getpid+0x1"), "got {symbol}");
    }

    #[test]
    fn test_default_symbolizer_unknown_address() {
        assert_eq!(DefaultSymbolizer.symbolize(0), UNKNOWN_SYMBOL);
        assert_eq!(DefaultSymbolizer.symbolize(1), UNKNOWN_SYMBOL);
    }

    #[test]
    fn test_demangle() {
        assert_eq!(
            demangle("_ZN3std2rt10lang_start17h7a87e81ecc4a9d6cE"),
            "std::rt::lang_start"
        );
        assert_eq!(demangle("plain_c_symbol"), "plain_c_symbol");
    }

    #[test]
    fn test_callback_overrides_default() {
        let _guard = GLOBAL_STATE.lock_or_panic();
        set_stack_trace_callback(Some(Arc::new(|address| format!("custom@{address}"))));
        assert!(get_stack_trace_callback().is_some());
        assert_eq!(
            stack_trace_lines(&[7], false),
            [" #0   0x0000000000000007 in custom@7"]
        );

        let mut out = Vec::new();
        print_stack_frames(&mut out, &[7, 8], false).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            " #0   0x0000000000000007 in custom@7\n #1   0x0000000000000008 in custom@8\n"
        );

        set_stack_trace_callback(None);
        assert!(get_stack_trace_callback().is_none());
    }
}
