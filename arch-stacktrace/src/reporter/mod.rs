// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fatal and non-fatal process state reports.
//!
//! A report creates a fresh log file, writes a short preamble into it, announces it on stderr and
//! then hands the file to the postmortem command, which appends the native stack and whatever
//! else it knows how to collect.
//!
//! Everything from here on may run in a signal handler, so it sticks to fixed buffers, raw
//! `write(2)` and `try_lock`. The one exception is the banner, which renders the registries when
//! their locks happen to be free; this is best effort rather than strictly async-signal-safe.

mod banner;
mod log_file;

use crate::context::{
    app_elapsed_time, context, hostname, set_app_crashing, trap_on_debugger, try_read,
    write_extra_log_info, write_program_info, Names,
};
use crate::session::finish_fatal_stack_trace;
use crate::shared::constants::{
    tokens, DEFAULT_PROGRAM_NAME, DEFAULT_TMP_DIR, EXTRA_INFO_PREVIEW_LINES, MAX_HOSTNAME_LEN,
    POSTMORTEM_ENV,
};
use arch_common::async_safe::{write_fd, FdWriter, FixedBuf, NUMERIC_BUFFER_SIZE};
use arch_common::debugger;
use arch_common::unix_utils::exit_immediately;
use banner::Banner;
use log_file::create_unique_log_file;
use std::ffi::CStr;
use std::io::{self, Write};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::AtomicUsize;

/// Lets one report run at a time.
///
/// Waiting is a spin with `sched_yield`, which works from a signal handler where blocking locks
/// do not. A thread that asks again while it already holds the lock is refused instead of spinning
/// forever: that only happens when reporting itself crashed. The lock word is the owning thread,
/// or 0 when free, so taking the lock and recording the owner are one step.
pub(crate) struct ReportLock {
    owner: AtomicUsize,
}

pub(crate) struct ReportGuard<'a> {
    lock: &'a ReportLock,
}

const UNLOCKED: usize = 0;

fn current_thread() -> usize {
    // SAFETY: no preconditions.
    unsafe { libc::pthread_self() as usize }
}

impl ReportLock {
    pub(crate) const fn new() -> Self {
        Self {
            owner: AtomicUsize::new(UNLOCKED),
        }
    }

    /// Waits until no other thread is reporting. `None` if this thread already is.
    pub(crate) fn acquire(&self) -> Option<ReportGuard<'_>> {
        let me = current_thread();
        loop {
            match self
                .owner
                .compare_exchange_weak(UNLOCKED, me, Acquire, Relaxed)
            {
                Ok(_) => return Some(ReportGuard { lock: self }),
                Err(owner) if owner == me => return None,
                Err(_) => std::thread::yield_now(),
            }
        }
    }
}

impl Drop for ReportGuard<'_> {
    fn drop(&mut self) {
        self.lock.owner.store(UNLOCKED, Release);
    }
}

/// Reports a fatal error: sets the crash flag, writes a crash report and runs the postmortem
/// command's fatal template on it.
///
/// Safe to call from a signal handler. Concurrent calls are serialized; a nested call from the
/// thread that is already reporting returns immediately.
pub fn log_fatal_process_state(reason: &CStr, message: Option<&CStr>, extra: Option<&CStr>) {
    log_process_state(true, reason, message, extra);
}

/// Like [log_fatal_process_state], for a process that is going to keep running: the crash flag
/// is left alone and the postmortem command's non-fatal template is used.
pub fn log_current_process_state(reason: &CStr, message: Option<&CStr>, extra: Option<&CStr>) {
    log_process_state(false, reason, message, extra);
}

fn log_process_state(fatal: bool, reason: &CStr, message: Option<&CStr>, extra: Option<&CStr>) {
    let Some(_report) = context().report_lock.acquire() else {
        return;
    };

    if fatal {
        set_app_crashing();
    }

    // A debugger takes precedence over any file-based diagnostics.
    if trap_on_debugger() && debugger::is_attached() {
        debugger::trap();
        exit_immediately(0);
    }

    let names = try_read(&context().names);
    let program = names
        .as_deref()
        .map_or(DEFAULT_PROGRAM_NAME, Names::program);
    let tmp_dir = names.as_deref().map_or(DEFAULT_TMP_DIR, Names::tmp_dir);
    let prefix = names.as_deref().map_or(c"st", Names::log_file_prefix);

    // SAFETY: no preconditions.
    let pid = unsafe { libc::getpid() };
    let log = match create_unique_log_file(tmp_dir, prefix, program, pid) {
        Ok(log) => log,
        Err(e) => {
            write_fd(libc::STDERR_FILENO, b"Cannot create a log file\n");
            errno::set_errno(errno::Errno(e.errno()));
            return;
        }
    };
    // Output is best effort from here on: a failed write must not stop the report.
    {
        use std::os::fd::AsRawFd;
        let mut file = FdWriter::new(log.fd.as_raw_fd());
        let _ = write_preamble(&mut file, reason, message, extra);
    }
    drop(log.fd);
    let log_name = log.name.as_cstr();

    let mut stderr = FdWriter::stderr();
    let banner = Banner::new(program.to_bytes());
    let _ = write_announcement(&mut stderr, &banner, program, reason, message, log_name);

    let ran = run_postmortem(fatal, log_name, reason);

    let _ = stderr.write_all(b" done.\n");
    let _ = write_extra_log_info(&mut stderr, Some(EXTRA_INFO_PREVIEW_LINES));
    let _ = banner.write_footer(&mut stderr);

    if ran {
        finish_fatal_stack_trace(program, log_name, None, true);
    }
}

fn write_preamble(
    w: &mut impl Write,
    reason: &CStr,
    message: Option<&CStr>,
    extra: Option<&CStr>,
) -> io::Result<()> {
    w.write_all(b"This stack trace was requested because: ")?;
    w.write_all(reason.to_bytes())?;
    w.write_all(b"\n")?;
    if let Some(message) = message {
        w.write_all(message.to_bytes())?;
        w.write_all(b"\n")?;
    }
    write_extra_log_info(w, None)?;
    if let Some(extra) = extra {
        w.write_all(extra.to_bytes())?;
        w.write_all(b"\n")?;
    }
    w.write_all(b"\nPostmortem Stack Trace\n")
}

fn write_announcement(
    w: &mut impl Write,
    banner: &Banner,
    program: &CStr,
    reason: &CStr,
    message: Option<&CStr>,
    log_name: &CStr,
) -> io::Result<()> {
    banner.write_header(w, program.to_bytes())?;
    write_program_info(w)?;
    w.write_all(b"This stack trace was requested because: ")?;
    w.write_all(reason.to_bytes())?;
    w.write_all(b"\n")?;
    if let Some(message) = message {
        w.write_all(message.to_bytes())?;
        w.write_all(b"\n")?;
    }
    let mut host = [0u8; MAX_HOSTNAME_LEN];
    w.write_all(b"writing crash report to [ ")?;
    w.write_all(hostname(&mut host))?;
    w.write_all(b":")?;
    w.write_all(log_name.to_bytes())?;
    w.write_all(b" ] ...")
}

/// Runs the postmortem command on `log_name`. True if a command was run, whatever its outcome.
fn run_postmortem(fatal: bool, log_name: &CStr, reason: &CStr) -> bool {
    let Some(commands) = try_read(&context().commands) else {
        return false;
    };

    let mut pid = FixedBuf::<NUMERIC_BUFFER_SIZE>::new();
    let mut time = FixedBuf::<NUMERIC_BUFFER_SIZE>::new();
    // SAFETY: no preconditions.
    let _ = pid.push_num(unsafe { libc::getpid() }.into());
    let _ = time.push_num(app_elapsed_time());
    let substitutions = [
        (tokens::PID, pid.as_cstr()),
        (tokens::LOG, log_name),
        (tokens::TIME, time.as_cstr()),
        (tokens::REASON, reason),
    ];
    commands.postmortem.run(
        POSTMORTEM_ENV,
        fatal,
        &substitutions,
        commands.postmortem_timeout,
        "postmortem",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::GLOBAL_STATE;
    use crate::context::{configure, is_app_crashing, set_extra_log_info_for_errors};
    use crate::registry::ExtraLogLines;
    use crate::shared::configuration::{CommandConfig, StackTraceConfiguration};
    use crate::unwinder::UnwinderKind;
    use arch_common::MutexExt;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};
    use std::time::Duration;

    fn configure_for_test(dir: &Path, postmortem: Option<CommandConfig>) {
        let mut config = StackTraceConfiguration::new(
            postmortem,
            Some(Duration::from_secs(30)),
            None,
            None,
            Some("report".to_string()),
            Some(dir.to_str().unwrap().to_string()),
            UnwinderKind::default(),
            vec![],
            false,
            false,
        )
        .unwrap();
        config.set_trap_on_debugger(false);
        configure(&config).unwrap();
    }

    fn reports_in(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                path.file_name()
                    .unwrap()
                    .to_string_lossy()
                    .starts_with("report_")
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_report_lock_refuses_recursion() {
        let lock = ReportLock::new();
        let guard = lock.acquire();
        assert!(guard.is_some());
        assert!(lock.acquire().is_none());
        drop(guard);
        assert!(lock.acquire().is_some());
    }

    #[test]
    fn test_report_lock_owner_is_set_with_the_lock() {
        let lock = ReportLock::new();
        assert_eq!(lock.owner.load(Relaxed), UNLOCKED);
        let guard = lock.acquire();
        assert_eq!(lock.owner.load(Relaxed), current_thread());
        std::thread::scope(|s| {
            s.spawn(|| {
                // Another thread sees a held lock, not one of its own.
                assert!(lock
                    .owner
                    .compare_exchange(UNLOCKED, current_thread(), Acquire, Relaxed)
                    .is_err());
            });
        });
        drop(guard);
        assert_eq!(lock.owner.load(Relaxed), UNLOCKED);
    }

    #[test]
    fn test_report_lock_serializes_threads() {
        static LOCK: ReportLock = ReportLock::new();
        static INSIDE: AtomicUsize = AtomicUsize::new(0);

        let threads: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    for _ in 0..100 {
                        let _guard = LOCK.acquire().unwrap();
                        assert_eq!(INSIDE.fetch_add(1, Relaxed), 0);
                        std::thread::yield_now();
                        INSIDE.fetch_sub(1, Relaxed);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
    }

    #[test]
    fn test_preamble() {
        let mut out = Vec::new();
        write_preamble(&mut out, c"testing", Some(c"the message"), Some(c"more")).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("This stack trace was requested because: testing\nthe message\n"));
        assert!(out.ends_with("more\n\nPostmortem Stack Trace\n"), "{out}");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_fatal_report_writes_log_and_sets_crash_flag() {
        let _guard = GLOBAL_STATE.lock_or_panic();
        let dir = tempfile::tempdir().unwrap();
        configure_for_test(dir.path(), None);

        let lines: ExtraLogLines = Arc::new(RwLock::new(vec!["reporter extra line".to_string()]));
        set_extra_log_info_for_errors("reporter.test", Some(&lines));

        log_fatal_process_state(c"unit test", Some(c"a message"), None);
        assert!(is_app_crashing());
        log_fatal_process_state(c"unit test again", None, None);
        assert!(is_app_crashing());
        set_extra_log_info_for_errors("reporter.test", None);

        let reports = reports_in(dir.path());
        assert_eq!(reports.len(), 2, "{reports:?}");
        let first = std::fs::read_to_string(&reports[0]).unwrap();
        assert!(first.starts_with(
            "This stack trace was requested because: unit test\na message\n"
        ));
        assert!(
            first.contains("reporter.test:\nreporter extra line\n"),
            "{first}"
        );
        assert!(first.ends_with("\nPostmortem Stack Trace\n"));
        // The second report for the same pid got a suffix.
        assert!(reports[1].to_string_lossy().ends_with(".1"), "{reports:?}");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_postmortem_command_appends_to_log() {
        let _guard = GLOBAL_STATE.lock_or_panic();
        let dir = tempfile::tempdir().unwrap();
        let script = "echo \"postmortem for $1: $2\" >> \"$0\"";
        let argv = ["$cmd", "-c", script, "$log", "$pid", "$reason"];
        let postmortem = CommandConfig::new(
            Some("/bin/sh".to_string()),
            Some(argv.map(String::from).to_vec()),
            None,
        );
        configure_for_test(dir.path(), Some(postmortem));

        log_current_process_state(c"checking in", None, None);
        configure_for_test(dir.path(), None);

        let reports = reports_in(dir.path());
        assert_eq!(reports.len(), 1);
        let contents = std::fs::read_to_string(&reports[0]).unwrap();
        let expected = format!(
            "Postmortem Stack Trace\npostmortem for {}: checking in\n",
            std::process::id()
        );
        assert!(contents.ends_with(&expected), "{contents}");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_concurrent_reports_get_distinct_files() {
        let _guard = GLOBAL_STATE.lock_or_panic();
        let dir = tempfile::tempdir().unwrap();
        configure_for_test(dir.path(), None);

        let threads: Vec<_> = (0..2)
            .map(|_| std::thread::spawn(|| log_current_process_state(c"concurrent", None, None)))
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let reports = reports_in(dir.path());
        assert_eq!(reports.len(), 2);
        for report in reports {
            let contents = std::fs::read_to_string(report).unwrap();
            assert!(contents.starts_with("This stack trace was requested because: concurrent\n"));
        }
    }
}
