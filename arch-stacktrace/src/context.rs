// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The process-wide state behind every report.
//!
//! Everything lives in one const-initialized [ProcessContext], so it is usable from a signal
//! handler before (or without) any explicit setup. Flags are atomics. Everything else sits behind
//! a lock that normal code takes as usual, while the crash path only ever tries it: if a lock is
//! held at crash time, that piece of information is skipped or replaced by its default.

use crate::invoker::CommandTemplate;
use crate::registry::{ExtraLogInfo, ExtraLogLines, ProgramInfo};
use crate::reporter::ReportLock;
use crate::shared::configuration::StackTraceConfiguration;
use crate::shared::constants::{
    DEFAULT_POSTMORTEM_TIMEOUT, DEFAULT_PROGRAM_NAME, DEFAULT_SESSION_TIMEOUT, DEFAULT_TMP_DIR,
    MAX_HOSTNAME_LEN,
};
use crate::symbolizer::StackTraceCallback;
use crate::unwinder::UnwinderKind;
use arch_common::MutexExt;
use std::ffi::{CStr, CString};
use std::io;
use std::sync::atomic::Ordering::{Relaxed, SeqCst};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8};
use std::sync::{
    Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(crate) struct Names {
    program: Option<CString>,
    tmp_dir: Option<CString>,
    log_file_prefix: Option<CString>,
}

impl Names {
    const fn new() -> Self {
        Self {
            program: None,
            tmp_dir: None,
            log_file_prefix: None,
        }
    }

    pub(crate) fn program(&self) -> &CStr {
        self.program.as_deref().unwrap_or(DEFAULT_PROGRAM_NAME)
    }

    pub(crate) fn tmp_dir(&self) -> &CStr {
        self.tmp_dir.as_deref().unwrap_or(DEFAULT_TMP_DIR)
    }

    pub(crate) fn log_file_prefix(&self) -> &CStr {
        self.log_file_prefix.as_deref().unwrap_or(c"st")
    }
}

pub(crate) struct Commands {
    pub(crate) postmortem: CommandTemplate,
    pub(crate) postmortem_timeout: Duration,
    pub(crate) session: CommandTemplate,
    pub(crate) session_timeout: Duration,
}

impl Commands {
    const fn new() -> Self {
        Self {
            postmortem: CommandTemplate::empty(),
            postmortem_timeout: DEFAULT_POSTMORTEM_TIMEOUT,
            session: CommandTemplate::empty(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

pub(crate) struct ProcessContext {
    pub(crate) names: RwLock<Names>,
    pub(crate) commands: RwLock<Commands>,
    pub(crate) program_info: Mutex<ProgramInfo>,
    pub(crate) extra_log_info: Mutex<ExtraLogInfo>,
    pub(crate) stack_trace_callback: RwLock<Option<StackTraceCallback>>,
    pub(crate) report_lock: ReportLock,
    launch_time: AtomicI64,
    crashing: AtomicBool,
    fatal_stack_logging: AtomicBool,
    trap_on_debugger: AtomicBool,
    unwinder: AtomicU8,
}

impl ProcessContext {
    const fn new() -> Self {
        Self {
            names: RwLock::new(Names::new()),
            commands: RwLock::new(Commands::new()),
            program_info: Mutex::new(ProgramInfo::new()),
            extra_log_info: Mutex::new(ExtraLogInfo::new()),
            stack_trace_callback: RwLock::new(None),
            report_lock: ReportLock::new(),
            launch_time: AtomicI64::new(0),
            crashing: AtomicBool::new(false),
            fatal_stack_logging: AtomicBool::new(false),
            trap_on_debugger: AtomicBool::new(true),
            unwinder: AtomicU8::new(UnwinderKind::UnwindTables as u8),
        }
    }
}

static CONTEXT: ProcessContext = ProcessContext::new();

pub(crate) fn context() -> &'static ProcessContext {
    &CONTEXT
}

/// Normal-path read; a poisoned lock still holds usable data.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Crash-path read: never blocks, `None` if somebody is writing.
pub(crate) fn try_read<T>(lock: &RwLock<T>) -> Option<RwLockReadGuard<'_, T>> {
    match lock.try_read() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Crash-path lock: never blocks, `None` if the lock is held.
pub(crate) fn try_lock<T>(lock: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match lock.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// The part of `path` after the last `/`, or all of it if that part is empty.
fn base_name(path: &str) -> &str {
    match path.rsplit('/').next() {
        Some(base) if !base.is_empty() => base,
        _ => path,
    }
}

/// Records the launch time, the program name and the temporary directory.
///
/// `program_path` defaults to the path of the running executable. Safe to call more than once;
/// the launch time is taken from the first call.
pub fn init(program_path: Option<&str>) -> anyhow::Result<()> {
    let _ = CONTEXT
        .launch_time
        .compare_exchange(0, now_unix_seconds(), SeqCst, SeqCst);

    let exe = match program_path {
        Some(path) => Some(path.to_string()),
        None => std::env::current_exe()
            .ok()
            .map(|p| p.to_string_lossy().into_owned()),
    };
    let tmp_dir = CString::new(std::env::temp_dir().to_string_lossy().into_owned())?;
    let program = exe
        .as_deref()
        .map(|p| CString::new(base_name(p)))
        .transpose()?;

    let mut names = write(&CONTEXT.names);
    if names.tmp_dir.is_none() {
        names.tmp_dir = Some(tmp_dir);
    }
    if program.is_some() {
        names.program = program;
    }
    tracing::debug!(
        program = ?names.program(),
        tmp_dir = ?names.tmp_dir(),
        "Initialized arch process context"
    );
    Ok(())
}

/// Applies `config` to the process. Command templates are converted here, once, so that the
/// crash path never has to.
pub fn configure(config: &StackTraceConfiguration) -> anyhow::Result<()> {
    let postmortem = config
        .postmortem()
        .map(CommandTemplate::from_config)
        .transpose()?
        .unwrap_or_default();
    let session = config
        .session_logger()
        .map(CommandTemplate::from_config)
        .transpose()?
        .unwrap_or_default();
    let tmp_dir = config.tmp_dir().map(CString::new).transpose()?;
    let log_file_prefix = CString::new(config.log_file_prefix())?;

    {
        let mut names = write(&CONTEXT.names);
        if tmp_dir.is_some() {
            names.tmp_dir = tmp_dir;
        }
        names.log_file_prefix = Some(log_file_prefix);
    }
    *write(&CONTEXT.commands) = Commands {
        postmortem,
        postmortem_timeout: config.postmortem_timeout(),
        session,
        session_timeout: config.session_timeout(),
    };
    CONTEXT
        .fatal_stack_logging
        .store(config.fatal_stack_logging(), SeqCst);
    CONTEXT
        .trap_on_debugger
        .store(config.trap_on_debugger(), SeqCst);
    CONTEXT.unwinder.store(config.unwinder() as u8, SeqCst);
    tracing::info!(
        unwinder = ?config.unwinder(),
        postmortem = config.postmortem().is_some(),
        session_logger = config.session_logger().is_some(),
        "Configured stack trace reporting"
    );
    Ok(())
}

/// Sets the name used in reports; the base name of `program_name` is kept. `None` restores the
/// default.
pub fn set_program_name_for_errors(program_name: Option<&str>) -> anyhow::Result<()> {
    let program = program_name
        .map(|name| CString::new(base_name(name)))
        .transpose()?;
    write(&CONTEXT.names).program = program;
    Ok(())
}

/// The name used in reports, `"libArch"` unless one was set.
pub fn program_name_for_errors() -> String {
    read(&CONTEXT.names)
        .program()
        .to_string_lossy()
        .into_owned()
}

/// Seconds since the epoch at [init], or 0 if it was never called.
pub fn app_launch_time() -> i64 {
    CONTEXT.launch_time.load(Relaxed)
}

/// Seconds of user CPU time consumed so far. Falls back to wall-clock seconds since launch when
/// resource usage is unavailable. Async-signal-safe.
pub fn app_elapsed_time() -> i64 {
    // SAFETY: `getrusage` only writes into `usage`.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } == 0 {
        return usage.ru_utime.tv_sec as i64;
    }
    // SAFETY: a null argument is allowed.
    let now = unsafe { libc::time(std::ptr::null_mut()) } as i64;
    now - app_launch_time()
}

/// True once a fatal report has started. Never goes back to false.
pub fn is_app_crashing() -> bool {
    CONTEXT.crashing.load(SeqCst)
}

pub(crate) fn set_app_crashing() {
    CONTEXT.crashing.store(true, SeqCst);
}

pub(crate) fn trap_on_debugger() -> bool {
    CONTEXT.trap_on_debugger.load(Relaxed)
}

pub(crate) fn unwinder_kind() -> UnwinderKind {
    UnwinderKind::from_u8(CONTEXT.unwinder.load(Relaxed))
}

pub fn set_fatal_stack_logging(enabled: bool) {
    CONTEXT.fatal_stack_logging.store(enabled, SeqCst);
}

pub fn fatal_stack_logging() -> bool {
    CONTEXT.fatal_stack_logging.load(SeqCst)
}

/// Registers `key: value` to be printed with every report. An empty value removes the key.
pub fn set_program_info_for_errors(key: &str, value: &str) {
    CONTEXT.program_info.lock_or_panic().set(key, value);
}

pub fn program_info_for_errors(key: &str) -> Option<String> {
    CONTEXT
        .program_info
        .lock_or_panic()
        .get(key)
        .map(str::to_string)
}

/// Registers lines to be included in fatal reports under `key`. Only a weak reference is kept:
/// the lines are read at report time for as long as the caller keeps them alive. `None` or an
/// empty list removes the key.
pub fn set_extra_log_info_for_errors(key: &str, lines: Option<&ExtraLogLines>) {
    CONTEXT.extra_log_info.lock_or_panic().set(key, lines);
}

/// Sets the postmortem command run by reports, with its argument templates for ordinary and
/// fatal reports.
pub fn set_process_state_log_command(
    command: Option<&str>,
    argv: Option<&[&str]>,
    fatal_argv: Option<&[&str]>,
) -> anyhow::Result<()> {
    let template = CommandTemplate::new(command, argv, fatal_argv)?;
    write(&CONTEXT.commands).postmortem = template;
    tracing::debug!(?command, "Set process state log command");
    Ok(())
}

/// Writes the pre-rendered program info. Skipped if the registry is being updated.
pub(crate) fn write_program_info(w: &mut impl io::Write) -> io::Result<()> {
    match try_lock(&CONTEXT.program_info) {
        Some(info) => w.write_all(info.rendered().as_bytes()),
        None => Ok(()),
    }
}

/// Writes the extra log info, at most `max` lines of it. Skipped if the registry is being
/// updated.
pub(crate) fn write_extra_log_info(w: &mut impl io::Write, max: Option<usize>) -> io::Result<()> {
    match try_lock(&CONTEXT.extra_log_info) {
        Some(info) => info.emit(w, max),
        None => Ok(()),
    }
}

/// The host name, or an empty slice if it cannot be determined. Async-signal-safe.
pub(crate) fn hostname(buf: &mut [u8; MAX_HOSTNAME_LEN]) -> &[u8] {
    // SAFETY: `buf` is writable for its whole length.
    if unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) } != 0 {
        return &[];
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    &buf[..len]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Serializes tests that change process-wide names, commands or flags.
    pub(crate) static GLOBAL_STATE: Mutex<()> = Mutex::new(());

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/usr/bin/app"), "app");
        assert_eq!(base_name("app"), "app");
        assert_eq!(base_name("/usr/bin/"), "/usr/bin/");
        assert_eq!(base_name(""), "");
    }

    #[test]
    fn test_program_name_for_errors() {
        let _guard = GLOBAL_STATE.lock_or_panic();
        set_program_name_for_errors(Some("/opt/tools/bin/renderer")).unwrap();
        assert_eq!(program_name_for_errors(), "renderer");
        set_program_name_for_errors(None).unwrap();
        assert_eq!(program_name_for_errors(), "libArch");
        assert!(set_program_name_for_errors(Some("bad\0name")).is_err());
    }

    #[test]
    fn test_init_records_launch_time() {
        let _guard = GLOBAL_STATE.lock_or_panic();
        init(Some("/path/to/context_test")).unwrap();
        assert!(app_launch_time() > 0);
        assert_eq!(program_name_for_errors(), "context_test");
        assert!(app_elapsed_time() >= 0);
        set_program_name_for_errors(None).unwrap();
    }

    #[test]
    fn test_program_info_get_set_remove() {
        set_program_info_for_errors("context.build", "1.2.3");
        assert_eq!(
            program_info_for_errors("context.build").as_deref(),
            Some("1.2.3")
        );
        set_program_info_for_errors("context.build", "1.2.4");
        assert_eq!(
            program_info_for_errors("context.build").as_deref(),
            Some("1.2.4")
        );
        set_program_info_for_errors("context.build", "");
        assert_eq!(program_info_for_errors("context.build"), None);
    }

    #[test]
    fn test_program_info_is_written() {
        let _guard = GLOBAL_STATE.lock_or_panic();
        set_program_info_for_errors("context.written", "yes");
        let mut out = Vec::new();
        write_program_info(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("context.written: yes\n"), "{out}");
        set_program_info_for_errors("context.written", "");
    }

    #[test]
    fn test_extra_log_info_is_weak() {
        let _guard = GLOBAL_STATE.lock_or_panic();
        let lines: ExtraLogLines = Arc::new(RwLock::new(vec!["context line\n".to_string()]));
        set_extra_log_info_for_errors("context.extra", Some(&lines));
        let mut out = Vec::new();
        write_extra_log_info(&mut out, None).unwrap();
        assert!(String::from_utf8_lossy(&out).contains("context.extra:\ncontext line\n"));

        drop(lines);
        let mut out = Vec::new();
        write_extra_log_info(&mut out, None).unwrap();
        assert!(!String::from_utf8_lossy(&out).contains("context.extra"));
        set_extra_log_info_for_errors("context.extra", None);
    }

    #[test]
    fn test_try_lock_skips_held_lock() {
        let registry = Mutex::new(ProgramInfo::new());
        let held = registry.lock_or_panic();
        assert!(try_lock(&registry).is_none());
        drop(held);
        assert!(try_lock(&registry).is_some());

        let names = RwLock::new(Names::new());
        let writer = write(&names);
        assert!(try_read(&names).is_none());
        drop(writer);
        assert_eq!(try_read(&names).unwrap().program(), DEFAULT_PROGRAM_NAME);
    }

    #[test]
    fn test_hostname() {
        let mut buf = [0u8; MAX_HOSTNAME_LEN];
        let host = hostname(&mut buf);
        assert!(!host.contains(&0));
    }

    #[test]
    fn test_set_process_state_log_command_rejects_nul() {
        let _guard = GLOBAL_STATE.lock_or_panic();
        assert!(set_process_state_log_command(Some("a\0b"), None, None).is_err());
    }
}
