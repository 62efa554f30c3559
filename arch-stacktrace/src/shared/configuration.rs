// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::shared::constants;
use crate::unwinder::UnwinderKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An external command plus its argument templates.
///
/// `argv` is used for ordinary reports and `fatal_argv` for fatal ones. For the session logger,
/// `fatal_argv` is the template used when a crash stack trace is handed over. Either template may
/// be missing, in which case the corresponding invocation is silently skipped. The command itself
/// may also be missing when it is expected to come from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub command: Option<String>,
    pub argv: Option<Vec<String>>,
    pub fatal_argv: Option<Vec<String>>,
}

impl CommandConfig {
    pub fn new(
        command: Option<String>,
        argv: Option<Vec<String>>,
        fatal_argv: Option<Vec<String>>,
    ) -> Self {
        Self {
            command,
            argv,
            fatal_argv,
        }
    }
}

pub fn default_signals() -> Vec<i32> {
    vec![
        libc::SIGBUS,
        libc::SIGABRT,
        libc::SIGSEGV,
        libc::SIGILL,
        libc::SIGFPE,
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackTraceConfiguration {
    create_alt_stack: bool,
    // Forward fatal stack traces to the session logger
    fatal_stack_logging: bool,
    log_file_prefix: String,
    postmortem: Option<CommandConfig>,
    // Zero waits forever
    postmortem_timeout: Duration,
    session_logger: Option<CommandConfig>,
    session_timeout: Duration,
    signals: Vec<i32>,
    tmp_dir: Option<String>,
    trap_on_debugger: bool,
    unwinder: UnwinderKind,
    use_alt_stack: bool,
}

impl Default for StackTraceConfiguration {
    fn default() -> Self {
        Self {
            create_alt_stack: false,
            fatal_stack_logging: false,
            log_file_prefix: constants::DEFAULT_LOG_FILE_PREFIX.to_string(),
            postmortem: None,
            postmortem_timeout: constants::DEFAULT_POSTMORTEM_TIMEOUT,
            session_logger: None,
            session_timeout: constants::DEFAULT_SESSION_TIMEOUT,
            signals: default_signals(),
            tmp_dir: None,
            trap_on_debugger: true,
            unwinder: UnwinderKind::default(),
            use_alt_stack: false,
        }
    }
}

impl StackTraceConfiguration {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        postmortem: Option<CommandConfig>,
        postmortem_timeout: Option<Duration>,
        session_logger: Option<CommandConfig>,
        session_timeout: Option<Duration>,
        log_file_prefix: Option<String>,
        tmp_dir: Option<String>,
        unwinder: UnwinderKind,
        mut signals: Vec<i32>,
        create_alt_stack: bool,
        use_alt_stack: bool,
    ) -> anyhow::Result<Self> {
        if signals.is_empty() {
            signals = default_signals();
        }
        let config = Self {
            create_alt_stack,
            fatal_stack_logging: false,
            log_file_prefix: log_file_prefix
                .unwrap_or_else(|| constants::DEFAULT_LOG_FILE_PREFIX.to_string()),
            postmortem,
            postmortem_timeout: postmortem_timeout.unwrap_or(constants::DEFAULT_POSTMORTEM_TIMEOUT),
            session_logger,
            session_timeout: session_timeout.unwrap_or(constants::DEFAULT_SESSION_TIMEOUT),
            signals,
            tmp_dir,
            trap_on_debugger: true,
            unwinder,
            use_alt_stack,
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from JSON, applying the same checks as [Self::new].
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        // Requesting to create, but not use, the altstack is considered paradoxical.
        anyhow::ensure!(
            !self.create_alt_stack || self.use_alt_stack,
            "Cannot create an altstack without using it"
        );
        anyhow::ensure!(
            !self.log_file_prefix.is_empty() && !self.log_file_prefix.contains('/'),
            "Invalid log file prefix {:?}",
            self.log_file_prefix
        );
        if let Some(tmp_dir) = &self.tmp_dir {
            anyhow::ensure!(!tmp_dir.is_empty(), "Temporary directory must not be empty");
        }

        let mut signals = self.signals.clone();
        signals.sort();
        signals.dedup();
        anyhow::ensure!(
            signals.len() == self.signals.len(),
            "Signals contained duplicate elements"
        );
        // Ensure that all signal values translate to a valid signum
        for signum in &self.signals {
            signal_from_signum(*signum)?;
        }
        Ok(())
    }

    pub fn create_alt_stack(&self) -> bool {
        self.create_alt_stack
    }

    pub fn use_alt_stack(&self) -> bool {
        self.use_alt_stack
    }

    pub fn fatal_stack_logging(&self) -> bool {
        self.fatal_stack_logging
    }

    pub fn log_file_prefix(&self) -> &str {
        &self.log_file_prefix
    }

    pub fn postmortem(&self) -> Option<&CommandConfig> {
        self.postmortem.as_ref()
    }

    pub fn postmortem_timeout(&self) -> Duration {
        self.postmortem_timeout
    }

    pub fn session_logger(&self) -> Option<&CommandConfig> {
        self.session_logger.as_ref()
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub fn signals(&self) -> &Vec<i32> {
        &self.signals
    }

    pub fn tmp_dir(&self) -> Option<&str> {
        self.tmp_dir.as_deref()
    }

    pub fn trap_on_debugger(&self) -> bool {
        self.trap_on_debugger
    }

    pub fn unwinder(&self) -> UnwinderKind {
        self.unwinder
    }

    pub fn set_fatal_stack_logging(&mut self, fatal_stack_logging: bool) {
        self.fatal_stack_logging = fatal_stack_logging;
    }

    pub fn set_trap_on_debugger(&mut self, trap_on_debugger: bool) {
        self.trap_on_debugger = trap_on_debugger;
    }

    pub fn set_create_alt_stack(&mut self, create_alt_stack: bool) -> anyhow::Result<()> {
        anyhow::ensure!(
            !create_alt_stack || self.use_alt_stack,
            "Cannot create an altstack without using it"
        );
        self.create_alt_stack = create_alt_stack;
        Ok(())
    }

    pub fn set_use_alt_stack(&mut self, use_alt_stack: bool) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.create_alt_stack || use_alt_stack,
            "Cannot create an altstack without using it"
        );
        self.use_alt_stack = use_alt_stack;
        Ok(())
    }
}

pub(crate) fn signal_from_signum(signum: i32) -> anyhow::Result<nix::sys::signal::Signal> {
    nix::sys::signal::Signal::try_from(signum)
        .map_err(|_| anyhow::anyhow!("Invalid signal number {signum}"))
}
