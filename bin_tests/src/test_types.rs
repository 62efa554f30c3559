// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Type-safe definitions for the modes of `crashing_test_app`.

/// What `crashing_test_app` does once reporting is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestMode {
    /// Installs the crash handlers and dereferences null.
    Segfault,
    /// Writes one fatal report and exits.
    Fatal,
    /// Writes fatal reports from two threads at once.
    ConcurrentFatal,
    /// Writes a report for a process that keeps running.
    NonFatal,
    /// Writes a fatal report with a postmortem command that never finishes.
    PostmortemTimeout,
    /// Logs the stack trace of the running thread to a file.
    LogStack,
}

impl TestMode {
    /// Returns the string representation used in command-line arguments.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Segfault => "segfault",
            Self::Fatal => "fatal",
            Self::ConcurrentFatal => "concurrent_fatal",
            Self::NonFatal => "nonfatal",
            Self::PostmortemTimeout => "postmortem_timeout",
            Self::LogStack => "log_stack",
        }
    }

    /// Returns all available test modes.
    pub const fn all() -> &'static [Self] {
        &[
            Self::Segfault,
            Self::Fatal,
            Self::ConcurrentFatal,
            Self::NonFatal,
            Self::PostmortemTimeout,
            Self::LogStack,
        ]
    }

    /// Number of crash reports a run in this mode leaves in the output directory.
    pub const fn expected_reports(self) -> usize {
        match self {
            Self::ConcurrentFatal => 2,
            Self::LogStack => 0,
            _ => 1,
        }
    }

    /// Whether the postmortem command should have appended to each report.
    pub const fn expects_postmortem(self) -> bool {
        !matches!(self, Self::PostmortemTimeout | Self::LogStack)
    }

    /// The signal the process should die of, if any.
    pub const fn expected_signal(self) -> Option<i32> {
        match self {
            Self::Segfault => Some(libc::SIGSEGV),
            _ => None,
        }
    }
}

impl std::fmt::Display for TestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "segfault" => Ok(Self::Segfault),
            "fatal" => Ok(Self::Fatal),
            "concurrent_fatal" => Ok(Self::ConcurrentFatal),
            "nonfatal" => Ok(Self::NonFatal),
            "postmortem_timeout" => Ok(Self::PostmortemTimeout),
            "log_stack" => Ok(Self::LogStack),
            _ => Err(format!("Unknown test mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_str_roundtrip() {
        for mode in TestMode::all() {
            let s = mode.as_str();
            let parsed: TestMode = s.parse().unwrap();
            assert_eq!(*mode, parsed);
        }
        assert!("explode".parse::<TestMode>().is_err());
    }

    #[test]
    fn test_mode_expectations() {
        assert_eq!(TestMode::Segfault.expected_signal(), Some(libc::SIGSEGV));
        assert_eq!(TestMode::Fatal.expected_signal(), None);
        assert_eq!(TestMode::ConcurrentFatal.expected_reports(), 2);
        assert!(!TestMode::PostmortemTimeout.expects_postmortem());
        assert!(TestMode::NonFatal.expects_postmortem());
    }
}
