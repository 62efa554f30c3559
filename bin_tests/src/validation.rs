// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Validation helpers for crash report tests.
//! Reads what `crashing_test_app` left behind and checks the report files and the stderr
//! announcements against each other.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Lines the postmortem command used by `crashing_test_app` appends to each report.
pub const POSTMORTEM_MARKER: &str = "postmortem ran for pid";

/// Report files named `<prefix>_*` in `dir`, sorted by name.
pub fn report_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let start = format!("{prefix}_");
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {dir:?}"))? {
        let path = entry?.path();
        let is_report = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(&start));
        if is_report {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Checks the layout of a report file and returns its contents.
pub fn validate_report(path: &Path, reason: &str, expect_postmortem: bool) -> Result<String> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading report at {path:?}"))?;
    let first = contents.lines().next().unwrap_or_default();
    anyhow::ensure!(
        first == format!("This stack trace was requested because: {reason}"),
        "Unexpected first line {first:?} in {path:?}"
    );
    anyhow::ensure!(
        contents.contains("\nPostmortem Stack Trace\n"),
        "Missing postmortem section in {path:?}: {contents:?}"
    );
    anyhow::ensure!(
        contents.contains(POSTMORTEM_MARKER) == expect_postmortem,
        "Postmortem output expected: {expect_postmortem}, got {contents:?}"
    );
    Ok(contents)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BannerState {
    Idle,
    Header,
    Writing,
    Done,
}

/// Checks that every crash announcement on `stderr` is complete and that no two of them
/// interleave: header, `writing crash report`, ` done.` and footer, in that order, before the
/// next header. Returns the log file named by each announcement.
pub fn validate_banners(stderr: &str, program: &str) -> Result<Vec<String>> {
    let header_label = format!(" {program} terminated ");
    let mut state = BannerState::Idle;
    let mut logs = Vec::new();

    for line in stderr.lines() {
        let next = if line.starts_with('-') && line.contains(&header_label) {
            anyhow::ensure!(
                state == BannerState::Idle,
                "Header inside a report: {stderr}"
            );
            BannerState::Header
        } else if let Some(rest) = line.strip_prefix("writing crash report to [ ") {
            anyhow::ensure!(state == BannerState::Header, "Misplaced log line: {stderr}");
            let target = rest.split(" ]").next().unwrap_or_default();
            let (_, log) = target
                .split_once(':')
                .with_context(|| format!("no host in {line:?}"))?;
            logs.push(log.to_string());
            if line.ends_with(" done.") {
                BannerState::Done
            } else {
                BannerState::Writing
            }
        } else if line == " done." {
            anyhow::ensure!(state == BannerState::Writing, "Misplaced done: {stderr}");
            BannerState::Done
        } else if line.len() >= 80 && line.bytes().all(|b| b == b'-') {
            anyhow::ensure!(state == BannerState::Done, "Misplaced footer: {stderr}");
            BannerState::Idle
        } else {
            state
        };
        state = next;
    }
    anyhow::ensure!(state == BannerState::Idle, "Unterminated report: {stderr}");
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DASHES: &str =
        "--------------------------------------------------------------------------------";

    fn announcement(program: &str, log: &str, done: &str) -> String {
        format!(
            "\n---------------------------- {program} terminated ----------------------------\n\
             This stack trace was requested because: testing\n\
             writing crash report to [ host:{log} ] ...{done}\n{DASHES}\n"
        )
    }

    #[test]
    fn test_validate_banners() {
        let timed_out = "FAIL: Crash handler timed out\n done.";
        let stderr = announcement("app", "/tmp/st_app.1", " done.")
            + &announcement("app", "/tmp/st_app.1.1", timed_out);
        let logs = validate_banners(&stderr, "app").unwrap();
        assert_eq!(logs, vec!["/tmp/st_app.1", "/tmp/st_app.1.1"]);
    }

    #[test]
    fn test_validate_banners_rejects_interleaving() {
        let first = announcement("app", "/tmp/a", " done.");
        let (head, tail) = first.split_at(first.find("writing").unwrap());
        let stderr = format!("{head}{}{tail}", announcement("app", "/tmp/b", " done."));
        assert!(validate_banners(&stderr, "app").is_err());
        assert!(validate_banners(head, "app").is_err());
    }

    #[test]
    fn test_report_files_and_validate_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("st_app.12");
        fs::write(
            &report,
            format!(
                "This stack trace was requested because: testing\n\nPostmortem Stack Trace\n\
                 {POSTMORTEM_MARKER} 12\n"
            ),
        )
        .unwrap();
        fs::write(dir.path().join("other"), "").unwrap();

        let files = report_files(dir.path(), "st").unwrap();
        assert_eq!(files, vec![report.clone()]);
        validate_report(&report, "testing", true).unwrap();
        assert!(validate_report(&report, "testing", false).is_err());
        assert!(validate_report(&report, "other reason", true).is_err());
    }
}
