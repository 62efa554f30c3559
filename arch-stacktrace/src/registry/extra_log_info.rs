// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::context::try_read;
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, RwLock, Weak};

/// Lines owned by the registrant. The registry only keeps a weak reference, so it never copies
/// or extends the lifetime of the data.
pub type ExtraLogLines = Arc<RwLock<Vec<String>>>;

const TRUNCATED: &[u8] = b"... see full diagnostics in crash report.\n";

#[derive(Debug, Default)]
pub(crate) struct ExtraLogInfo {
    entries: BTreeMap<String, Weak<RwLock<Vec<String>>>>,
}

impl ExtraLogInfo {
    pub(crate) const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// `None`, or lines that are currently empty, remove `key`.
    pub(crate) fn set(&mut self, key: &str, lines: Option<&ExtraLogLines>) {
        match lines {
            Some(lines) if !crate::context::read(lines).is_empty() => {
                self.entries.insert(key.to_string(), Arc::downgrade(lines));
            }
            _ => {
                self.entries.remove(key);
            }
        }
    }

    /// Writes every live entry as `"\n<key>:\n"` followed by its lines. With `max`, stops after
    /// that many lines in total and points at the crash report instead. Entries whose owner is
    /// gone, or that are being written to, are skipped.
    pub(crate) fn emit(&self, w: &mut impl io::Write, max: Option<usize>) -> io::Result<()> {
        let mut emitted = 0;
        for (key, lines) in &self.entries {
            let Some(lines) = lines.upgrade() else {
                continue;
            };
            let Some(lines) = try_read(&lines) else {
                continue;
            };
            w.write_all(b"\n")?;
            w.write_all(key.as_bytes())?;
            w.write_all(b":\n")?;
            for line in lines.iter() {
                if max.is_some_and(|max| emitted >= max) {
                    return w.write_all(TRUNCATED);
                }
                emitted += 1;
                w.write_all(line.as_bytes())?;
                if !line.ends_with('\n') {
                    w.write_all(b"\n")?;
                }
            }
        }
        Ok(())
    }
}
